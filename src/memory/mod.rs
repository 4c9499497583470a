// Buffer pool collaborator surface consumed by the redo subsystem: page
// frames, pin/dirty bookkeeping, and the dirty-page flush list.

pub mod buffer_pool;

pub use buffer_pool::{BufferFrame, BufferFrameGuard, FlushListEntry, FlushListManager, PageId};
