// Page-latching primitives consumed by the mini-transaction memo.

pub mod page_latch;

pub use page_latch::{LatchMode, PageLatch, PageLatchGuard};
