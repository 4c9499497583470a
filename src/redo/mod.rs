//! The redo-log-buffer and mini-transaction subsystem: sn/lsn translation,
//! the shared ring and link buffers, the background writer/closer threads,
//! the logging-enabled switch, and the mini-transaction/commit machinery
//! built on top of them.

pub mod block;
pub mod closer_thread;
pub mod command;
pub mod file;
pub mod link_buffer;
pub mod logging_switch;
pub mod mtr;
pub mod reservation;
pub mod ring;
pub mod sn;
pub mod writer_thread;

pub use closer_thread::CloserThread;
pub use command::commit;
pub use file::{FileLog, InMemoryLog, SingleFileLog};
pub use logging_switch::{LoggingState, LoggingSwitch, NoLogToken};
pub use mtr::{LogMode, MemoKind, MemoObject, Mtr, MtrState};
pub use reservation::{Handle, LogSys};
pub use sn::SnGate;
pub use writer_thread::WriterThread;
