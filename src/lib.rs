// Redo-log-buffer and mini-transaction core.
//
// This crate is the transient, in-memory half of a page-oriented storage
// engine's write path: the sn/lsn-addressed redo ring, the mini-transaction
// object that collects latches and log bytes for one atomic group of page
// changes, and the background threads that drain it to a log file.

pub mod buffer;
pub mod config;
pub mod error;
pub mod memory;
pub mod redo;
pub mod storage;
pub mod transaction;

pub use config::RedoConfig;
pub use error::{DbError, Result};
