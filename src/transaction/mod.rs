// Named resource locks for the memo's non-page `*_LOCK` kinds.

pub mod locks;

pub use locks::{LockMode, NamedLock, NamedLockGuard};
