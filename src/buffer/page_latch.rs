// # Page Latching
//
// Blocking S/SX/X latches for buffer-pool pages, with the compatibility
// rules a mini-transaction's memo relies on when it pushes and later
// releases a page latch:
//
// ```text
//        S    SX   X
//   S    yes  yes  no
//   SX   yes  no   no
//   X    no   no   no
// ```
//
// S is a plain shared read latch. SX allows concurrent readers but
// excludes other writers, used when a page may be modified but is also
// being read by a tree-traversal that only needs stability, not exclusion
// from other SX holders. X is fully exclusive.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchMode {
    Shared,
    ShareExclusive,
    Exclusive,
}

struct State {
    readers: u32,
    sx_held: bool,
    x_held: bool,
}

pub struct PageLatch {
    state: Mutex<State>,
    released: Condvar,
    // Fast-path hint for callers that only want to know "is anyone
    // holding X right now" without taking the mutex.
    x_hint: AtomicU32,
}

impl PageLatch {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                readers: 0,
                sx_held: false,
                x_held: false,
            }),
            released: Condvar::new(),
            x_hint: AtomicU32::new(0),
        }
    }

    pub fn is_x_locked(&self) -> bool {
        self.x_hint.load(Ordering::Acquire) != 0
    }

    pub fn lock_s(&self) -> PageLatchGuard<'_> {
        self.acquire(LatchMode::Shared);
        PageLatchGuard { latch: self, mode: LatchMode::Shared }
    }

    pub fn lock_sx(&self) -> PageLatchGuard<'_> {
        self.acquire(LatchMode::ShareExclusive);
        PageLatchGuard { latch: self, mode: LatchMode::ShareExclusive }
    }

    pub fn lock_x(&self) -> PageLatchGuard<'_> {
        self.acquire(LatchMode::Exclusive);
        PageLatchGuard { latch: self, mode: LatchMode::Exclusive }
    }

    /// Blocks until `mode` is held, without returning a guard. Used by a
    /// mini-transaction's memo, which tracks acquired latches itself and
    /// releases them in reverse order on commit rather than relying on
    /// drop order (see `redo::mtr`).
    pub fn acquire(&self, mode: LatchMode) {
        let mut state = self.state.lock();
        match mode {
            LatchMode::Shared => {
                while state.x_held {
                    self.released.wait(&mut state);
                }
                state.readers += 1;
            }
            LatchMode::ShareExclusive => {
                while state.x_held || state.sx_held {
                    self.released.wait(&mut state);
                }
                state.sx_held = true;
            }
            LatchMode::Exclusive => {
                while state.x_held || state.sx_held || state.readers > 0 {
                    self.released.wait(&mut state);
                }
                state.x_held = true;
                self.x_hint.store(1, Ordering::Release);
            }
        }
    }

    /// The manual counterpart to `acquire`.
    pub fn release(&self, mode: LatchMode) {
        self.unlock(mode);
    }

    pub fn try_lock_x_timeout(&self, timeout: Duration) -> Option<PageLatchGuard<'_>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.x_held || state.sx_held || state.readers > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let timed_out = self.released.wait_for(&mut state, remaining).timed_out();
            if timed_out {
                return None;
            }
        }
        state.x_held = true;
        self.x_hint.store(1, Ordering::Release);
        Some(PageLatchGuard {
            latch: self,
            mode: LatchMode::Exclusive,
        })
    }

    fn unlock(&self, mode: LatchMode) {
        let mut state = self.state.lock();
        match mode {
            LatchMode::Shared => state.readers -= 1,
            LatchMode::ShareExclusive => state.sx_held = false,
            LatchMode::Exclusive => {
                state.x_held = false;
                self.x_hint.store(0, Ordering::Release);
            }
        }
        drop(state);
        self.released.notify_all();
    }
}

impl Default for PageLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard releasing the held latch mode on drop, so a mini-transaction
/// memo can hold these and unwind them in reverse push order without
/// tracking mode separately.
pub struct PageLatchGuard<'a> {
    latch: &'a PageLatch,
    mode: LatchMode,
}

impl PageLatchGuard<'_> {
    pub fn mode(&self) -> LatchMode {
        self.mode
    }
}

impl Drop for PageLatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.unlock(self.mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn shared_latches_are_concurrent() {
        let latch = PageLatch::new();
        let g1 = latch.lock_s();
        let g2 = latch.lock_s();
        assert_eq!(g1.mode(), LatchMode::Shared);
        assert_eq!(g2.mode(), LatchMode::Shared);
    }

    #[test]
    fn sx_excludes_sx_but_not_s() {
        let latch = Arc::new(PageLatch::new());
        let _sx = latch.lock_sx();
        let _s = latch.lock_s();

        let latch2 = Arc::clone(&latch);
        let blocked = thread::spawn(move || {
            let _sx2 = latch2.lock_sx();
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!blocked.is_finished());
    }

    #[test]
    fn x_is_exclusive_of_everything() {
        let latch = Arc::new(PageLatch::new());
        let g = latch.lock_x();
        assert!(latch.is_x_locked());

        let latch2 = Arc::clone(&latch);
        let blocked = thread::spawn(move || {
            let _s = latch2.lock_s();
        });
        thread::sleep(Duration::from_millis(20));
        assert!(!blocked.is_finished());
        drop(g);
        blocked.join().unwrap();
    }

    #[test]
    fn try_lock_x_timeout_fails_when_contended() {
        let latch = PageLatch::new();
        let _g = latch.lock_s();
        let attempt = latch.try_lock_x_timeout(Duration::from_millis(10));
        assert!(attempt.is_none());
    }
}
