// Buffer-pool page identity and per-page modification bookkeeping.
//
// A `BufferFrame` is the thing a mini-transaction's memo pins and latches.
// `note_modification` is the collaborator hook the redo subsystem calls on
// commit (§6.2 of the design spec): the first writer to dirty a page
// records its start lsn as `oldest_modification` and links the frame into
// a flush list; every writer bumps `newest_modification`.

use serde::{Deserialize, Serialize};

pub use parking_lot::{Mutex, RwLock as PRwLock};
pub use std::collections::{BTreeMap, HashMap, VecDeque};
pub use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
pub use std::sync::Arc;
pub use std::time::{Duration, Instant};

/// Page identifier combining tablespace and page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId {
    pub tablespace_id: u32,
    pub page_number: u64,
}

impl PageId {
    pub fn new(tablespace_id: u32, page_number: u64) -> Self {
        Self { tablespace_id, page_number }
    }
}

/// Buffer frame containing page data and the metadata the redo subsystem
/// needs to decide when a page is safe to flush.
#[derive(Debug)]
pub struct BufferFrame {
    pub(crate) page_id: Option<PageId>,
    data: Mutex<Vec<u8>>,
    pin_count: AtomicUsize,
    dirty: AtomicBool,
    access_count: AtomicU64,
    last_access: Mutex<Instant>,
    /// lsn at which this page was first dirtied since its last flush; 0
    /// means clean. Set once per dirty interval, by whichever mini-
    /// transaction gets there first.
    oldest_modification: AtomicU64,
    /// lsn of the most recent write to this page.
    newest_modification: AtomicU64,
}

impl BufferFrame {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_id: None,
            data: Mutex::new(vec![0; page_size]),
            pin_count: AtomicUsize::new(0),
            dirty: AtomicBool::new(false),
            access_count: AtomicU64::new(0),
            last_access: Mutex::new(Instant::now()),
            oldest_modification: AtomicU64::new(0),
            newest_modification: AtomicU64::new(0),
        }
    }

    pub fn pin(&self) -> usize {
        let count = self.pin_count.fetch_add(1, Ordering::AcqRel) + 1;
        self.access_count.fetch_add(1, Ordering::Relaxed);
        *self.last_access.lock() = Instant::now();
        count
    }

    pub fn unpin(&self) -> usize {
        let prev = self.pin_count.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            panic!("attempt to unpin a buffer frame with pin count 0");
        }
        prev - 1
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn read_data(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn write_data(&self, f: impl FnOnce(&mut [u8])) {
        f(&mut self.data.lock());
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn idle_time(&self) -> Duration {
        self.last_access.lock().elapsed()
    }

    pub fn oldest_modification(&self) -> u64 {
        self.oldest_modification.load(Ordering::Acquire)
    }

    pub fn newest_modification(&self) -> u64 {
        self.newest_modification.load(Ordering::Acquire)
    }

    /// Records a modification made durable by redo bytes in
    /// `[start_lsn, end_lsn)`. Returns `true` the first time this is
    /// called since the page was last clean, i.e. when the caller must
    /// link the frame into a flush list.
    pub fn note_modification(&self, start_lsn: u64, end_lsn: u64) -> bool {
        self.dirty.store(true, Ordering::Release);
        self.newest_modification.fetch_max(end_lsn, Ordering::AcqRel);
        self.oldest_modification
            .compare_exchange(0, start_lsn, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Called once the page has been written back to disk.
    pub fn clear_modification(&self) {
        self.oldest_modification.store(0, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
    }
}

/// Guard type for automatic unpinning of buffer frames.
pub struct BufferFrameGuard {
    frame: Arc<BufferFrame>,
}

impl BufferFrameGuard {
    pub fn new(frame: Arc<BufferFrame>) -> Self {
        frame.pin();
        Self { frame }
    }

    pub fn frame(&self) -> &Arc<BufferFrame> {
        &self.frame
    }
}

impl Drop for BufferFrameGuard {
    fn drop(&mut self) {
        self.frame.unpin();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_note_modification_wins_oldest() {
        let frame = BufferFrame::new(4096);
        assert!(frame.note_modification(100, 110));
        assert!(!frame.note_modification(120, 130));
        assert_eq!(frame.oldest_modification(), 100);
        assert_eq!(frame.newest_modification(), 130);
    }

    #[test]
    fn clear_modification_resets_for_next_dirty_cycle() {
        let frame = BufferFrame::new(4096);
        frame.note_modification(10, 20);
        frame.clear_modification();
        assert_eq!(frame.oldest_modification(), 0);
        assert!(frame.note_modification(30, 40));
    }
}
