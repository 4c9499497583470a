// Relaxed-order dirty-page flush list (§6.3).
//
// Pages are appended in whatever order mini-transactions happen to commit
// in, sharded by tablespace the way `FlushListManager` sharded its
// per-tablespace `VecDeque`s — double-checked lazy creation per shard to
// avoid serializing unrelated tablespaces behind one global lock. What
// keeps this safe despite the relaxed order is the `recent_closed` window
// (`M_c`): no page can sit on a list with an `oldest_modification` more
// than `M_c` lsn units behind `buf_dirty_pages_added_up_to_lsn`, so
// subtracting that slack from a shard's head gives a checkpoint lsn that
// is never optimistic.

use serde::Serialize;

use super::common::{Arc, BufferFrame, HashMap, Mutex, PRwLock, PageId, VecDeque};

#[derive(Debug, Clone)]
pub struct FlushListEntry {
    pub page_id: PageId,
    pub frame: Arc<BufferFrame>,
}

#[derive(Default)]
struct FlushListStats {
    pages_added: std::sync::atomic::AtomicU64,
    pages_flushed: std::sync::atomic::AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct FlushListStatsSnapshot {
    pub pages_added: u64,
    pub pages_flushed: u64,
}

impl FlushListStats {
    fn snapshot(&self) -> FlushListStatsSnapshot {
        use std::sync::atomic::Ordering;
        FlushListStatsSnapshot {
            pages_added: self.pages_added.load(Ordering::Relaxed),
            pages_flushed: self.pages_flushed.load(Ordering::Relaxed),
        }
    }
}

pub struct FlushListManager {
    lists: PRwLock<HashMap<u32, Mutex<VecDeque<FlushListEntry>>>>,
    stats: FlushListStats,
}

impl FlushListManager {
    pub fn new() -> Self {
        Self {
            lists: PRwLock::new(HashMap::new()),
            stats: FlushListStats::default(),
        }
    }

    /// Inserts `entry` at the tail of its tablespace's list, creating the
    /// list on first use. Uses the double-checked read-then-write-lock
    /// pattern: most calls only need the read lock because the shard
    /// already exists.
    pub fn add_page(&self, tablespace_id: u32, entry: FlushListEntry) {
        {
            let lists = self.lists.read();
            if let Some(list) = lists.get(&tablespace_id) {
                list.lock().push_back(entry);
                self.stats.pages_added.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return;
            }
        }
        let mut lists = self.lists.write();
        lists
            .entry(tablespace_id)
            .or_insert_with(|| Mutex::new(VecDeque::new()))
            .lock()
            .push_back(entry);
        self.stats.pages_added.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    /// The oldest `oldest_modification` lsn among every tablespace's list
    /// head, or `None` if every list is empty.
    pub fn min_oldest_modification(&self) -> Option<u64> {
        let lists = self.lists.read();
        lists
            .values()
            .filter_map(|list| list.lock().front().map(|e| e.frame.oldest_modification()))
            .filter(|lsn| *lsn != 0)
            .min()
    }

    /// §6.3: the lsn recovery can safely check-point at, bounded above by
    /// `buf_dirty_pages_added_up_to_lsn` and by the oldest pending
    /// modification minus the `M_c` slack that the relaxed insertion order
    /// could have hidden from us.
    pub fn available_for_checkpoint_lsn(&self, buf_dirty_pages_added_up_to_lsn: u64, m_c: u64) -> u64 {
        let bound_by_dirty_pages = self
            .min_oldest_modification()
            .map(|lsn| lsn.saturating_sub(m_c))
            .unwrap_or(u64::MAX);
        buf_dirty_pages_added_up_to_lsn.min(bound_by_dirty_pages)
    }

    pub fn flush_tablespace(&self, tablespace_id: u32, max_pages: usize) -> Vec<FlushListEntry> {
        let lists = self.lists.read();
        let Some(list) = lists.get(&tablespace_id) else {
            return Vec::new();
        };
        let mut list = list.lock();
        let mut out = Vec::with_capacity(max_pages.min(list.len()));
        for _ in 0..max_pages {
            match list.pop_front() {
                Some(entry) => {
                    entry.frame.clear_modification();
                    out.push(entry);
                }
                None => break,
            }
        }
        self.stats
            .pages_flushed
            .fetch_add(out.len() as u64, std::sync::atomic::Ordering::Relaxed);
        out
    }

    pub fn dirty_count(&self) -> usize {
        self.lists.read().values().map(|l| l.lock().len()).sum()
    }

    pub fn stats(&self) -> FlushListStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Default for FlushListManager {
    fn default() -> Self {
        Self::new()
    }
}
