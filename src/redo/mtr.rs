//! The mini-transaction object: the per-thread transient structure that
//! collects page latches, redo bytes, and dirty-page markers for one
//! atomic group of page modifications (§3.3).

use std::sync::Arc;

use bytes::{BufMut, BytesMut};

use crate::buffer::page_latch::{LatchMode, PageLatch};
use crate::memory::buffer_pool::{BufferFrame, PageId};
use crate::redo::logging_switch::{LoggingSwitch, NoLogToken};
use crate::transaction::locks::{LockMode, NamedLock};

/// A no-log token paired with the switch it was minted from, so a dropped
/// mtr can still unmark itself without the caller threading the switch
/// through every call site.
struct NoLogHold {
    switch: Arc<LoggingSwitch>,
    token: Option<NoLogToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    All,
    None,
    NoRedo,
    ShortInserts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtrState {
    Init,
    Active,
    Committing,
    Committed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoKind {
    BufFix,
    PageS,
    PageSx,
    PageX,
    SLock,
    SxLock,
    XLock,
    Modify,
}

/// The object a memo entry refers to; holding the `Arc` keeps it alive for
/// the duration of the mini-transaction regardless of what other threads
/// do with the buffer pool or lock table meanwhile.
pub enum MemoObject {
    Page {
        page_id: PageId,
        frame: Arc<BufferFrame>,
        latch: Arc<PageLatch>,
    },
    Lock {
        lock: Arc<NamedLock>,
    },
}

struct MemoSlot {
    kind: MemoKind,
    object: MemoObject,
}

/// A mini-transaction. Created on the caller's stack, `start()`ed, used to
/// accumulate latches/locks/log bytes, then `commit()`ted — see
/// `redo::command::Command` for the commit orchestration itself.
pub struct Mtr {
    state: MtrState,
    log_mode: LogMode,
    memo: Vec<MemoSlot>,
    log: BytesMut,
    n_log_recs: u32,
    made_dirty: bool,
    no_log_hold: Option<NoLogHold>,
    pub(crate) commit_lsn: Option<u64>,
}

impl Mtr {
    pub fn new() -> Self {
        Self {
            state: MtrState::Init,
            log_mode: LogMode::All,
            memo: Vec::new(),
            log: BytesMut::new(),
            n_log_recs: 0,
            made_dirty: false,
            no_log_hold: None,
            commit_lsn: None,
        }
    }

    pub fn start(&mut self) {
        assert_eq!(self.state, MtrState::Init, "mtr already started");
        self.state = MtrState::Active;
    }

    /// Starts the mtr, consulting the logging-enabled switch: if logging
    /// is currently disabled the mtr is forced into `NoRedo` mode and
    /// holds a drain token until it commits or is dropped.
    pub fn start_with_switch(&mut self, switch: Arc<LoggingSwitch>, shard_key: usize) {
        self.start();
        if let Some(token) = switch.mark_mtr(shard_key) {
            self.log_mode = LogMode::NoRedo;
            self.no_log_hold = Some(NoLogHold { switch, token: Some(token) });
        }
    }

    pub fn state(&self) -> MtrState {
        self.state
    }

    pub fn log_mode(&self) -> LogMode {
        self.log_mode
    }

    pub fn set_log_mode(&mut self, mode: LogMode) {
        self.log_mode = mode;
    }

    pub fn is_logged(&self) -> bool {
        matches!(self.log_mode, LogMode::All)
    }

    pub fn n_log_recs(&self) -> u32 {
        self.n_log_recs
    }

    pub fn log_buffer(&self) -> &[u8] {
        &self.log
    }

    pub fn get_expected_log_size(&self) -> usize {
        self.log.len()
    }

    pub fn made_dirty(&self) -> bool {
        self.made_dirty
    }

    /// Appends one record group to the local log buffer. No-op (but still
    /// bumps nothing) when logging is suppressed for this mtr.
    pub fn log_record(&mut self, bytes: &[u8]) {
        assert_eq!(self.state, MtrState::Active, "mtr not active");
        if matches!(self.log_mode, LogMode::None | LogMode::NoRedo) {
            return;
        }
        self.log.put_slice(bytes);
        self.n_log_recs += 1;
    }

    pub fn buf_fix(&mut self, page_id: PageId, frame: Arc<BufferFrame>, latch: Arc<PageLatch>) {
        frame.pin();
        self.memo.push(MemoSlot {
            kind: MemoKind::BufFix,
            object: MemoObject::Page { page_id, frame, latch },
        });
    }

    fn latch_page(&mut self, page_id: PageId, frame: Arc<BufferFrame>, latch: Arc<PageLatch>, mode: LatchMode, kind: MemoKind) {
        frame.pin();
        latch.acquire(mode);
        self.memo.push(MemoSlot {
            kind,
            object: MemoObject::Page { page_id, frame, latch },
        });
    }

    pub fn s_latch_page(&mut self, page_id: PageId, frame: Arc<BufferFrame>, latch: Arc<PageLatch>) {
        self.latch_page(page_id, frame, latch, LatchMode::Shared, MemoKind::PageS);
    }

    pub fn sx_latch_page(&mut self, page_id: PageId, frame: Arc<BufferFrame>, latch: Arc<PageLatch>) {
        self.latch_page(page_id, frame, latch, LatchMode::ShareExclusive, MemoKind::PageSx);
    }

    pub fn x_latch_page(&mut self, page_id: PageId, frame: Arc<BufferFrame>, latch: Arc<PageLatch>) {
        self.latch_page(page_id, frame, latch, LatchMode::Exclusive, MemoKind::PageX);
    }

    pub fn s_lock(&mut self, lock: Arc<NamedLock>) {
        lock.acquire(LockMode::Shared);
        self.memo.push(MemoSlot { kind: MemoKind::SLock, object: MemoObject::Lock { lock } });
    }

    pub fn sx_lock(&mut self, lock: Arc<NamedLock>) {
        lock.acquire(LockMode::ShareExclusive);
        self.memo.push(MemoSlot { kind: MemoKind::SxLock, object: MemoObject::Lock { lock } });
    }

    pub fn x_lock(&mut self, lock: Arc<NamedLock>) {
        lock.acquire(LockMode::Exclusive);
        self.memo.push(MemoSlot { kind: MemoKind::XLock, object: MemoObject::Lock { lock } });
    }

    /// Marks that a page held via `buf_fix` was modified, without a
    /// separate page latch acquired through this mtr (the caller latched
    /// it some other way, e.g. a structure modification under a parent
    /// SX latch).
    pub fn mark_modified(&mut self, page_id: PageId, frame: Arc<BufferFrame>, latch: Arc<PageLatch>) {
        frame.pin();
        self.made_dirty = true;
        self.memo.push(MemoSlot {
            kind: MemoKind::Modify,
            object: MemoObject::Page { page_id, frame, latch },
        });
    }

    /// Iterates memo slots in reverse push order, the order `Command`
    /// releases and flush-list-inserts them in.
    pub(crate) fn memo_iter_rev(&self) -> impl Iterator<Item = (MemoKind, &MemoObject)> {
        self.memo.iter().rev().map(|slot| (slot.kind, &slot.object))
    }

    pub(crate) fn take_log(&mut self) -> BytesMut {
        std::mem::take(&mut self.log)
    }

    pub(crate) fn clear_memo(&mut self) {
        self.memo.clear();
    }

    pub(crate) fn set_state(&mut self, state: MtrState) {
        self.state = state;
    }

    /// Releases the held no-log token (if any) back to its switch. Called
    /// by `Command::commit` once the mtr's redo bytes (or absence thereof)
    /// have been durably accounted for.
    pub(crate) fn release_no_log_hold(&mut self) {
        if let Some(mut hold) = self.no_log_hold.take() {
            if let Some(token) = hold.token.take() {
                hold.switch.unmark_mtr(token);
            }
        }
    }
}

impl Default for Mtr {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mtr {
    fn drop(&mut self) {
        // A correctly used mtr is always committed (or never started)
        // before it goes out of scope; dropping one mid-flight loses its
        // latches silently, which is a caller bug, not a recoverable
        // condition.
        debug_assert!(
            self.state != MtrState::Active,
            "mtr dropped while active: latches were not released"
        );
        // Release-mode safety net: an active no-log token must still be
        // unmarked even if the caller never reached commit, or the
        // logging-enable drain would wait on it forever.
        self.release_no_log_hold();
    }
}
