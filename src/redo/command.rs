//! §4.5 — mini-transaction commit orchestration: frames the accumulated
//! log bytes, reserves and writes them, threads dirtied pages onto the
//! flush list, closes the reservation, and releases the memo in reverse
//! acquisition order.

use std::sync::Arc;

use crate::buffer::page_latch::LatchMode;
use crate::memory::buffer_pool::{FlushListEntry, FlushListManager};
use crate::redo::block::{MULTI_REC_END, SINGLE_REC_FLAG};
use crate::redo::mtr::{MemoKind, MemoObject, Mtr, MtrState};
use crate::redo::reservation::LogSys;
use crate::transaction::locks::LockMode;

/// Builds the on-the-wire framed byte sequence for an mtr's accumulated
/// log records: a single record group gets its opcode byte's top bit set
/// (`SINGLE_REC_FLAG`), more than one gets a trailing `MULTI_REC_END`
/// marker instead.
fn frame_log_bytes(mut bytes: Vec<u8>, n_log_recs: u32) -> Vec<u8> {
    if bytes.is_empty() {
        return bytes;
    }
    if n_log_recs <= 1 {
        bytes[0] |= SINGLE_REC_FLAG;
    } else {
        bytes.push(MULTI_REC_END);
    }
    bytes
}

/// Commits `mtr`: writes its redo bytes (if any) through `log`, links
/// dirtied pages into `flush_list`, and releases every latch/lock the memo
/// holds in reverse order. Consumes `mtr` — a committed mtr has no further
/// use.
pub fn commit(mut mtr: Mtr, log: &Arc<LogSys>, flush_list: &FlushListManager) {
    assert_eq!(mtr.state(), MtrState::Active, "commit called on a non-active mtr");
    mtr.set_state(MtrState::Committing);

    let framed = frame_log_bytes(mtr.take_log().to_vec(), mtr.n_log_recs());

    let commit_lsn = if mtr.is_logged() && !framed.is_empty() {
        let handle = log.reserve(framed.len() as u64);
        log.write(handle.start_lsn, &framed);
        // Only the block the record group *crosses into* gets a new
        // first_rec_group marker — a group that starts and stays inside the
        // block it began in leaves that block's marker exactly as a prior
        // commit left it, per `log_buffer_set_first_record_group`.
        let block_size = log.config().block_size as u64;
        if handle.start_lsn / block_size != handle.end_lsn / block_size {
            let offset_in_block = (handle.end_lsn % block_size) as u16;
            log.mark_first_rec_group(handle.end_lsn, offset_in_block);
        }
        log.write_completed(handle.start_lsn, handle.end_lsn);
        Some(handle)
    } else {
        None
    };

    // A no-redo or empty-log mtr's dirtied pages carry no lsn obligation of
    // their own, so they are stamped with 0 — the flush list's sentinel for
    // "not bounding the checkpoint lsn" (see `FlushListManager::
    // min_oldest_modification`), rather than borrowing the current
    // write_lsn and falsely claiming a durability guarantee that was never
    // logged.
    let (dirty_start_lsn, dirty_end_lsn) = match commit_lsn {
        Some(h) => (h.start_lsn, h.end_lsn),
        None => (0, 0),
    };

    // The closed-window wait happens before dirty pages are threaded onto
    // the flush list, not after: a page must never be handed to the flush
    // list for an lsn range `recent_closed` hasn't yet confirmed it has
    // room to record.
    if let Some(handle) = commit_lsn {
        log.wait_for_space_in_recent_closed(handle.start_lsn);
    }

    for (kind, object) in mtr.memo_iter_rev() {
        match (kind, object) {
            (MemoKind::Modify, MemoObject::Page { page_id, frame, .. }) => {
                if frame.note_modification(dirty_start_lsn, dirty_end_lsn) {
                    flush_list.add_page(
                        page_id.tablespace_id,
                        FlushListEntry {
                            page_id: *page_id,
                            frame: Arc::clone(frame),
                        },
                    );
                }
                frame.unpin();
            }
            (MemoKind::PageX, MemoObject::Page { frame, latch, .. }) => {
                latch.release(LatchMode::Exclusive);
                frame.unpin();
            }
            (MemoKind::PageSx, MemoObject::Page { frame, latch, .. }) => {
                latch.release(LatchMode::ShareExclusive);
                frame.unpin();
            }
            (MemoKind::PageS, MemoObject::Page { frame, latch, .. }) => {
                latch.release(LatchMode::Shared);
                frame.unpin();
            }
            (MemoKind::BufFix, MemoObject::Page { frame, .. }) => {
                frame.unpin();
            }
            (MemoKind::SLock, MemoObject::Lock { lock }) => {
                lock.release(LockMode::Shared);
            }
            (MemoKind::SxLock, MemoObject::Lock { lock }) => {
                lock.release(LockMode::ShareExclusive);
            }
            (MemoKind::XLock, MemoObject::Lock { lock }) => {
                lock.release(LockMode::Exclusive);
            }
            _ => unreachable!("memo kind/object mismatch"),
        }
    }
    mtr.clear_memo();

    if let Some(handle) = commit_lsn {
        log.close(handle.start_lsn, handle.end_lsn);
    }

    mtr.release_no_log_hold();
    mtr.commit_lsn = commit_lsn.map(|h| h.end_lsn);
    mtr.set_state(MtrState::Committed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::page_latch::PageLatch;
    use crate::config::RedoConfig;
    use crate::memory::buffer_pool::{BufferFrame, PageId};
    use crate::redo::file::InMemoryLog;

    fn small_config() -> RedoConfig {
        let mut c = RedoConfig::default();
        c.block_size = 64;
        c.block_header_size = 8;
        c.block_trailer_size = 4;
        c.buf_size = 4096;
        c.recent_written_size = 256;
        c.recent_closed_size = 256;
        c
    }

    #[test]
    fn frame_single_record_sets_top_bit() {
        let framed = frame_log_bytes(vec![0x05, 0xAA], 1);
        assert_eq!(framed, vec![0x85, 0xAA]);
    }

    #[test]
    fn frame_multi_record_appends_terminator() {
        let framed = frame_log_bytes(vec![0x01, 0x02, 0x03], 2);
        assert_eq!(framed, vec![0x01, 0x02, 0x03, MULTI_REC_END]);
    }

    #[test]
    fn commit_writes_log_and_releases_latch() {
        let log = LogSys::new(small_config(), Arc::new(InMemoryLog::new(1 << 20)));
        let flush_list = FlushListManager::new();

        let frame = Arc::new(BufferFrame::new(64));
        let latch = Arc::new(PageLatch::new());
        let page_id = PageId::new(3, 7);

        let mut mtr = Mtr::new();
        mtr.start();
        mtr.x_latch_page(page_id, Arc::clone(&frame), Arc::clone(&latch));
        mtr.log_record(&[0x10, 0x20]);
        mtr.mark_modified(page_id, Arc::clone(&frame), Arc::clone(&latch));

        commit(mtr, &log, &flush_list);

        assert!(!latch.is_x_locked());
        assert_eq!(frame.pin_count(), 0);
        assert_eq!(flush_list.dirty_count(), 1);
        assert!(frame.is_dirty());
    }

    #[test]
    fn commit_with_no_redo_still_links_flush_list() {
        let log = LogSys::new(small_config(), Arc::new(InMemoryLog::new(1 << 20)));
        let flush_list = FlushListManager::new();

        let frame = Arc::new(BufferFrame::new(64));
        let latch = Arc::new(PageLatch::new());
        let page_id = PageId::new(9, 1);

        let mut mtr = Mtr::new();
        mtr.start();
        mtr.set_log_mode(crate::redo::mtr::LogMode::NoRedo);
        mtr.x_latch_page(page_id, Arc::clone(&frame), Arc::clone(&latch));
        mtr.mark_modified(page_id, Arc::clone(&frame), Arc::clone(&latch));

        commit(mtr, &log, &flush_list);

        assert_eq!(flush_list.dirty_count(), 1);
    }

    #[test]
    fn first_rec_group_untouched_when_group_stays_in_one_block() {
        let log = LogSys::new(small_config(), Arc::new(InMemoryLog::new(1 << 20)));
        let flush_list = FlushListManager::new();

        for i in 0..2u64 {
            let frame = Arc::new(BufferFrame::new(64));
            let latch = Arc::new(PageLatch::new());
            let page_id = PageId::new(1, i);
            let mut mtr = Mtr::new();
            mtr.start();
            mtr.x_latch_page(page_id, Arc::clone(&frame), Arc::clone(&latch));
            mtr.log_record(&[0x01, i as u8]);
            mtr.mark_modified(page_id, frame, latch);
            commit(mtr, &log, &flush_list);
        }

        let block0 = log.ring.read_at(0, 8);
        assert_eq!(crate::redo::block::BlockHeader::first_rec_group(&block0), 0);
    }

    #[test]
    fn first_rec_group_marks_the_end_block_when_a_group_crosses() {
        let log = LogSys::new(small_config(), Arc::new(InMemoryLog::new(1 << 20)));
        let flush_list = FlushListManager::new();

        // payload_per_block = 64 - 8 - 4 = 52; 60 bytes of a single record
        // group overruns the first block and lands 16 bytes into the next.
        let frame = Arc::new(BufferFrame::new(64));
        let latch = Arc::new(PageLatch::new());
        let page_id = PageId::new(1, 1);
        let mut mtr = Mtr::new();
        mtr.start();
        mtr.x_latch_page(page_id, Arc::clone(&frame), Arc::clone(&latch));
        mtr.log_record(&[0xEE; 60]);
        mtr.mark_modified(page_id, frame, latch);
        commit(mtr, &log, &flush_list);

        let block1 = log.ring.read_at(64, 8);
        assert_eq!(crate::redo::block::BlockHeader::first_rec_group(&block1), 16);
    }

    #[test]
    fn committing_a_switch_marked_mtr_lets_logging_re_enable() {
        use crate::redo::logging_switch::LoggingSwitch;

        let mut switch_config = small_config();
        switch_config.no_log_shard_count = 4;
        switch_config.enable_drain_timeout = std::time::Duration::from_millis(500);
        let switch = Arc::new(LoggingSwitch::new(&switch_config));
        switch.disable(true).unwrap();

        let log = LogSys::new(small_config(), Arc::new(InMemoryLog::new(1 << 20)));
        let flush_list = FlushListManager::new();

        let frame = Arc::new(BufferFrame::new(64));
        let latch = Arc::new(PageLatch::new());
        let page_id = PageId::new(5, 1);

        let mut mtr = Mtr::new();
        mtr.start_with_switch(Arc::clone(&switch), 0);
        assert_eq!(mtr.log_mode(), crate::redo::mtr::LogMode::NoRedo);
        mtr.x_latch_page(page_id, Arc::clone(&frame), Arc::clone(&latch));
        mtr.mark_modified(page_id, frame, latch);

        commit(mtr, &log, &flush_list);

        // The no-log token was released at commit, so enabling logging again
        // does not time out waiting for it to drain.
        assert!(switch.enable(true).is_ok());
    }
}
