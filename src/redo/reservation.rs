//! The reservation and write path: `reserve` → `write` → `write_completed`
//! → `wait_for_space_in_recent_closed` → `close`, plus the automatic ring
//! resize triggered by an oversize reservation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex};
use tracing::info;

use crate::config::RedoConfig;
use crate::redo::file::FileLog;
use crate::redo::link_buffer::LinkBuffer;
use crate::redo::ring::RedoRing;
use crate::redo::sn::{translate_lsn_to_sn, translate_sn_to_lsn, SnGate};

/// A reserved, not-yet-closed byte range in lsn space.
#[derive(Debug, Clone, Copy)]
pub struct Handle {
    pub start_lsn: u64,
    pub end_lsn: u64,
}

/// Shared state for the redo-log-buffer subsystem: the ring, the two link
/// buffers, the sn-gate, and the watermarks the writer/closer threads
/// advance.
pub struct LogSys {
    pub(crate) config: RedoConfig,
    pub(crate) sn_gate: SnGate,
    pub(crate) ring: RedoRing,
    pub(crate) recent_written: LinkBuffer,
    pub(crate) recent_closed: LinkBuffer,
    pub(crate) write_lsn: AtomicU64,
    pub(crate) buf_limit_sn: AtomicU64,
    pub(crate) file: Arc<dyn FileLog>,
    pub(crate) checkpointer_mutex: Mutex<()>,
    pub(crate) writer_mutex: Mutex<()>,
    pub(crate) writer_signal: (Mutex<()>, Condvar),
    pub(crate) closer_signal: (Mutex<()>, Condvar),
}

impl LogSys {
    pub fn new(config: RedoConfig, file: Arc<dyn FileLog>) -> Arc<Self> {
        let header_size = config.block_header_size as u64;
        let initial_lsn = header_size;
        let initial_sn = 0u64;
        let buf_size = config.buf_size;
        let buf_size_sn = Self::lsn_span_to_sn(&config, buf_size as u64);
        let recent_written = config.recent_written_size;
        let recent_closed = config.recent_closed_size;

        Arc::new(Self {
            sn_gate: SnGate::new(initial_sn),
            ring: RedoRing::new(&config),
            recent_written: LinkBuffer::new(recent_written, initial_lsn),
            recent_closed: LinkBuffer::new(recent_closed, initial_lsn),
            write_lsn: AtomicU64::new(initial_lsn),
            buf_limit_sn: AtomicU64::new(initial_sn + buf_size_sn.saturating_sub(2 * config.block_size as u64)),
            file,
            checkpointer_mutex: Mutex::new(()),
            writer_mutex: Mutex::new(()),
            writer_signal: (Mutex::new(()), Condvar::new()),
            closer_signal: (Mutex::new(()), Condvar::new()),
            config,
        })
    }

    fn sn_to_lsn(&self, sn: u64) -> u64 {
        translate_sn_to_lsn(
            sn,
            self.config.block_size as u64,
            self.config.block_header_size as u64,
            self.config.payload_per_block() as u64,
        )
    }

    fn lsn_to_sn(&self, lsn: u64) -> u64 {
        translate_lsn_to_sn(
            lsn,
            self.config.block_size as u64,
            self.config.block_header_size as u64,
            self.config.payload_per_block() as u64,
        )
    }

    fn lsn_span_to_sn(config: &RedoConfig, lsn_span: u64) -> u64 {
        lsn_span / config.block_size as u64 * config.payload_per_block() as u64
    }

    pub fn write_lsn(&self) -> u64 {
        self.write_lsn.load(Ordering::Acquire)
    }

    pub fn buf_ready_for_write_lsn(&self) -> u64 {
        self.recent_written.tail()
    }

    pub fn buf_dirty_pages_added_up_to_lsn(&self) -> u64 {
        self.recent_closed.tail()
    }

    /// Reserve `len` payload bytes, translating to an lsn range and
    /// blocking for ring space if necessary (possibly resizing the ring
    /// for an oversize reservation).
    pub fn reserve(&self, len: u64) -> Handle {
        let start_sn = self.sn_gate.shared_reserve(len);
        let end_sn = start_sn + len;
        let start_lsn = self.sn_to_lsn(start_sn);
        let end_lsn = self.sn_to_lsn(end_sn);

        if end_sn > self.buf_limit_sn.load(Ordering::Acquire) {
            self.wait_for_space_after_reserving(start_lsn, end_lsn, len);
        }

        Handle { start_lsn, end_lsn }
    }

    fn wait_for_space_after_reserving(&self, start_lsn: u64, end_lsn: u64, len: u64) {
        let buf_size_sn = Self::lsn_span_to_sn(&self.config, self.ring.len() as u64);
        if len > buf_size_sn {
            self.resize_to_fit(len);
        }

        let block_size = self.config.block_size as u64;
        let backoff = Backoff::new();
        loop {
            let write_lsn = self.write_lsn();
            let buf_len = self.ring.len() as u64;
            if end_lsn + block_size <= write_lsn + buf_len {
                break;
            }
            self.kick_writer();
            if backoff.is_completed() {
                std::thread::sleep(Duration::from_micros(100));
            } else {
                backoff.snooze();
            }
        }
        let _ = start_lsn;
    }

    /// Grows the ring to at least `~1.382 * len` (rounded up to block
    /// size), under both the checkpointer and writer mutexes.
    fn resize_to_fit(&self, len_sn: u64) {
        let _checkpointer = self.checkpointer_mutex.lock();
        let _writer = self.writer_mutex.lock();

        let block_size = self.config.block_size as u64;
        let needed_lsn_span = self.sn_to_lsn(len_sn) - self.config.block_header_size as u64;
        let mut new_size = ((needed_lsn_span as f64 * 1.382).ceil() as u64).max(block_size);
        new_size = ((new_size + block_size - 1) / block_size) * block_size;

        if (new_size as usize) <= self.ring.len() {
            return;
        }

        let write_lsn = self.write_lsn();
        let end_lsn = self.sn_to_lsn(self.sn_gate.current());
        self.ring.resize(new_size as usize, write_lsn, end_lsn);
        info!(new_size, "redo ring buffer resized");
    }

    /// Copies `bytes` into the ring at `lsn`.
    pub fn write(&self, lsn: u64, bytes: &[u8]) {
        self.ring.write_at(lsn, bytes);
    }

    /// Marks the start of a record group at `lsn`, within the block that
    /// contains it. `offset` is the byte offset of the group's first byte
    /// relative to that block's payload start.
    pub fn mark_first_rec_group(&self, lsn: u64, offset: u16) {
        self.ring.set_first_rec_group_at(lsn, offset);
    }

    pub fn config(&self) -> &RedoConfig {
        &self.config
    }

    /// Stamps `hdr_no`/`data_len`/`checkpoint_no`/trailer-checksum framing
    /// for every block touched by newly-visible bytes in `[from, to)`,
    /// covering from the start of the block `from` falls in so a block's
    /// already-flushed header gets re-stamped if more payload has since
    /// landed in it. Called by the writer thread immediately before it
    /// copies the same range out to the file layer.
    pub(crate) fn frame_blocks_for_flush(&self, from: u64, to: u64) {
        if to <= from {
            return;
        }
        let block_size = self.config.block_size as u64;
        let header_size = self.config.block_header_size as u64;
        let payload = self.config.payload_per_block() as u64;
        let first_block = from / block_size;
        let last_block = (to - 1) / block_size;
        for block_no in first_block..=last_block {
            let block_start = block_no * block_size;
            let payload_start = block_start + header_size;
            let payload_end = payload_start + payload;
            let valid_end = to.min(payload_end);
            let data_len = valid_end.saturating_sub(payload_start) as u16;
            self.ring.frame_block(block_start, block_no as u32, data_len);
        }
    }

    /// Publishes completion of the byte range `[start, end)` to
    /// `recent_written`, waking the writer thread.
    pub fn write_completed(&self, start: u64, end: u64) {
        self.recent_written.add_link(start, end);
        self.kick_writer();
    }

    /// Blocks until `recent_closed` has room for a link ending at
    /// `start_lsn` of this reservation (keyed on start, not end — see
    /// design notes on this choice).
    pub fn wait_for_space_in_recent_closed(&self, start_lsn: u64) {
        if self.recent_closed.has_space(start_lsn) {
            return;
        }
        self.kick_closer();
        self.recent_closed.wait_for_space(start_lsn);
    }

    /// Registers the byte range `[start, end)` as closed (dirty pages for
    /// it have been added to flush lists), waking the closer thread.
    pub fn close(&self, start: u64, end: u64) {
        self.recent_closed.add_link(start, end);
        self.kick_closer();
    }

    pub fn kick_writer(&self) {
        let (_m, cv) = &self.writer_signal;
        cv.notify_all();
    }

    pub fn kick_closer(&self) {
        let (_m, cv) = &self.closer_signal;
        cv.notify_all();
    }

    pub fn recompute_buf_limit(&self) {
        let write_lsn = self.write_lsn();
        let buf_size_sn = Self::lsn_span_to_sn(&self.config, self.ring.len() as u64);
        let write_sn = self.lsn_to_sn(write_lsn);
        let margin_sn = Self::lsn_span_to_sn(&self.config, 2 * self.config.block_size as u64);
        self.buf_limit_sn
            .store(write_sn + buf_size_sn.saturating_sub(margin_sn), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn reserve_is_monotonic() {
        let log = LogSys::new(small_config(), Arc::new(InMemoryLog::new(1 << 20)));
        let a = log.reserve(10);
        let b = log.reserve(10);
        assert!(b.start_lsn > a.start_lsn);
    }

    #[test]
    fn write_then_write_completed_advances_tail() {
        let log = LogSys::new(small_config(), Arc::new(InMemoryLog::new(1 << 20)));
        let h = log.reserve(10);
        log.write(h.start_lsn, &[1u8; 10]);
        log.write_completed(h.start_lsn, h.end_lsn);
        log.recent_written.advance_tail();
        assert_eq!(log.buf_ready_for_write_lsn(), h.end_lsn);
    }

    #[test]
    fn close_advances_recent_closed_tail() {
        let log = LogSys::new(small_config(), Arc::new(InMemoryLog::new(1 << 20)));
        let h = log.reserve(10);
        log.close(h.start_lsn, h.end_lsn);
        log.recent_closed.advance_tail();
        assert_eq!(log.buf_dirty_pages_added_up_to_lsn(), h.end_lsn);
    }
}
