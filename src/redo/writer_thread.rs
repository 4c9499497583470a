//! §4.6 — the writer thread: walks `recent_written`, copies newly
//! contiguous ring bytes out to the file layer, and advances `write_lsn`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::redo::reservation::LogSys;

pub struct WriterThread {
    log: Arc<LogSys>,
    running: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl WriterThread {
    pub fn start(log: Arc<LogSys>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let thread_log = Arc::clone(&log);
        let handle = std::thread::spawn(move || writer_loop(thread_log, thread_running));
        Self {
            log,
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        self.log.kick_writer();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn writer_loop(log: Arc<LogSys>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Acquire) {
        let advanced = log
            .recent_written
            .advance_tail_until(|prev, next| next.saturating_sub(prev) >= log.config.write_max_size as u64);

        let target = log.buf_ready_for_write_lsn();
        let write_lsn = log.write_lsn();
        if target > write_lsn {
            flush_range(&log, write_lsn, target);
            log.write_lsn.store(target, Ordering::Release);
            log.recompute_buf_limit();
            debug!(write_lsn = target, "writer advanced write_lsn");
        }

        if advanced == 0 {
            let (m, cv) = &log.writer_signal;
            let mut guard = m.lock();
            cv.wait_for(&mut guard, Duration::from_millis(5));
        }
    }
}

fn flush_range(log: &LogSys, from: u64, to: u64) {
    if to <= from {
        return;
    }
    // Re-stamp framing for every block `[from, to)` touches, then flush
    // from that first block's own start — its header may have been
    // written to the file already with a now-stale `data_len`/checksum
    // from an earlier, smaller flush of the same (still-filling) block.
    log.frame_blocks_for_flush(from, to);
    let block_size = log.config.block_size as u64;
    let flush_start = (from / block_size) * block_size;
    let len = (to - flush_start) as usize;
    let bytes = log.ring.read_at(flush_start, len);
    let _ = log.file.write(flush_start, &bytes);
}
