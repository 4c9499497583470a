//! §4.7 — the closer thread: walks `recent_closed`, advancing
//! `buf_dirty_pages_added_up_to_lsn`, and wakes anyone waiting on flush-list
//! or exclusive-gate drain progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::redo::reservation::LogSys;

pub struct CloserThread {
    log: Arc<LogSys>,
    running: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl CloserThread {
    pub fn start(log: Arc<LogSys>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let thread_log = Arc::clone(&log);
        let handle = std::thread::spawn(move || closer_loop(thread_log, thread_running));
        Self {
            log,
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        self.log.kick_closer();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn closer_loop(log: Arc<LogSys>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Acquire) {
        let advanced = log.recent_closed.advance_tail();
        if advanced > 0 {
            debug!(
                buf_dirty_pages_added_up_to_lsn = log.buf_dirty_pages_added_up_to_lsn(),
                "closer advanced tail"
            );
        } else {
            let (m, cv) = &log.closer_signal;
            let mut guard = m.lock();
            cv.wait_for(&mut guard, Duration::from_millis(5));
        }
    }
}
