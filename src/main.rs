// Demo binary exercising the redo-log-buffer and mini-transaction path
// end to end against an in-memory log file.

use std::sync::Arc;

use tracing::info;

use redo_mtr::buffer::PageLatch;
use redo_mtr::config::RedoConfig;
use redo_mtr::memory::buffer_pool::{BufferFrame, FlushListManager, PageId};
use redo_mtr::redo::file::InMemoryLog;
use redo_mtr::redo::{commit, CloserThread, LogSys, Mtr, WriterThread};

fn main() {
    tracing_subscriber::fmt().with_target(false).with_level(true).init();

    let config = RedoConfig::default();
    let file = Arc::new(InMemoryLog::new(64 * 1024 * 1024));
    let log = LogSys::new(config, file);
    let flush_list = FlushListManager::new();

    let writer = WriterThread::start(Arc::clone(&log));
    let closer = CloserThread::start(Arc::clone(&log));

    info!("running 1000 mini-transactions against the in-memory redo log");
    for i in 0..1000u64 {
        let frame = Arc::new(BufferFrame::new(16 * 1024));
        let latch = Arc::new(PageLatch::new());
        let page_id = PageId::new(0, i);

        let mut mtr = Mtr::new();
        mtr.start();
        mtr.x_latch_page(page_id, Arc::clone(&frame), Arc::clone(&latch));
        mtr.log_record(&[0x01, (i % 256) as u8, ((i >> 8) % 256) as u8]);
        mtr.mark_modified(page_id, frame, latch);

        commit(mtr, &log, &flush_list);
    }

    info!(
        write_lsn = log.write_lsn(),
        dirty_pages = flush_list.dirty_count(),
        "finished; shutting down background threads"
    );

    writer.stop();
    closer.stop();
}
