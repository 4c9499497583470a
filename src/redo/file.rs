//! Minimal file-layer abstraction consumed by the writer thread.
//!
//! The redo subsystem does not know about tablespace layout, raw devices,
//! or datafile sizing — it only needs somewhere durable to put contiguous
//! byte ranges addressed in lsn space, per §6.1.

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::error::Result;

pub trait FileLog: Send + Sync {
    /// Writes `bytes` at `offset` (lsn-space byte offset within the log
    /// file). Callers only ever write whole blocks.
    fn write(&self, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Durability barrier.
    fn fsync(&self) -> Result<()>;

    /// Total capacity, in bytes, of the backing file.
    fn capacity(&self) -> u64;
}

/// A single pre-allocated on-disk log file.
pub struct SingleFileLog {
    file: Mutex<File>,
    capacity: u64,
}

impl SingleFileLog {
    pub fn create(path: &Path, capacity: u64) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(capacity)?;
        Ok(Self {
            file: Mutex::new(file),
            capacity,
        })
    }
}

impl FileLog for SingleFileLog {
    fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn fsync(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }
}

/// In-memory stand-in for tests and benchmarks that do not want real I/O.
pub struct InMemoryLog {
    data: Mutex<Vec<u8>>,
}

impl InMemoryLog {
    pub fn new(capacity: u64) -> Self {
        Self {
            data: Mutex::new(vec![0u8; capacity as usize]),
        }
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl FileLog for InMemoryLog {
    fn write(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        let offset = offset as usize;
        if offset + bytes.len() > data.len() {
            let new_len = offset + bytes.len();
            data.resize(new_len, 0);
        }
        data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn fsync(&self) -> Result<()> {
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.data.lock().len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn single_file_log_writes_at_offset() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("redo.log");
        let log = SingleFileLog::create(&path, 4096).unwrap();
        log.write(512, b"hello").unwrap();
        log.fsync().unwrap();
        let contents = std::fs::read(&path).unwrap();
        assert_eq!(&contents[512..517], b"hello");
    }

    #[test]
    fn in_memory_log_round_trips() {
        let log = InMemoryLog::new(1024);
        log.write(100, b"data").unwrap();
        assert_eq!(&log.snapshot()[100..104], b"data");
    }
}
