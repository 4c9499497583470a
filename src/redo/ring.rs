//! The shared redo ring buffer: a fixed-size byte array addressed by
//! `lsn mod buf_size`, holding framed log blocks. Concurrent writers copy
//! into disjoint `[start_lsn, end_lsn)` ranges; wrap is handled by
//! splitting the copy into at most two contiguous segments.
//!
//! The backing store is `Vec<AtomicU8>` rather than a plain byte buffer so
//! that the copy itself only needs the `RwLock`'s *read* side — every mtr
//! commit's reservation covers a disjoint lsn range, so concurrent byte
//! stores never race each other. The write side of the lock is reserved
//! for `resize`, which replaces the whole backing array.

use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::RwLock;

use crate::config::RedoConfig;

pub struct RedoRing {
    buf: RwLock<Vec<AtomicU8>>,
    block_size: u64,
    header_size: u64,
    trailer_size: u64,
}

fn load_range(buf: &[AtomicU8], off: usize, len: usize) -> Vec<u8> {
    buf[off..off + len].iter().map(|b| b.load(Ordering::Relaxed)).collect()
}

fn store_range(buf: &[AtomicU8], off: usize, data: &[u8]) {
    for (i, &b) in data.iter().enumerate() {
        buf[off + i].store(b, Ordering::Relaxed);
    }
}

impl RedoRing {
    pub fn new(config: &RedoConfig) -> Self {
        Self {
            buf: RwLock::new((0..config.buf_size).map(|_| AtomicU8::new(0)).collect()),
            block_size: config.block_size as u64,
            header_size: config.block_header_size as u64,
            trailer_size: config.block_trailer_size as u64,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.read().len()
    }

    /// Copies `data` into the ring starting at `lsn`, wrapping at the end
    /// of the backing array. Concurrent callers must use disjoint
    /// `[lsn, lsn + data.len())` ranges (guaranteed by the reservation
    /// path handing out non-overlapping lsn spans) — this only takes the
    /// ring's read lock, so those callers proceed concurrently.
    ///
    /// When the copy crosses into a new block, the new block's
    /// `first_rec_group` header field is zeroed, matching the convention
    /// that it is only set once the caller knows the offset of the first
    /// record group starting there.
    pub fn write_at(&self, lsn: u64, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let buf = self.buf.read();
        let buf_len = buf.len() as u64;
        let start_off = (lsn % buf_len) as usize;
        let first_part = (buf.len() - start_off).min(data.len());
        for (i, &b) in data[..first_part].iter().enumerate() {
            buf[start_off + i].store(b, Ordering::Relaxed);
        }
        if first_part < data.len() {
            let remaining = &data[first_part..];
            for (i, &b) in remaining.iter().enumerate() {
                buf[i].store(b, Ordering::Relaxed);
            }
        }
        self.clear_first_rec_group_on_new_blocks(&buf, lsn, data.len() as u64);
    }

    fn clear_first_rec_group_on_new_blocks(&self, buf: &[AtomicU8], start_lsn: u64, len: u64) {
        let buf_len = buf.len() as u64;
        let end_lsn = start_lsn + len;
        let first_block = start_lsn / self.block_size;
        let last_block = (end_lsn.saturating_sub(1)) / self.block_size;
        // Any block boundary strictly crossed by this write (i.e. not the
        // block we started in) begins a fresh block whose header must be
        // re-zeroed for `first_rec_group` before any caller sets it.
        for block_no in (first_block + 1)..=last_block {
            let block_start_lsn = block_no * self.block_size;
            let off = (block_start_lsn % buf_len) as usize;
            if off + self.header_size as usize <= buf.len() {
                let mut header = load_range(buf, off, self.header_size as usize);
                super::block::BlockHeader::set_first_rec_group(&mut header, 0);
                store_range(buf, off, &header);
            }
        }
    }

    /// Sets the `first_rec_group` header field of the block containing
    /// `lsn` to `offset` (the byte offset, within that block, at which a
    /// new record group begins). Called once per mtr commit whose record
    /// group crosses into a new block, for the block the group ends in.
    pub fn set_first_rec_group_at(&self, lsn: u64, offset: u16) {
        let buf = self.buf.read();
        let buf_len = buf.len() as u64;
        let block_no = lsn / self.block_size;
        let block_start_lsn = block_no * self.block_size;
        let off = (block_start_lsn % buf_len) as usize;
        if off + self.header_size as usize <= buf.len() {
            let mut header = load_range(&buf, off, self.header_size as usize);
            super::block::BlockHeader::set_first_rec_group(&mut header, offset);
            store_range(&buf, off, &header);
        }
    }

    /// Stamps the block starting at `block_start_lsn`'s `hdr_no`/`data_len`
    /// fields (and `checkpoint_no`, when the configured header has room for
    /// it) and recomputes its trailer checksum over the block's current
    /// contents. Called by the writer thread just before a block's bytes
    /// are flushed to the file layer. Read-locked, same as the rest of the
    /// fast path — only `resize` needs exclusivity.
    pub fn frame_block(&self, block_start_lsn: u64, hdr_no: u32, data_len: u16) {
        let buf = self.buf.read();
        let buf_len = buf.len() as u64;
        let off = (block_start_lsn % buf_len) as usize;
        if off + self.block_size as usize > buf.len() {
            // Block straddles the ring's physical wrap point; framed on
            // whichever later flush lands once the ring has grown past it.
            return;
        }
        let mut block = load_range(&buf, off, self.block_size as usize);
        let header_size = self.header_size as usize;
        if header_size >= 4 {
            super::block::BlockHeader::set_hdr_no(&mut block, hdr_no);
        }
        if header_size >= 6 {
            super::block::BlockHeader::set_data_len(&mut block, data_len);
        }
        if header_size >= 12 {
            super::block::BlockHeader::set_checkpoint_no(&mut block, 0);
        }
        let trailer_offset = self.block_size as usize - self.trailer_size as usize;
        super::block::write_trailer_checksum(&mut block, trailer_offset, self.trailer_size as usize);
        store_range(&buf, off, &block);
    }

    /// Reads `len` bytes starting at `lsn`, handling wrap.
    pub fn read_at(&self, lsn: u64, len: usize) -> Vec<u8> {
        let buf = self.buf.read();
        let buf_len = buf.len() as u64;
        let start_off = (lsn % buf_len) as usize;
        let mut out = Vec::with_capacity(len);
        let first_part = (buf.len() - start_off).min(len);
        out.extend(buf[start_off..start_off + first_part].iter().map(|b| b.load(Ordering::Relaxed)));
        if first_part < len {
            out.extend(buf[..len - first_part].iter().map(|b| b.load(Ordering::Relaxed)));
        }
        out
    }

    /// Replaces the backing storage with a larger buffer, copying forward
    /// the live tail `[write_lsn, end_lsn)`, re-addressed so that byte
    /// `lsn` still lands at `lsn % new_size` in the new buffer. Caller
    /// must hold both the checkpointer and writer mutexes (see
    /// `reservation::resize`); this is the only operation that takes the
    /// ring's write lock.
    pub fn resize(&self, new_size: usize, write_lsn: u64, end_lsn: u64) {
        let mut buf = self.buf.write();
        let old_len = buf.len() as u64;
        let live_len = (end_lsn - write_lsn) as usize;
        let new_buf: Vec<AtomicU8> = (0..new_size).map(|_| AtomicU8::new(0)).collect();
        if live_len > 0 {
            let old_off = (write_lsn % old_len) as usize;
            let old_first_part = (buf.len() - old_off).min(live_len);
            // Gather the live bytes out of the old ring in lsn order first.
            let mut live = Vec::with_capacity(live_len);
            live.extend(buf[old_off..old_off + old_first_part].iter().map(|b| b.load(Ordering::Relaxed)));
            if old_first_part < live_len {
                live.extend(buf[..live_len - old_first_part].iter().map(|b| b.load(Ordering::Relaxed)));
            }
            // Then place them into the new ring at their lsn-mod-new_size
            // positions, which may themselves wrap.
            let new_off = (write_lsn % new_size as u64) as usize;
            let new_first_part = (new_size - new_off).min(live_len);
            for (i, &b) in live[..new_first_part].iter().enumerate() {
                new_buf[new_off + i].store(b, Ordering::Relaxed);
            }
            if new_first_part < live_len {
                for (i, &b) in live[new_first_part..].iter().enumerate() {
                    new_buf[i].store(b, Ordering::Relaxed);
                }
            }
        }
        *buf = new_buf;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn test_config(buf_size: usize) -> RedoConfig {
        let mut c = RedoConfig::default();
        c.buf_size = buf_size;
        c
    }

    #[test]
    fn write_then_read_round_trips() {
        let ring = RedoRing::new(&test_config(1024));
        ring.write_at(100, b"hello");
        assert_eq!(ring.read_at(100, 5), b"hello");
    }

    #[test]
    fn wraps_at_end_of_buffer() {
        let ring = RedoRing::new(&test_config(16));
        ring.write_at(12, &[1, 2, 3, 4, 5, 6]);
        let read = ring.read_at(12, 6);
        assert_eq!(read, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn resize_preserves_live_tail() {
        let ring = RedoRing::new(&test_config(16));
        ring.write_at(10, &[9, 9, 9, 9, 9, 9]);
        ring.resize(32, 10, 16);
        assert_eq!(ring.len(), 32);
        assert_eq!(ring.read_at(10, 6), vec![9, 9, 9, 9, 9, 9]);
    }

    #[test]
    fn concurrent_disjoint_writes_need_no_exclusive_lock() {
        // Ten threads each own a disjoint 8-byte span; none of them should
        // block on another, since only `resize` takes the write lock.
        let ring = Arc::new(RedoRing::new(&test_config(4096)));
        let mut handles = Vec::new();
        for i in 0..10u64 {
            let ring = Arc::clone(&ring);
            handles.push(thread::spawn(move || {
                ring.write_at(i * 8, &[i as u8; 8]);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        for i in 0..10u64 {
            assert_eq!(ring.read_at(i * 8, 8), vec![i as u8; 8]);
        }
    }

    #[test]
    fn frame_block_stamps_header_and_checksum() {
        let mut config = test_config(512);
        config.block_size = 64;
        config.block_header_size = 12;
        config.block_trailer_size = 4;
        let ring = RedoRing::new(&config);
        ring.write_at(12, &[0xAB; 20]);
        ring.frame_block(0, 3, 20);

        let block = ring.read_at(0, 64);
        assert_eq!(super::super::block::BlockHeader::hdr_no(&block), 3);
        assert_eq!(super::super::block::BlockHeader::data_len(&block), 20);
        assert!(super::super::block::verify_trailer_checksum(&block, 60, 4));
    }
}
