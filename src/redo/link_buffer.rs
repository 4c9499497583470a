//! Lock-free link buffers: `recent_written` and `recent_closed`.
//!
//! Each is a fixed-size ring of `AtomicU64` slots indexed by `lsn mod N`.
//! A producer that just finished writing bytes in `[from, to)` calls
//! `add_link(from, to)`; a single consumer thread walks the chain from a
//! monotonic tail via `advance_tail`/`advance_tail_until`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::utils::Backoff;

/// Sentinel meaning "this slot has not been written yet".
const EMPTY: u64 = 0;

pub struct LinkBuffer {
    slots: Vec<AtomicU64>,
    capacity: u64,
    tail: AtomicU64,
}

impl LinkBuffer {
    pub fn new(capacity: usize, initial_tail: u64) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || AtomicU64::new(EMPTY));
        Self {
            slots,
            capacity: capacity as u64,
            tail: AtomicU64::new(initial_tail),
        }
    }

    fn slot_index(&self, lsn: u64) -> usize {
        (lsn % self.capacity) as usize
    }

    /// Current contiguous tail: every byte below this lsn has a completed,
    /// consumed link.
    pub fn tail(&self) -> u64 {
        self.tail.load(Ordering::Acquire)
    }

    /// `lsn - tail <= capacity`, i.e. a reservation ending at `lsn` still
    /// fits in the window.
    pub fn has_space(&self, lsn: u64) -> bool {
        lsn.saturating_sub(self.tail()) <= self.capacity
    }

    /// Block (spin, then sleep) until `has_space(lsn)` holds.
    pub fn wait_for_space(&self, lsn: u64) {
        let backoff = Backoff::new();
        while !self.has_space(lsn) {
            if backoff.is_completed() {
                std::thread::sleep(Duration::from_micros(50));
            } else {
                backoff.snooze();
            }
        }
    }

    /// Record that bytes `[from, to)` are complete. `from` must not yet be
    /// covered by the tail (`from >= tail()`); blocks until there is room
    /// in the ring for this link.
    pub fn add_link(&self, from: u64, to: u64) {
        debug_assert!(to > from);
        self.wait_for_space(to);
        let idx = self.slot_index(from);
        // Release: the bytes this link covers must be visible to whatever
        // thread observes this store via `advance_tail`'s Acquire load.
        self.slots[idx].store(to, Ordering::Release);
    }

    /// Walk the chain from the current tail while `stop_fn(prev, next)`
    /// returns `false`. Returns the number of links consumed.
    pub fn advance_tail_until(&self, mut stop_fn: impl FnMut(u64, u64) -> bool) -> usize {
        let mut consumed = 0;
        loop {
            let prev = self.tail.load(Ordering::Acquire);
            let idx = self.slot_index(prev);
            let next = self.slots[idx].load(Ordering::Acquire);
            if next == EMPTY || next <= prev {
                break;
            }
            self.slots[idx].store(EMPTY, Ordering::Relaxed);
            self.tail.store(next, Ordering::Release);
            consumed += 1;
            if stop_fn(prev, next) {
                break;
            }
        }
        consumed
    }

    /// Walk the entire contiguous chain currently available.
    pub fn advance_tail(&self) -> usize {
        self.advance_tail_until(|_, _| false)
    }
}
