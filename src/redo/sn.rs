//! Translation between data sequence numbers (`sn`, payload-only) and log
//! sequence numbers (`lsn`, which also counts block header/trailer bytes),
//! plus the shared/exclusive gate embedded in the `sn` counter itself.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex};

/// Top bit of the `sn` atomic marks an in-progress exclusive hold.
pub const SN_LOCKED: u64 = 1 << 63;

/// `lsn = (sn / d) * b + (sn % d) + h`, where `d = b - h - t`.
pub fn translate_sn_to_lsn(sn: u64, block_size: u64, header_size: u64, payload: u64) -> u64 {
    (sn / payload) * block_size + (sn % payload) + header_size
}

/// Inverse of [`translate_sn_to_lsn`].
pub fn translate_lsn_to_sn(lsn: u64, block_size: u64, header_size: u64, payload: u64) -> u64 {
    let block_no = lsn / block_size;
    let offset_in_block = lsn % block_size;
    block_no * payload + (offset_in_block - header_size)
}

/// Shared/exclusive gate multiplexed onto the `sn` counter's top bit.
///
/// Ordinary reservations take a cheap shared lease via `fetch_add`. Resize
/// and last-block-snapshot operations take the exclusive path, which blocks
/// new leases and waits for in-flight ones to close.
pub struct SnGate {
    sn: AtomicU64,
    sn_locked: AtomicU64,
    exclusive: Mutex<()>,
    drained: Condvar,
}

impl SnGate {
    pub fn new(initial_sn: u64) -> Self {
        Self {
            sn: AtomicU64::new(initial_sn),
            sn_locked: AtomicU64::new(0),
            exclusive: Mutex::new(()),
            drained: Condvar::new(),
        }
    }

    pub fn current(&self) -> u64 {
        self.sn.load(Ordering::Acquire) & !SN_LOCKED
    }

    /// Reserve `len` sn units under a shared lease. Blocks (briefly) if an
    /// exclusive holder currently owns the gate.
    pub fn shared_reserve(&self, len: u64) -> u64 {
        let backoff = Backoff::new();
        loop {
            let start = self.sn.fetch_add(len, Ordering::AcqRel);
            if start & SN_LOCKED == 0 {
                return start;
            }
            // Undo: we raced an exclusive holder. Back the counter out and
            // wait for the lock to clear before retrying.
            self.sn.fetch_sub(len, Ordering::AcqRel);
            backoff.snooze();
        }
    }

    /// Take the exclusive hold. `drained` is polled by the caller (via
    /// `wait_until_drained`) to find out when all shared leases taken before
    /// the hold have closed.
    pub fn exclusive_enter(&self) -> SnGateExclusiveGuard<'_> {
        let _mutex_guard = self.exclusive.lock();
        let prev = self.sn.fetch_or(SN_LOCKED, Ordering::AcqRel);
        self.sn_locked.store(prev & !SN_LOCKED, Ordering::Release);
        SnGateExclusiveGuard { gate: self }
    }

    /// Block until every shared lease outstanding at the moment the
    /// exclusive hold began has reported completion via `progress_fn`
    /// reaching the locked snapshot.
    pub fn wait_until_drained(&self, mut progress_fn: impl FnMut() -> u64) {
        let target = self.sn_locked.load(Ordering::Acquire);
        let backoff = Backoff::new();
        while progress_fn() < target {
            if backoff.is_completed() {
                std::thread::sleep(Duration::from_micros(50));
            } else {
                backoff.snooze();
            }
        }
    }
}

pub struct SnGateExclusiveGuard<'a> {
    gate: &'a SnGate,
}

impl Drop for SnGateExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.gate.sn.fetch_and(!SN_LOCKED, Ordering::AcqRel);
        self.gate.drained.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const B: u64 = 512;
    const H: u64 = 12;
    const T: u64 = 4;
    const D: u64 = B - H - T;

    #[test]
    fn sn_lsn_round_trip() {
        for sn in [0u64, 1, 100, D - 1, D, D + 1, 10 * D + 37] {
            let lsn = translate_sn_to_lsn(sn, B, H, D);
            let back = translate_lsn_to_sn(lsn, B, H, D);
            assert_eq!(sn, back, "round trip failed for sn={sn}");
        }
    }

    #[test]
    fn lsn_never_lands_in_header_or_trailer() {
        for sn in 0..5000u64 {
            let lsn = translate_sn_to_lsn(sn, B, H, D);
            let offset = lsn % B;
            assert!(offset >= H && offset < H + D, "sn={sn} lsn={lsn} offset={offset}");
        }
    }

    #[test]
    fn shared_reserve_is_monotonic() {
        let gate = SnGate::new(0);
        let a = gate.shared_reserve(10);
        let b = gate.shared_reserve(10);
        assert_eq!(a, 0);
        assert_eq!(b, 10);
    }

    #[test]
    fn exclusive_excludes_new_shared_reservations_bit() {
        let gate = SnGate::new(0);
        gate.shared_reserve(5);
        let guard = gate.exclusive_enter();
        assert_ne!(gate.sn.load(Ordering::Acquire) & SN_LOCKED, 0);
        drop(guard);
        assert_eq!(gate.sn.load(Ordering::Acquire) & SN_LOCKED, 0);
    }
}
