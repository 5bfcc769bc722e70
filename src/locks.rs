//! Boundary lock registry
//!
//! Two consecutive jobs can only overlap on one unit: the last unit of the
//! earlier job and the first unit of the later one. A worker claims such a
//! unit here before touching it and releases it when the [`UnitClaim`] guard
//! drops. Interior units are never registered.
//!
//! The table is striped by unit index. A claim is a single compare-and-swap
//! from [`FREE`] to `unit + 1` on the unit's stripe, so registration and the
//! ownership check cannot race. Two different units sharing a stripe only
//! cost a short wait. A worker holds at most one claim at a time, which keeps
//! the registry deadlock-free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

const FREE: u64 = 0;

/// Spin, then yield, then sleep with a capped exponential step.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;
    const YIELD_LIMIT: u32 = 10;
    const MAX_SLEEP: Duration = Duration::from_micros(500);

    pub fn new() -> Self {
        Self { step: 0 }
    }

    pub fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) {
                std::hint::spin_loop();
            }
        } else if self.step <= Self::YIELD_LIMIT {
            thread::yield_now();
        } else {
            let exp = (self.step - Self::YIELD_LIMIT).min(9);
            thread::sleep(Duration::from_micros(1u64 << exp).min(Self::MAX_SLEEP));
        }
        self.step = self.step.saturating_add(1);
    }
}

/// Session-owned table of units currently being touched at a job boundary.
#[derive(Debug)]
pub struct BoundaryLocks {
    slots: Box<[AtomicU64]>,
}

impl BoundaryLocks {
    /// A registry for `workers` concurrent claimants.
    pub fn new(workers: usize) -> Self {
        let len = (workers.max(1) * 2).next_power_of_two();
        Self { slots: (0..len).map(|_| AtomicU64::new(FREE)).collect() }
    }

    fn slot(&self, unit: u64) -> &AtomicU64 {
        &self.slots[(unit as usize) & (self.slots.len() - 1)]
    }

    /// Try once to take ownership of `unit`.
    pub fn try_claim(&self, unit: u64) -> Option<UnitClaim<'_>> {
        let tag = unit.checked_add(1).expect("unit index overflow");
        let slot = self.slot(unit);
        slot.compare_exchange(FREE, tag, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| UnitClaim { slot, unit })
    }

    /// Take ownership of `unit`, waiting for the current owner if any.
    pub fn claim(&self, unit: u64) -> UnitClaim<'_> {
        let mut backoff = Backoff::new();
        loop {
            if let Some(claim) = self.try_claim(unit) {
                return claim;
            }
            backoff.snooze();
        }
    }

    #[cfg(test)]
    fn is_claimed(&self, unit: u64) -> bool {
        self.slot(unit).load(Ordering::Acquire) == unit + 1
    }
}

/// Exclusive access to one boundary unit; released on drop.
#[derive(Debug)]
pub struct UnitClaim<'a> {
    slot: &'a AtomicU64,
    unit: u64,
}

impl Drop for UnitClaim<'_> {
    fn drop(&mut self) {
        let released = self.slot.swap(FREE, Ordering::AcqRel);
        debug_assert_eq!(released, self.unit + 1, "boundary slot lost its owner");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_claim_is_exclusive() {
        let locks = BoundaryLocks::new(2);
        let first = locks.try_claim(7).unwrap();
        assert!(locks.is_claimed(7));
        assert!(locks.try_claim(7).is_none());
        drop(first);
        assert!(!locks.is_claimed(7));
        assert!(locks.try_claim(7).is_some());
    }

    #[test]
    fn test_table_sized_to_workers() {
        assert_eq!(BoundaryLocks::new(0).slots.len(), 2);
        assert_eq!(BoundaryLocks::new(3).slots.len(), 8);
    }

    #[test]
    fn test_contended_claims_serialize() {
        let locks = Arc::new(BoundaryLocks::new(4));
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let _claim = locks.claim(42);
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        std::hint::spin_loop();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!locks.is_claimed(42));
    }
}
