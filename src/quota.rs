//! Byte-budget admission control over in-memory content (spec §4.5).

use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::{FsError, FsResult};

/// Tracks bytes currently charged against the instance quota. A `limit` of
/// `-1` (see [`crate::config::QUOTA_UNLIMITED`]) disables all checks.
pub struct QuotaMeter {
    limit: i64,
    used: AtomicI64,
}

impl QuotaMeter {
    pub fn new(limit: i64) -> Self {
        Self { limit, used: AtomicI64::new(0) }
    }

    pub fn used(&self) -> i64 {
        self.used.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Check whether charging `delta` additional bytes (may be negative for
    /// a shrink) would stay within the limit, without committing it.
    fn would_fit(&self, current: i64, delta: i64) -> bool {
        if self.limit < 0 {
            return true;
        }
        if delta <= 0 {
            return true;
        }
        current.saturating_add(delta) <= self.limit
    }

    /// Attempt to charge `delta` bytes (may be negative). Fails with
    /// `QuotaExceeded` and leaves the meter unchanged if the charge would
    /// exceed the limit.
    pub fn try_charge(&self, delta: i64) -> FsResult<()> {
        loop {
            let current = self.used.load(Ordering::Acquire);
            if !self.would_fit(current, delta) {
                return Err(FsError::QuotaExceeded);
            }
            let next = current.saturating_add(delta);
            if self
                .used
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Release bytes unconditionally (e.g. after a delete); never fails.
    pub fn release(&self, amount: i64) {
        self.used.fetch_sub(amount, Ordering::AcqRel);
    }

    /// Force the counter to an absolute value (startup recovery, where the
    /// true total is recomputed from the recovered tree/versions/trash
    /// rather than accumulated incrementally).
    pub fn reset_to(&self, value: i64) {
        self.used.store(value, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_always_fits() {
        let q = QuotaMeter::new(-1);
        q.try_charge(1_000_000).unwrap();
        assert_eq!(q.used(), 1_000_000);
    }

    #[test]
    fn charge_past_limit_fails_and_does_not_mutate() {
        let q = QuotaMeter::new(10);
        q.try_charge(8).unwrap();
        assert_eq!(q.try_charge(5), Err(FsError::QuotaExceeded));
        assert_eq!(q.used(), 8);
    }

    #[test]
    fn release_frees_budget() {
        let q = QuotaMeter::new(10);
        q.try_charge(10).unwrap();
        assert_eq!(q.try_charge(1), Err(FsError::QuotaExceeded));
        q.release(5);
        q.try_charge(1).unwrap();
        assert_eq!(q.used(), 6);
    }
}
