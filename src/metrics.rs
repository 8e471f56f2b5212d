//! Per-operation counters (spec §4.14).

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// The operations individually tracked by [`Metrics`].
pub const TRACKED_OPS: &[&str] = &[
    "createFile",
    "createDir",
    "delete",
    "readDir",
    "stat",
    "open",
    "readAll",
    "writeAll",
    "copy",
    "move",
    "mount",
    "unmount",
    "sync",
    "setPermissions",
];

struct OpCounters {
    count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    total_time_ms: AtomicU64,
    max_time_ms: AtomicU64,
}

impl OpCounters {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_time_ms: AtomicU64::new(0),
            max_time_ms: AtomicU64::new(0),
        }
    }
}

/// A point-in-time read of one operation's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpSnapshot {
    pub count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_time_ms: u64,
    pub max_time_ms: u64,
}

/// Per-operation counters plus total bytes moved (spec §4.14).
pub struct Metrics {
    ops: DashMap<&'static str, OpCounters>,
    total_bytes_read: AtomicU64,
    total_bytes_written: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        let ops = DashMap::new();
        for name in TRACKED_OPS {
            ops.insert(*name, OpCounters::new());
        }
        Self { ops, total_bytes_read: AtomicU64::new(0), total_bytes_written: AtomicU64::new(0) }
    }

    /// Record one call to `op`, its success/failure, and its duration.
    pub fn record(&self, op: &'static str, succeeded: bool, elapsed_ms: u64) {
        let Some(counters) = self.ops.get(op) else { return };
        counters.count.fetch_add(1, Ordering::Relaxed);
        if succeeded {
            counters.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        counters.total_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        counters.max_time_ms.fetch_max(elapsed_ms, Ordering::Relaxed);
    }

    pub fn add_bytes_read(&self, n: u64) {
        self.total_bytes_read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_written(&self, n: u64) {
        self.total_bytes_written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read.load(Ordering::Relaxed)
    }

    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, op: &str) -> Option<OpSnapshot> {
        self.ops.get(op).map(|c| OpSnapshot {
            count: c.count.load(Ordering::Relaxed),
            success_count: c.success_count.load(Ordering::Relaxed),
            failure_count: c.failure_count.load(Ordering::Relaxed),
            total_time_ms: c.total_time_ms.load(Ordering::Relaxed),
            max_time_ms: c.max_time_ms.load(Ordering::Relaxed),
        })
    }

    /// Zero every counter (op counters and byte totals alike).
    pub fn reset(&self) {
        for entry in self.ops.iter() {
            entry.count.store(0, Ordering::Relaxed);
            entry.success_count.store(0, Ordering::Relaxed);
            entry.failure_count.store(0, Ordering::Relaxed);
            entry.total_time_ms.store(0, Ordering::Relaxed);
            entry.max_time_ms.store(0, Ordering::Relaxed);
        }
        self.total_bytes_read.store(0, Ordering::Relaxed);
        self.total_bytes_written.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_accumulates_counts_and_max_time() {
        let metrics = Metrics::new();
        metrics.record("stat", true, 5);
        metrics.record("stat", false, 12);
        let snap = metrics.snapshot("stat").unwrap();
        assert_eq!(snap.count, 2);
        assert_eq!(snap.success_count, 1);
        assert_eq!(snap.failure_count, 1);
        assert_eq!(snap.total_time_ms, 17);
        assert_eq!(snap.max_time_ms, 12);
    }

    #[test]
    fn reset_zeroes_everything() {
        let metrics = Metrics::new();
        metrics.record("readAll", true, 3);
        metrics.add_bytes_read(100);
        metrics.reset();
        assert_eq!(metrics.snapshot("readAll").unwrap().count, 0);
        assert_eq!(metrics.total_bytes_read(), 0);
    }

    #[test]
    fn unknown_op_returns_none() {
        let metrics = Metrics::new();
        assert!(metrics.snapshot("nonexistent").is_none());
    }
}
