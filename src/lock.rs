//! Per-file advisory flock-style locking (spec §4.3).

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::error::{FsError, FsResult};
use crate::handle::HandleId;

/// Lock type requested by a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Current grant state of a file's lock.
enum Grant {
    None,
    Shared(HashSet<HandleId>),
    Exclusive(HandleId),
}

struct Waiter {
    handle: HandleId,
    mode: LockMode,
    notify: Arc<Notify>,
    granted: Arc<AtomicBool>,
}

struct Inner {
    grant: Grant,
    waiters: VecDeque<Waiter>,
}

impl Inner {
    fn new() -> Self {
        Self { grant: Grant::None, waiters: VecDeque::new() }
    }

    /// Attempt to grant `mode` to `handle` immediately against the current
    /// state (spec §4.3's `tryLock` predicate). Mutates `self.grant` on
    /// success.
    fn try_grant(&mut self, handle: HandleId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => match &mut self.grant {
                Grant::None => {
                    self.grant = Grant::Shared(HashSet::from([handle]));
                    true
                }
                Grant::Shared(holders) => {
                    holders.insert(handle);
                    true
                }
                Grant::Exclusive(h) => *h == handle,
            },
            LockMode::Exclusive => match &self.grant {
                Grant::None => {
                    self.grant = Grant::Exclusive(handle);
                    true
                }
                Grant::Shared(holders) if holders.len() == 1 && holders.contains(&handle) => {
                    self.grant = Grant::Exclusive(handle);
                    true
                }
                Grant::Exclusive(h) if *h == handle => true,
                _ => false,
            },
        }
    }

    fn release(&mut self, handle: HandleId) -> bool {
        match &mut self.grant {
            Grant::Shared(holders) => {
                let removed = holders.remove(&handle);
                if holders.is_empty() {
                    self.grant = Grant::None;
                }
                removed
            }
            Grant::Exclusive(h) if *h == handle => {
                self.grant = Grant::None;
                true
            }
            _ => false,
        }
    }

    /// Wake FIFO waiters after a release: grant every compatible SHARED
    /// waiter at the front, stopping at (and, if grantable, including) the
    /// first EXCLUSIVE waiter.
    fn wake_waiters(&mut self) {
        loop {
            let Some(front) = self.waiters.front() else { break };
            let grantable = match front.mode {
                LockMode::Shared => !matches!(self.grant, Grant::Exclusive(_)),
                LockMode::Exclusive => matches!(self.grant, Grant::None),
            };
            if !grantable {
                break;
            }
            let waiter = self.waiters.pop_front().expect("front checked above");
            let mode = waiter.mode;
            match mode {
                LockMode::Shared => match &mut self.grant {
                    Grant::None => self.grant = Grant::Shared(HashSet::from([waiter.handle])),
                    Grant::Shared(holders) => {
                        holders.insert(waiter.handle);
                    }
                    Grant::Exclusive(_) => unreachable!("grantable check excludes this"),
                },
                LockMode::Exclusive => self.grant = Grant::Exclusive(waiter.handle),
            }
            waiter.granted.store(true, Ordering::Release);
            waiter.notify.notify_one();
            if mode == LockMode::Exclusive {
                break;
            }
        }
    }
}

/// Removes a still-queued waiter on cancellation (spec §5: "awaiting a
/// lock is cancellable and removes the waiter from the queue").
struct WaitGuard {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
    granted: Arc<AtomicBool>,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if self.granted.load(Ordering::Acquire) {
            return;
        }
        let mut inner = self.inner.lock().expect("lock table mutex poisoned");
        inner.waiters.retain(|w| !Arc::ptr_eq(&w.notify, &self.notify));
    }
}

/// Per-path advisory lock table (spec §4.3).
pub struct LockTable {
    files: DashMap<String, Arc<Mutex<Inner>>>,
    holdings: DashMap<HandleId, HashSet<String>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self { files: DashMap::new(), holdings: DashMap::new() }
    }

    fn entry(&self, path: &str) -> Arc<Mutex<Inner>> {
        self.files.entry(path.to_string()).or_insert_with(|| Arc::new(Mutex::new(Inner::new()))).clone()
    }

    fn record_holding(&self, handle: HandleId, path: &str) {
        self.holdings.entry(handle).or_default().insert(path.to_string());
    }

    fn forget_holding(&self, handle: HandleId, path: &str) {
        if let Some(mut set) = self.holdings.get_mut(&handle) {
            set.remove(path);
        }
    }

    /// Non-blocking acquisition attempt (spec §4.3 `tryLock`).
    pub fn try_lock(&self, path: &str, handle: HandleId, mode: LockMode) -> FsResult<()> {
        let arc = self.entry(path);
        let granted = {
            let mut inner = arc.lock().expect("lock table mutex poisoned");
            inner.try_grant(handle, mode)
        };
        if granted {
            self.record_holding(handle, path);
            Ok(())
        } else {
            Err(FsError::Locked)
        }
    }

    /// Blocking acquisition: suspends on a FIFO waiter queue until the
    /// predicate becomes true (spec §4.3 `lock`). Cancel-safe: dropping
    /// this future before it resolves removes the queued waiter.
    pub async fn lock(&self, path: &str, handle: HandleId, mode: LockMode) {
        let arc = self.entry(path);
        loop {
            let (notify, granted_flag) = {
                let mut inner = arc.lock().expect("lock table mutex poisoned");
                if inner.try_grant(handle, mode) {
                    self.record_holding(handle, path);
                    return;
                }
                let notify = Arc::new(Notify::new());
                let granted_flag = Arc::new(AtomicBool::new(false));
                inner.waiters.push_back(Waiter {
                    handle,
                    mode,
                    notify: notify.clone(),
                    granted: granted_flag.clone(),
                });
                (notify, granted_flag)
            };
            let guard = WaitGuard { inner: arc.clone(), notify: notify.clone(), granted: granted_flag.clone() };
            notify.notified().await;
            if granted_flag.load(Ordering::Acquire) {
                drop(guard); // already removed from queue by wake_waiters; this is a no-op
                self.record_holding(handle, path);
                return;
            }
            // spurious wake: loop and either retry immediately or re-queue
            drop(guard);
        }
    }

    /// Idempotent release of `handle`'s lock on `path`.
    pub fn unlock(&self, path: &str, handle: HandleId) {
        if let Some(arc) = self.files.get(path).map(|e| e.clone()) {
            let mut inner = arc.lock().expect("lock table mutex poisoned");
            if inner.release(handle) {
                inner.wake_waiters();
            }
        }
        self.forget_holding(handle, path);
    }

    /// Releases every lock `handle` holds across all paths; idempotent.
    pub fn close(&self, handle: HandleId) {
        let paths: Vec<String> = self
            .holdings
            .get(&handle)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for path in paths {
            self.unlock(&path, handle);
        }
        self.holdings.remove(&handle);
    }

    /// True iff any handle currently holds shared or exclusive on `path`
    /// (used by `delete`, which fails with `Locked` if so — spec §4.2/4.3).
    pub fn has_any_holder(&self, path: &str) -> bool {
        self.files
            .get(path)
            .map(|e| {
                let inner = e.lock().expect("lock table mutex poisoned");
                !matches!(inner.grant, Grant::None)
            })
            .unwrap_or(false)
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleId;

    #[test]
    fn exclusive_excludes_others() {
        let table = LockTable::new();
        let h1 = HandleId(1);
        let h2 = HandleId(2);
        table.try_lock("/f", h1, LockMode::Exclusive).unwrap();
        assert_eq!(table.try_lock("/f", h2, LockMode::Exclusive), Err(FsError::Locked));
        table.close(h1);
        assert!(table.try_lock("/f", h2, LockMode::Exclusive).is_ok());
    }

    #[test]
    fn shared_locks_coexist() {
        let table = LockTable::new();
        let h1 = HandleId(1);
        let h2 = HandleId(2);
        table.try_lock("/f", h1, LockMode::Shared).unwrap();
        assert!(table.try_lock("/f", h2, LockMode::Shared).is_ok());
        assert_eq!(table.try_lock("/f", HandleId(3), LockMode::Exclusive), Err(FsError::Locked));
    }

    #[test]
    fn upgrade_from_sole_shared_holder() {
        let table = LockTable::new();
        let h1 = HandleId(1);
        table.try_lock("/f", h1, LockMode::Shared).unwrap();
        assert!(table.try_lock("/f", h1, LockMode::Exclusive).is_ok());
    }

    #[tokio::test]
    async fn blocking_lock_wakes_on_release() {
        let table = Arc::new(LockTable::new());
        let h1 = HandleId(1);
        let h2 = HandleId(2);
        table.try_lock("/f", h1, LockMode::Exclusive).unwrap();

        let table2 = table.clone();
        let waiter = tokio::spawn(async move {
            table2.lock("/f", h2, LockMode::Exclusive).await;
        });

        tokio::task::yield_now().await;
        table.unlock("/f", h1);
        waiter.await.unwrap();
        assert_eq!(table.try_lock("/f", HandleId(3), LockMode::Shared), Err(FsError::Locked));
    }

    #[test]
    fn unlock_is_idempotent() {
        let table = LockTable::new();
        let h1 = HandleId(1);
        table.unlock("/f", h1);
        table.try_lock("/f", h1, LockMode::Shared).unwrap();
        table.unlock("/f", h1);
        table.unlock("/f", h1);
    }
}
