//! File handles (spec §4.2) — weak references by path + generation id.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::{FsError, FsResult};

/// Mode a handle was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
}

impl OpenMode {
    pub fn can_read(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadWrite)
    }

    pub fn can_write(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }
}

/// Opaque identifier for an open handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

#[derive(Debug, Clone)]
struct HandleEntry {
    path: String,
    mode: OpenMode,
    generation: u64,
    closed: bool,
}

/// Tracks open handles `{path, mode, lockState, closed}` (spec §4.2). The
/// `generation` a handle was opened against lets operations detect that
/// the path was deleted and recreated underneath a still-open handle.
pub struct HandleTable {
    next_id: AtomicU64,
    handles: DashMap<HandleId, HandleEntry>,
    /// Current generation number per path, bumped whenever a path is
    /// deleted (so a stale handle's captured generation no longer matches).
    generations: DashMap<String, u64>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), handles: DashMap::new(), generations: DashMap::new() }
    }

    fn current_generation(&self, path: &str) -> u64 {
        *self.generations.get(path).map(|g| *g).get_or_insert(0)
    }

    /// Bump the generation counter for `path`; called whenever the node at
    /// `path` is deleted so that handles opened before the delete observe
    /// staleness on their next operation.
    pub fn bump_generation(&self, path: &str) {
        *self.generations.entry(path.to_string()).or_insert(0) += 1;
    }

    pub fn open(&self, path: &str, mode: OpenMode) -> HandleId {
        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let generation = self.current_generation(path);
        self.handles.insert(id, HandleEntry { path: path.to_string(), mode, generation, closed: false });
        id
    }

    /// Return the live path and mode for `id`, failing if the handle is
    /// closed or has gone stale (its path was deleted and recreated since
    /// open).
    pub fn resolve(&self, id: HandleId) -> FsResult<(String, OpenMode)> {
        let entry = self.handles.get(&id).ok_or(FsError::NotFound)?;
        if entry.closed {
            return Err(FsError::NotFound);
        }
        if entry.generation != self.current_generation(&entry.path) {
            return Err(FsError::NotFound);
        }
        Ok((entry.path.clone(), entry.mode))
    }

    /// Idempotent close; subsequent operations on `id` fail.
    pub fn close(&self, id: HandleId) {
        if let Some(mut entry) = self.handles.get_mut(&id) {
            entry.closed = true;
        }
    }

    /// All non-closed handle ids currently pointing at `path`.
    pub fn live_handles_for(&self, path: &str) -> Vec<HandleId> {
        self.handles
            .iter()
            .filter(|e| !e.closed && e.path == path)
            .map(|e| *e.key())
            .collect()
    }

    pub fn has_live_holder(&self, path: &str) -> bool {
        !self.live_handles_for(path).is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_detected_after_bump() {
        let table = HandleTable::new();
        let h = table.open("/a", OpenMode::ReadWrite);
        assert!(table.resolve(h).is_ok());
        table.bump_generation("/a");
        assert_eq!(table.resolve(h), Err(FsError::NotFound));
    }

    #[test]
    fn close_is_idempotent() {
        let table = HandleTable::new();
        let h = table.open("/a", OpenMode::Read);
        table.close(h);
        table.close(h);
        assert!(table.resolve(h).is_err());
    }

    #[test]
    fn live_holder_tracking() {
        let table = HandleTable::new();
        assert!(!table.has_live_holder("/a"));
        let h = table.open("/a", OpenMode::Read);
        assert!(table.has_live_holder("/a"));
        table.close(h);
        assert!(!table.has_live_holder("/a"));
    }
}
