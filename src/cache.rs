//! Stat and readDir result caching for mount-routed paths (spec §4.4).
//!
//! Only paths that resolve through a mount are cached — the in-memory tree
//! itself is always authoritative and never needs caching.

use moka::sync::Cache as MokaCache;

use crate::node::{FsEntry, FsMeta};

/// Two independent LRU caches keyed by absolute path.
pub struct Cache {
    stats: MokaCache<String, FsMeta>,
    dirs: MokaCache<String, Vec<FsEntry>>,
}

impl Cache {
    pub fn new(capacity: u64) -> Self {
        Self {
            stats: MokaCache::new(capacity),
            dirs: MokaCache::new(capacity),
        }
    }

    pub fn get_stat(&self, path: &str) -> Option<FsMeta> {
        self.stats.get(path)
    }

    pub fn put_stat(&self, path: &str, meta: FsMeta) {
        self.stats.insert(path.to_string(), meta);
    }

    pub fn get_dir(&self, path: &str) -> Option<Vec<FsEntry>> {
        self.dirs.get(path)
    }

    pub fn put_dir(&self, path: &str, entries: Vec<FsEntry>) {
        self.dirs.insert(path.to_string(), entries);
    }

    /// Invalidate any cached entry for `path` itself (its stat result and,
    /// if it is a directory, its listing).
    pub fn invalidate(&self, path: &str) {
        self.stats.invalidate(path);
        self.dirs.invalidate(path);
    }

    /// Invalidate the parent directory's listing after a structural change
    /// underneath it (create/delete/rename of a direct child).
    pub fn invalidate_parent_listing(&self, parent_path: &str) {
        self.dirs.invalidate(parent_path);
    }

    /// Drop every cached entry (used on mount/unmount and restore, where
    /// selective invalidation isn't worth tracking precisely).
    pub fn clear(&self) {
        self.stats.invalidate_all();
        self.dirs.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeType, Permissions};

    fn sample_meta(name: &str) -> FsMeta {
        FsMeta {
            name: name.to_string(),
            node_type: NodeType::File,
            size: 0,
            created_at_millis: 0,
            modified_at_millis: 0,
            permissions: Permissions::all(),
        }
    }

    #[test]
    fn put_then_get_stat() {
        let cache = Cache::new(16);
        assert!(cache.get_stat("/mnt/a").is_none());
        cache.put_stat("/mnt/a", sample_meta("a"));
        assert_eq!(cache.get_stat("/mnt/a").unwrap().name, "a");
    }

    #[test]
    fn invalidate_removes_both_entries() {
        let cache = Cache::new(16);
        cache.put_stat("/mnt/d", sample_meta("d"));
        cache.put_dir("/mnt/d", vec![]);
        cache.invalidate("/mnt/d");
        assert!(cache.get_stat("/mnt/d").is_none());
        assert!(cache.get_dir("/mnt/d").is_none());
    }
}
