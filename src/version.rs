//! Prior-content snapshots keyed by path (spec §4.8).

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{FsError, FsResult};

/// One captured prior revision of a file's content.
#[derive(Debug, Clone)]
pub struct Version {
    pub version_id: Uuid,
    pub timestamp_millis: i64,
    pub blob: Vec<u8>,
    pub source_path: String,
}

/// Metadata-only view of a [`Version`], returned by `list` so callers are
/// not forced to clone every blob just to enumerate history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub version_id: Uuid,
    pub timestamp_millis: i64,
}

/// Per-path history, newest revision first.
pub struct VersionStore {
    versions: DashMap<String, Vec<Version>>,
}

impl VersionStore {
    pub fn new() -> Self {
        Self { versions: DashMap::new() }
    }

    /// Record `blob` as a new version of `path`, returning the bytes
    /// charged against the quota (i.e. `blob.len()`).
    pub fn push(&self, path: &str, blob: Vec<u8>, now_millis: i64) -> Version {
        let version = Version { version_id: Uuid::new_v4(), timestamp_millis: now_millis, blob, source_path: path.to_string() };
        self.versions.entry(path.to_string()).or_default().insert(0, version.clone());
        version
    }

    pub fn list(&self, path: &str) -> Vec<VersionInfo> {
        self.versions
            .get(path)
            .map(|v| v.iter().map(|version| VersionInfo { version_id: version.version_id, timestamp_millis: version.timestamp_millis }).collect())
            .unwrap_or_default()
    }

    pub fn read(&self, path: &str, version_id: Uuid) -> FsResult<Vec<u8>> {
        self.versions
            .get(path)
            .and_then(|v| v.iter().find(|version| version.version_id == version_id).map(|version| version.blob.clone()))
            .ok_or(FsError::NotFound)
    }

    /// Total bytes charged by all stored version blobs (spec I5).
    pub fn total_bytes(&self) -> i64 {
        self.versions.iter().map(|e| e.value().iter().map(|v| v.blob.len() as i64).sum::<i64>()).sum()
    }

    pub fn clear(&self) {
        self.versions.clear();
    }

    /// Snapshot every stored version for persistence encoding.
    pub fn all(&self) -> Vec<Version> {
        self.versions.iter().flat_map(|e| e.value().clone()).collect()
    }

    /// Rebuild from a persisted set (restore path), newest-first per key.
    pub fn restore_all(&self, versions: Vec<Version>) {
        self.versions.clear();
        for version in versions {
            self.versions.entry(version.source_path.clone()).or_default().push(version);
        }
        for mut entry in self.versions.iter_mut() {
            entry.sort_by(|a, b| b.timestamp_millis.cmp(&a.timestamp_millis));
        }
    }
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_list_newest_first() {
        let store = VersionStore::new();
        store.push("/f", b"v1".to_vec(), 100);
        store.push("/f", b"v2".to_vec(), 200);
        let list = store.list("/f");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].timestamp_millis, 200);
    }

    #[test]
    fn read_returns_blob_by_id() {
        let store = VersionStore::new();
        let v = store.push("/f", b"v1".to_vec(), 100);
        assert_eq!(store.read("/f", v.version_id).unwrap(), b"v1");
    }

    #[test]
    fn read_missing_id_is_not_found() {
        let store = VersionStore::new();
        store.push("/f", b"v1".to_vec(), 100);
        assert_eq!(store.read("/f", Uuid::new_v4()), Err(FsError::NotFound));
    }

    #[test]
    fn total_bytes_sums_all_blobs() {
        let store = VersionStore::new();
        store.push("/f", vec![0; 10], 1);
        store.push("/g", vec![0; 5], 2);
        assert_eq!(store.total_bytes(), 15);
    }
}
