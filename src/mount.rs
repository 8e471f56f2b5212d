//! Virtual-path-to-backend routing and the host-supplied disk contract
//! (spec §4.6, §6).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{FsError, FsResult};
use crate::node::{FsEntry, FsMeta};
use crate::path;

/// Disk-backed operations a host supplies for one mounted backend. Paths
/// passed in are always disk-root-relative (`/` is the disk root).
///
/// The "optional" operations named in spec §6 default to `PermissionDenied`
/// so a minimal backend only needs to implement the required eight.
#[async_trait]
pub trait DiskOps: Send + Sync {
    async fn create_file(&self, rel_path: &str) -> FsResult<()>;
    async fn create_dir(&self, rel_path: &str) -> FsResult<()>;
    async fn read_file(&self, rel_path: &str, offset: u64, len: usize) -> FsResult<Vec<u8>>;
    async fn write_file(&self, rel_path: &str, offset: u64, data: &[u8]) -> FsResult<()>;
    async fn delete(&self, rel_path: &str) -> FsResult<()>;
    async fn list(&self, rel_path: &str) -> FsResult<Vec<FsEntry>>;
    async fn stat(&self, rel_path: &str) -> FsResult<FsMeta>;
    async fn exists(&self, rel_path: &str) -> FsResult<bool>;

    async fn set_xattr(&self, _rel_path: &str, _key: &str, _value: &[u8]) -> FsResult<()> {
        Err(FsError::PermissionDenied)
    }
    async fn get_xattr(&self, _rel_path: &str, _key: &str) -> FsResult<Option<Vec<u8>>> {
        Err(FsError::PermissionDenied)
    }
    async fn remove_xattr(&self, _rel_path: &str, _key: &str) -> FsResult<()> {
        Err(FsError::PermissionDenied)
    }
    async fn list_xattrs(&self, _rel_path: &str) -> FsResult<Vec<(String, Vec<u8>)>> {
        Err(FsError::PermissionDenied)
    }

    async fn move_to_trash(&self, _rel_path: &str) -> FsResult<String> {
        Err(FsError::PermissionDenied)
    }
    async fn restore_from_trash(&self, _trash_id: &str, _rel_path: &str) -> FsResult<()> {
        Err(FsError::PermissionDenied)
    }
    async fn list_trash(&self) -> FsResult<Vec<String>> {
        Err(FsError::PermissionDenied)
    }
    async fn purge_trash(&self, _trash_id: &str) -> FsResult<()> {
        Err(FsError::PermissionDenied)
    }
    async fn purge_all_trash(&self) -> FsResult<()> {
        Err(FsError::PermissionDenied)
    }
}

/// Persisted mount intent (spec §3: `Mount`). The live `DiskOps` is not part
/// of this record — it is re-attached by the host at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct MountRecord {
    pub virtual_path: String,
    pub root_path: String,
    pub read_only: bool,
}

struct Attached {
    record: MountRecord,
    ops: Arc<dyn DiskOps>,
}

/// Routes virtual paths to either the in-memory tree or a mounted backend
/// by longest-prefix match (spec §4.6).
pub struct MountRouter {
    attached: DashMap<String, Attached>,
    pending: DashMap<String, MountRecord>,
}

/// A resolved mount match: the backend plus the disk-relative remainder of
/// the queried path.
pub struct RouteMatch {
    pub virtual_path: String,
    pub read_only: bool,
    pub ops: Arc<dyn DiskOps>,
    pub rel_path: String,
}

impl MountRouter {
    pub fn new() -> Self {
        Self { attached: DashMap::new(), pending: DashMap::new() }
    }

    /// Reject overlapping mounts: a new mount cannot equal, contain, or be
    /// contained by an existing (attached or pending) mount. Does not check
    /// `virtualPath != "/"` or parent existence — those require the tree
    /// and are checked by the caller.
    pub fn check_disjoint(&self, virtual_path: &str) -> FsResult<()> {
        let conflicts = self
            .attached
            .iter()
            .map(|e| e.record.virtual_path.clone())
            .chain(self.pending.iter().map(|e| e.key().clone()))
            .any(|existing| {
                existing == virtual_path
                    || path::is_prefixed_by(&existing, virtual_path)
                    || path::is_prefixed_by(virtual_path, &existing)
            });
        if conflicts {
            Err(FsError::AlreadyExists)
        } else {
            Ok(())
        }
    }

    pub fn mount(&self, virtual_path: &str, root_path: &str, read_only: bool, ops: Arc<dyn DiskOps>) -> FsResult<()> {
        self.check_disjoint(virtual_path)?;
        let record = MountRecord { virtual_path: virtual_path.to_string(), root_path: root_path.to_string(), read_only };
        self.pending.remove(virtual_path);
        self.attached.insert(virtual_path.to_string(), Attached { record, ops });
        Ok(())
    }

    /// Register a persisted binding without a live backend (startup recovery).
    pub fn mount_pending(&self, record: MountRecord) {
        self.pending.insert(record.virtual_path.clone(), record);
    }

    /// Re-attach a backend to a previously pending mount.
    pub fn attach(&self, virtual_path: &str, ops: Arc<dyn DiskOps>) -> FsResult<()> {
        let record = self.pending.remove(virtual_path).map(|(_, r)| r).ok_or(FsError::NotMounted)?;
        self.attached.insert(virtual_path.to_string(), Attached { record, ops });
        Ok(())
    }

    pub fn unmount(&self, virtual_path: &str) -> FsResult<()> {
        if self.attached.remove(virtual_path).is_some() || self.pending.remove(virtual_path).is_some() {
            Ok(())
        } else {
            Err(FsError::NotMounted)
        }
    }

    /// Longest-prefix match against `path`. Returns `None` if `path` is not
    /// under any attached mount (it may still be under a pending one, which
    /// the caller should treat as `NotMounted`).
    pub fn route(&self, path: &str) -> Option<RouteMatch> {
        let mut best: Option<String> = None;
        for entry in self.attached.iter() {
            let vp = &entry.record.virtual_path;
            if (path == vp.as_str() || path::is_prefixed_by(path, vp))
                && best.as_ref().map(|b| vp.len() > b.len()).unwrap_or(true)
            {
                best = Some(vp.clone());
            }
        }
        let vp = best?;
        let entry = self.attached.get(&vp)?;
        let rel_path = if path == vp.as_str() {
            "/".to_string()
        } else {
            let stripped = &path[vp.len()..];
            if stripped.starts_with('/') {
                stripped.to_string()
            } else {
                format!("/{stripped}")
            }
        };
        Some(RouteMatch {
            virtual_path: vp,
            read_only: entry.record.read_only,
            ops: entry.ops.clone(),
            rel_path,
        })
    }

    /// True iff `path` falls under any pending (unattached) mount.
    pub fn is_pending(&self, path: &str) -> bool {
        self.pending.iter().any(|e| path == e.key().as_str() || path::is_prefixed_by(path, e.key()))
    }

    pub fn pending(&self) -> Vec<MountRecord> {
        self.pending.iter().map(|e| e.value().clone()).collect()
    }

    pub fn all_records(&self) -> Vec<MountRecord> {
        let mut out: Vec<MountRecord> = self.attached.iter().map(|e| e.record.clone()).collect();
        out.extend(self.pending.iter().map(|e| e.value().clone()));
        out
    }
}

impl Default for MountRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeType;

    struct NullDisk;

    #[async_trait]
    impl DiskOps for NullDisk {
        async fn create_file(&self, _: &str) -> FsResult<()> {
            Ok(())
        }
        async fn create_dir(&self, _: &str) -> FsResult<()> {
            Ok(())
        }
        async fn read_file(&self, _: &str, _: u64, _: usize) -> FsResult<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn write_file(&self, _: &str, _: u64, _: &[u8]) -> FsResult<()> {
            Ok(())
        }
        async fn delete(&self, _: &str) -> FsResult<()> {
            Ok(())
        }
        async fn list(&self, _: &str) -> FsResult<Vec<FsEntry>> {
            Ok(Vec::new())
        }
        async fn stat(&self, _: &str) -> FsResult<FsMeta> {
            Ok(FsMeta {
                name: String::new(),
                node_type: NodeType::Directory,
                size: 0,
                created_at_millis: 0,
                modified_at_millis: 0,
                permissions: crate::node::Permissions::all(),
            })
        }
        async fn exists(&self, _: &str) -> FsResult<bool> {
            Ok(true)
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let router = MountRouter::new();
        router.mount("/a", "/", false, Arc::new(NullDisk)).unwrap();
        router.mount("/a/b", "/", false, Arc::new(NullDisk)).unwrap();
        let m = router.route("/a/b/c.txt").unwrap();
        assert_eq!(m.virtual_path, "/a/b");
        assert_eq!(m.rel_path, "/c.txt");
    }

    #[test]
    fn rejects_nested_mount() {
        let router = MountRouter::new();
        router.mount("/a", "/", false, Arc::new(NullDisk)).unwrap();
        assert_eq!(router.mount("/a/b", "/", false, Arc::new(NullDisk)), Err(FsError::AlreadyExists));
    }

    #[test]
    fn unmount_then_route_misses() {
        let router = MountRouter::new();
        router.mount("/a", "/", false, Arc::new(NullDisk)).unwrap();
        assert!(router.route("/a/f").is_some());
        router.unmount("/a").unwrap();
        assert!(router.route("/a/f").is_none());
    }

    #[test]
    fn pending_then_attach() {
        let router = MountRouter::new();
        router.mount_pending(MountRecord { virtual_path: "/a".into(), root_path: "/".into(), read_only: false });
        assert!(router.route("/a/f").is_none());
        assert!(router.is_pending("/a/f"));
        router.attach("/a", Arc::new(NullDisk)).unwrap();
        assert!(router.route("/a/f").is_some());
        assert!(!router.is_pending("/a/f"));
    }
}
