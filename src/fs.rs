//! The `FileSystem` facade (spec §4.14): the single entry point that owns
//! every subsystem and enforces the write-mutex / 7-step mutation ordering
//! described in spec §5.
//!
//! Sub-namespaces named in the spec (mounts, versions, search, observe,
//! streams, checksum, xattr, symlinks, archive, trash) are not separate
//! Rust types here — they are flat, prefixed methods on `FileSystem`
//! (`mount`, `versions_list`, `search_find_by_name`, `observe_subscribe`,
//! `checksum_sha256`, `xattr_set`, `symlink_create`, `archive_compress`,
//! `trash_move`, ...). The grouping the spec describes is informational; a
//! single struct with clearly-named methods is a smaller surface than a
//! tree of thin borrow-holding wrapper structs for no behavioural gain.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use uuid::Uuid;

use crate::archive::{self, ArchiveEntry, ArchiveEntryMeta, ArchiveFormat};
use crate::cache::Cache;
use crate::checksum;
use crate::codec::model::WalEntry;
use crate::config::FileSystemConfig;
use crate::error::{FsError, FsResult};
use crate::events::{DiskFileEvent, EventBus, EventSubscription, FsEvent, FsEventKind};
use crate::handle::{HandleId, HandleTable, OpenMode};
use crate::lock::{LockMode, LockTable};
use crate::metrics::{Metrics, OpSnapshot};
use crate::mount::{DiskOps, MountRecord, MountRouter, RouteMatch};
use crate::node::{FsEntry, FsMeta, Node, NodeType, Permissions};
use crate::path;
use crate::persistence::{Persistence, Storage};
use crate::quota::QuotaMeter;
use crate::search::{self, GrepMatch, SearchMatch};
use crate::trash::{TrashInfo, TrashItem, TrashManager};
use crate::tree::TreeStore;
use crate::version::VersionInfo;
use crate::version::VersionStore;

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

fn subtree_bytes(node: &Node) -> u64 {
    crate::trash::subtree_size(node)
}

/// The PicoFS virtual filesystem instance.
///
/// `tree` is wrapped in a `tokio::sync::RwLock`: its write guard doubles as
/// the single logical write-mutex spec §5 describes — holding it for the
/// whole of a mutation's validate/commit/invalidate/publish/WAL-append
/// sequence is what serialises concurrent writers, rather than a separate
/// abstract mutex type layered on top.
pub struct FileSystem {
    config: FileSystemConfig,
    tree: tokio::sync::RwLock<TreeStore>,
    locks: LockTable,
    handles: HandleTable,
    cache: Cache,
    quota: QuotaMeter,
    mounts: MountRouter,
    events: EventBus,
    versions: VersionStore,
    trash: TrashManager,
    metrics: Metrics,
    persistence: Persistence,
    sync_observed: DashMap<String, FsMeta>,
    next_mount_id: AtomicU64,
}

impl FileSystem {
    pub fn new(config: FileSystemConfig, storage: Arc<dyn Storage>) -> Self {
        let now = now_millis();
        Self {
            tree: tokio::sync::RwLock::new(TreeStore::new(config.block_size, now)),
            locks: LockTable::new(),
            handles: HandleTable::new(),
            cache: Cache::new(config.cache_capacity),
            quota: QuotaMeter::new(config.quota),
            mounts: MountRouter::new(),
            events: EventBus::new(config.event_buffer_capacity),
            versions: VersionStore::new(),
            trash: TrashManager::new(),
            metrics: Metrics::new(),
            persistence: Persistence::new(storage, config.wire_codec, config.snapshot_threshold),
            sync_observed: DashMap::new(),
            next_mount_id: AtomicU64::new(1),
            config,
        }
    }

    /// Startup recovery (spec §4.13): snapshot, then WAL replay, then
    /// mounts/versions/trash, then a from-scratch quota recompute.
    pub async fn recover(&self) -> FsResult<()> {
        let now = now_millis();
        let default_root = Node::root(now);
        let root = self.persistence.load_snapshot(default_root).await?;
        let wal_entries = self.persistence.load_wal_entries().await?;
        tracing::info!(wal_entries = wal_entries.len(), "replaying write-ahead log");
        // Read trash early (read-only, re-read officially below) so a
        // RestoreFromTrash WAL entry has its payload available during
        // replay, even though trash itself is loaded "officially" after.
        let trash_lookup: HashMap<Uuid, TrashItem> =
            self.persistence.load_trash().await.unwrap_or_default().into_iter().map(|item| (item.trash_id, item)).collect();
        {
            let mut tree = self.tree.write().await;
            tree.reset(root);
            for entry in &wal_entries {
                Self::apply_wal_entry(&mut tree, entry, &trash_lookup, now);
            }
        }
        for record in self.persistence.load_mounts().await? {
            self.mounts.mount_pending(record);
        }
        let versions = self.persistence.load_versions().await?;
        self.versions.restore_all(versions);
        let trash_items = self.persistence.load_trash().await?;
        self.trash.restore_all(trash_items);
        self.recompute_quota().await;
        tracing::info!(quota_used = self.quota.used(), "recovery complete");
        Ok(())
    }

    fn apply_wal_entry(tree: &mut TreeStore, entry: &WalEntry, trash_lookup: &HashMap<Uuid, TrashItem>, now: i64) {
        match entry {
            WalEntry::CreateFile { path } => {
                let _ = tree.create_file(path, now);
            }
            WalEntry::CreateDir { path } => {
                let _ = tree.create_dir(path, now);
            }
            WalEntry::CreateSymlink { path, target } => {
                let _ = tree.create_symlink(path, target, now);
            }
            WalEntry::Delete { path } => {
                if tree.delete(path).is_err() {
                    let _ = tree.delete_recursive(path);
                }
            }
            WalEntry::Write { path, offset, bytes } => {
                let _ = tree.write_at(path, *offset, bytes, now);
            }
            WalEntry::SetPermissions { path, read, write, execute } => {
                let _ = tree.set_permissions(path, Permissions { read: *read, write: *write, execute: *execute }, now);
            }
            WalEntry::SetXattr { path, name, value } => {
                let _ = tree.set_xattr(path, name, value.clone());
            }
            WalEntry::RemoveXattr { path, name } => {
                let _ = tree.remove_xattr(path, name);
            }
            WalEntry::Copy { src, dst } => {
                let _ = tree.copy(src, dst, now);
            }
            WalEntry::Move { src, dst } => {
                let _ = tree.rename(src, dst);
            }
            WalEntry::MoveToTrash { path, .. } => {
                let _ = tree.remove_node(path);
            }
            WalEntry::RestoreFromTrash { trash_id, path } => {
                if let Ok(id) = Uuid::parse_str(trash_id) {
                    if let Some(item) = trash_lookup.get(&id) {
                        if let Some(payload) = item.payload.clone() {
                            let _ = tree.insert_node(path, payload);
                        }
                    }
                }
            }
        }
    }

    async fn recompute_quota(&self) {
        let file_bytes = {
            let tree = self.tree.read().await;
            subtree_bytes(tree.root_node())
        };
        let total = file_bytes as i64 + self.versions.total_bytes() + self.trash.total_bytes();
        self.quota.reset_to(total);
    }

    /// Append `entry` to the WAL, rolling `tree` back via `rollback` and
    /// returning `Unknown` if the append itself fails (spec §5 step 6/7).
    /// Also fires the threshold snapshot while still holding the write
    /// guard, so the snapshot reflects exactly this committed mutation.
    async fn append_wal_guarded(&self, tree: &mut TreeStore, entry: WalEntry, rollback: impl FnOnce(&mut TreeStore)) -> FsResult<()> {
        match self.persistence.append_wal(&entry).await {
            Ok(snapshot_due) => {
                if snapshot_due {
                    tracing::debug!("wal threshold reached, writing snapshot");
                    let snap = tree.root_node().clone();
                    let _ = self.persistence.write_snapshot(&snap).await;
                }
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%error, "wal append failed, rolling back in-memory mutation");
                rollback(tree);
                Err(FsError::Unknown)
            }
        }
    }

    // ---- core: create / delete / rename / copy -------------------------

    pub async fn create_file(&self, path: &str) -> FsResult<()> {
        let path = path::normalize_checked(path)?;
        let started = Instant::now();
        let result = self.create_file_inner(&path).await;
        self.metrics.record("createFile", result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    async fn create_file_inner(&self, path: &str) -> FsResult<()> {
        if let Some(route) = self.mounts.route(path) {
            if route.read_only {
                return Err(FsError::PermissionDenied);
            }
            route.ops.create_file(&route.rel_path).await?;
            self.cache.invalidate(path);
            if let Some((parent, _)) = path::split_parent(path) {
                self.cache.invalidate_parent_listing(&parent);
            }
            self.events.publish(FsEvent { path: path.to_string(), kind: FsEventKind::Created });
            return Ok(());
        }
        if self.mounts.is_pending(path) {
            return Err(FsError::NotMounted);
        }
        let now = now_millis();
        let mut tree = self.tree.write().await;
        tree.create_file(path, now)?;
        let rollback_path = path.to_string();
        self.append_wal_guarded(&mut tree, WalEntry::CreateFile { path: path.to_string() }, move |t| {
            let _ = t.delete(&rollback_path);
        })
        .await?;
        drop(tree);
        if let Some((parent, _)) = path::split_parent(path) {
            self.cache.invalidate_parent_listing(&parent);
        }
        self.events.publish(FsEvent { path: path.to_string(), kind: FsEventKind::Created });
        Ok(())
    }

    pub async fn create_dir(&self, path: &str) -> FsResult<()> {
        let path = path::normalize_checked(path)?;
        let started = Instant::now();
        let result = self.create_dir_inner(&path).await;
        self.metrics.record("createDir", result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    async fn create_dir_inner(&self, path: &str) -> FsResult<()> {
        if let Some(route) = self.mounts.route(path) {
            if route.read_only {
                return Err(FsError::PermissionDenied);
            }
            route.ops.create_dir(&route.rel_path).await?;
            self.cache.invalidate(path);
            if let Some((parent, _)) = path::split_parent(path) {
                self.cache.invalidate_parent_listing(&parent);
            }
            self.events.publish(FsEvent { path: path.to_string(), kind: FsEventKind::Created });
            return Ok(());
        }
        if self.mounts.is_pending(path) {
            return Err(FsError::NotMounted);
        }
        let now = now_millis();
        let mut tree = self.tree.write().await;
        tree.create_dir(path, now)?;
        let rollback_path = path.to_string();
        self.append_wal_guarded(&mut tree, WalEntry::CreateDir { path: path.to_string() }, move |t| {
            let _ = t.delete(&rollback_path);
        })
        .await?;
        drop(tree);
        if let Some((parent, _)) = path::split_parent(path) {
            self.cache.invalidate_parent_listing(&parent);
        }
        self.events.publish(FsEvent { path: path.to_string(), kind: FsEventKind::Created });
        Ok(())
    }

    /// Create every missing directory along `path` (each level going
    /// through the normal single-level `create_dir`, so each gets its own
    /// WAL entry and rollback).
    pub async fn create_dir_recursive(&self, path: &str) -> FsResult<()> {
        let path = path::normalize_checked(path)?;
        let mut current = String::from("/");
        for seg in path::split(&path) {
            current = path::join(&current, seg);
            match self.create_dir(&current).await {
                Ok(()) | Err(FsError::AlreadyExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> FsResult<()> {
        let path = path::normalize_checked(path)?;
        let started = Instant::now();
        let result = self.delete_inner(&path).await;
        self.metrics.record("delete", result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    async fn delete_inner(&self, path: &str) -> FsResult<()> {
        if let Some(route) = self.mounts.route(path) {
            if route.read_only {
                return Err(FsError::PermissionDenied);
            }
            route.ops.delete(&route.rel_path).await?;
            self.cache.invalidate(path);
            if let Some((parent, _)) = path::split_parent(path) {
                self.cache.invalidate_parent_listing(&parent);
            }
            self.handles.bump_generation(path);
            self.events.publish(FsEvent { path: path.to_string(), kind: FsEventKind::Deleted });
            return Ok(());
        }
        if self.mounts.is_pending(path) {
            return Err(FsError::NotMounted);
        }
        if self.handles.has_live_holder(path) || self.locks.has_any_holder(path) {
            return Err(FsError::Locked);
        }
        let mut tree = self.tree.write().await;
        let removed_node = tree.get(path)?.clone();
        let released_bytes = subtree_bytes(&removed_node) as i64;
        tree.delete(path)?;
        let rollback_path = path.to_string();
        self.append_wal_guarded(&mut tree, WalEntry::Delete { path: path.to_string() }, move |t| {
            let _ = t.insert_node(&rollback_path, removed_node);
        })
        .await?;
        drop(tree);
        self.quota.release(released_bytes);
        self.handles.bump_generation(path);
        if let Some((parent, _)) = path::split_parent(path) {
            self.cache.invalidate_parent_listing(&parent);
        }
        self.cache.invalidate(path);
        self.events.publish(FsEvent { path: path.to_string(), kind: FsEventKind::Deleted });
        Ok(())
    }

    pub async fn delete_recursive(&self, path: &str) -> FsResult<()> {
        let path = path::normalize_checked(path)?;
        let started = Instant::now();
        let result = self.delete_recursive_inner(&path).await;
        self.metrics.record("delete", result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    async fn delete_recursive_inner(&self, path: &str) -> FsResult<()> {
        if path == "/" {
            return Err(FsError::PermissionDenied);
        }
        if let Some(route) = self.mounts.route(path) {
            if route.read_only {
                return Err(FsError::PermissionDenied);
            }
            route.ops.delete(&route.rel_path).await?;
            self.cache.invalidate(path);
            if let Some((parent, _)) = path::split_parent(path) {
                self.cache.invalidate_parent_listing(&parent);
            }
            self.handles.bump_generation(path);
            self.events.publish(FsEvent { path: path.to_string(), kind: FsEventKind::Deleted });
            return Ok(());
        }
        if self.mounts.is_pending(path) {
            return Err(FsError::NotMounted);
        }
        let mut tree = self.tree.write().await;
        for p in tree.subtree_paths(path)? {
            if self.handles.has_live_holder(&p) || self.locks.has_any_holder(&p) {
                return Err(FsError::Locked);
            }
        }
        let removed_node = tree.get(path)?.clone();
        let released_bytes = subtree_bytes(&removed_node) as i64;
        tree.delete_recursive(path)?;
        let rollback_path = path.to_string();
        self.append_wal_guarded(&mut tree, WalEntry::Delete { path: path.to_string() }, move |t| {
            let _ = t.insert_node(&rollback_path, removed_node);
        })
        .await?;
        drop(tree);
        self.quota.release(released_bytes);
        self.handles.bump_generation(path);
        if let Some((parent, _)) = path::split_parent(path) {
            self.cache.invalidate_parent_listing(&parent);
        }
        self.cache.invalidate(path);
        self.events.publish(FsEvent { path: path.to_string(), kind: FsEventKind::Deleted });
        Ok(())
    }

    pub async fn rename(&self, src: &str, dst: &str) -> FsResult<()> {
        let src = path::normalize_checked(src)?;
        let dst = path::normalize_checked(dst)?;
        let started = Instant::now();
        let result = self.rename_inner(&src, &dst).await;
        self.metrics.record("move", result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    /// Alias kept for call sites that prefer the `mv`-style name.
    pub async fn move_path(&self, src: &str, dst: &str) -> FsResult<()> {
        self.rename(src, dst).await
    }

    async fn rename_inner(&self, src: &str, dst: &str) -> FsResult<()> {
        match (self.mounts.route(src), self.mounts.route(dst)) {
            (Some(s), Some(d)) if s.virtual_path == d.virtual_path => {
                if s.read_only {
                    return Err(FsError::PermissionDenied);
                }
                // The minimal DiskOps contract has no rename hook: compose
                // from stat+read+write+delete against the same backend.
                let meta = s.ops.stat(&s.rel_path).await?;
                if meta.node_type != NodeType::File {
                    return Err(FsError::Unknown);
                }
                let data = s.ops.read_file(&s.rel_path, 0, meta.size as usize).await?;
                let _ = d.ops.create_file(&d.rel_path).await;
                d.ops.write_file(&d.rel_path, 0, &data).await?;
                s.ops.delete(&s.rel_path).await?;
                self.cache.invalidate(src);
                self.cache.invalidate(dst);
                self.events.publish(FsEvent { path: src.to_string(), kind: FsEventKind::Deleted });
                self.events.publish(FsEvent { path: dst.to_string(), kind: FsEventKind::Created });
                Ok(())
            }
            (None, None) => {
                if self.mounts.is_pending(src) || self.mounts.is_pending(dst) {
                    return Err(FsError::NotMounted);
                }
                let mut tree = self.tree.write().await;
                tree.rename(src, dst)?;
                let rollback_src = src.to_string();
                let rollback_dst = dst.to_string();
                self.append_wal_guarded(&mut tree, WalEntry::Move { src: src.to_string(), dst: dst.to_string() }, move |t| {
                    let _ = t.rename(&rollback_dst, &rollback_src);
                })
                .await?;
                drop(tree);
                self.handles.bump_generation(src);
                self.cache.invalidate(src);
                if let Some((p, _)) = path::split_parent(src) {
                    self.cache.invalidate_parent_listing(&p);
                }
                if let Some((p, _)) = path::split_parent(dst) {
                    self.cache.invalidate_parent_listing(&p);
                }
                self.events.publish(FsEvent { path: src.to_string(), kind: FsEventKind::Deleted });
                self.events.publish(FsEvent { path: dst.to_string(), kind: FsEventKind::Created });
                Ok(())
            }
            _ => {
                // Crossing the tree/mount boundary: not atomic (spec §9 open
                // question b resolves this as copy-then-delete).
                self.copy(src, dst).await?;
                self.delete_recursive(src).await
            }
        }
    }

    pub async fn copy(&self, src: &str, dst: &str) -> FsResult<()> {
        let src = path::normalize_checked(src)?;
        let dst = path::normalize_checked(dst)?;
        let started = Instant::now();
        let result = self.copy_inner(&src, &dst).await;
        self.metrics.record("copy", result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    async fn copy_inner(&self, src: &str, dst: &str) -> FsResult<()> {
        match (self.mounts.route(src), self.mounts.route(dst)) {
            (None, None) => {
                if self.mounts.is_pending(src) || self.mounts.is_pending(dst) {
                    return Err(FsError::NotMounted);
                }
                let now = now_millis();
                let mut tree = self.tree.write().await;
                tree.copy(src, dst, now)?;
                let rollback_dst = dst.to_string();
                self.append_wal_guarded(&mut tree, WalEntry::Copy { src: src.to_string(), dst: dst.to_string() }, move |t| {
                    let _ = t.delete_recursive(&rollback_dst);
                })
                .await?;
                drop(tree);
                if let Some((p, _)) = path::split_parent(dst) {
                    self.cache.invalidate_parent_listing(&p);
                }
                self.events.publish(FsEvent { path: dst.to_string(), kind: FsEventKind::Created });
                Ok(())
            }
            _ => self.copy_via_read_write(src, dst).await,
        }
    }

    /// Copy across the tree/mount boundary (or mount-to-mount) by walking
    /// the source with the standard `stat`/`read_dir`/`read_all` ops and
    /// rebuilding it at `dst` through the standard create/write path.
    async fn copy_via_read_write(&self, src: &str, dst: &str) -> FsResult<()> {
        let mut queue = vec![(src.to_string(), dst.to_string())];
        while let Some((s, d)) = queue.pop() {
            let meta = self.stat(&s).await?;
            match meta.node_type {
                NodeType::Directory => {
                    if self.stat(&d).await.is_err() {
                        self.create_dir(&d).await?;
                    }
                    for entry in self.read_dir(&s).await? {
                        queue.push((path::join(&s, &entry.name), path::join(&d, &entry.name)));
                    }
                }
                NodeType::Symlink => {
                    let target = self.symlink_read(&s).await?;
                    self.symlink_create(&d, &target).await?;
                }
                NodeType::File => {
                    let data = self.read_all(&s).await?;
                    if self.stat(&d).await.is_err() {
                        self.create_file(&d).await?;
                    }
                    self.write_all(&d, &data).await?;
                }
            }
        }
        Ok(())
    }

    // ---- core: stat / readDir ------------------------------------------

    pub async fn read_dir(&self, path: &str) -> FsResult<Vec<FsEntry>> {
        let path = path::normalize_checked(path)?;
        let started = Instant::now();
        let result = self.read_dir_inner(&path).await;
        self.metrics.record("readDir", result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    async fn read_dir_inner(&self, path: &str) -> FsResult<Vec<FsEntry>> {
        if let Some(route) = self.mounts.route(path) {
            if let Some(cached) = self.cache.get_dir(path) {
                return Ok(cached);
            }
            let entries = route.ops.list(&route.rel_path).await?;
            self.cache.put_dir(path, entries.clone());
            return Ok(entries);
        }
        if self.mounts.is_pending(path) {
            return Err(FsError::NotMounted);
        }
        let tree = self.tree.read().await;
        tree.read_dir(path)
    }

    pub async fn stat(&self, path: &str) -> FsResult<FsMeta> {
        let path = path::normalize_checked(path)?;
        let started = Instant::now();
        let result = self.stat_inner(&path).await;
        self.metrics.record("stat", result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    async fn stat_inner(&self, path: &str) -> FsResult<FsMeta> {
        if let Some(route) = self.mounts.route(path) {
            if let Some(cached) = self.cache.get_stat(path) {
                return Ok(cached);
            }
            let meta = route.ops.stat(&route.rel_path).await?;
            self.cache.put_stat(path, meta.clone());
            return Ok(meta);
        }
        if self.mounts.is_pending(path) {
            return Err(FsError::NotMounted);
        }
        let tree = self.tree.read().await;
        let resolved = tree.resolve_symlinks(path, self.config.max_symlink_hops)?;
        tree.stat_raw(&resolved)
    }

    // ---- core: handles / streams / permissions -------------------------

    pub async fn open(&self, path: &str, mode: OpenMode) -> FsResult<HandleId> {
        let path = path::normalize_checked(path)?;
        if self.mounts.route(&path).is_none() {
            if self.mounts.is_pending(&path) {
                return Err(FsError::NotMounted);
            }
            let tree = self.tree.read().await;
            tree.get(&path)?;
        }
        let started = Instant::now();
        let id = self.handles.open(&path, mode);
        self.metrics.record("open", true, started.elapsed().as_millis() as u64);
        Ok(id)
    }

    pub fn close(&self, handle: HandleId) {
        self.locks.close(handle);
        self.handles.close(handle);
    }

    pub fn try_lock(&self, handle: HandleId, mode: LockMode) -> FsResult<()> {
        let (path, _) = self.handles.resolve(handle)?;
        self.locks.try_lock(&path, handle, mode)
    }

    pub async fn lock(&self, handle: HandleId, mode: LockMode) -> FsResult<()> {
        let (path, _) = self.handles.resolve(handle)?;
        self.locks.lock(&path, handle, mode).await;
        Ok(())
    }

    pub fn unlock(&self, handle: HandleId) -> FsResult<()> {
        let (path, _) = self.handles.resolve(handle)?;
        self.locks.unlock(&path, handle);
        Ok(())
    }

    pub async fn set_permissions(&self, path: &str, permissions: Permissions) -> FsResult<()> {
        let path = path::normalize_checked(path)?;
        let started = Instant::now();
        let result = self.set_permissions_inner(&path, permissions).await;
        self.metrics.record("setPermissions", result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    async fn set_permissions_inner(&self, path: &str, permissions: Permissions) -> FsResult<()> {
        if self.mounts.route(path).is_some() || self.mounts.is_pending(path) {
            // DiskOps has no setPermissions hook (spec §6); mount-backed
            // entries keep whatever permission model the host enforces.
            return Err(FsError::PermissionDenied);
        }
        let now = now_millis();
        let mut tree = self.tree.write().await;
        let prior = tree.get(path)?.meta().permissions;
        tree.set_permissions(path, permissions, now)?;
        let rollback_path = path.to_string();
        self.append_wal_guarded(
            &mut tree,
            WalEntry::SetPermissions { path: path.to_string(), read: permissions.read, write: permissions.write, execute: permissions.execute },
            move |t| {
                let _ = t.set_permissions(&rollback_path, prior, now);
            },
        )
        .await?;
        drop(tree);
        self.cache.invalidate(path);
        self.events.publish(FsEvent { path: path.to_string(), kind: FsEventKind::Modified });
        Ok(())
    }

    // ---- core: content read/write --------------------------------------

    pub async fn read_all(&self, path: &str) -> FsResult<Vec<u8>> {
        let path = path::normalize_checked(path)?;
        let started = Instant::now();
        let result = self.perform_read(&path, 0, usize::MAX).await;
        if let Ok(data) = &result {
            self.metrics.add_bytes_read(data.len() as u64);
        }
        self.metrics.record("readAll", result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    pub async fn write_all(&self, path: &str, data: &[u8]) -> FsResult<()> {
        let path = path::normalize_checked(path)?;
        let started = Instant::now();
        let result = self.perform_write(&path, 0, data).await;
        if result.is_ok() {
            self.metrics.add_bytes_written(data.len() as u64);
        }
        self.metrics.record("writeAll", result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    pub async fn read_at(&self, handle: HandleId, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        let (path, mode) = self.handles.resolve(handle)?;
        if !mode.can_read() {
            return Err(FsError::PermissionDenied);
        }
        let result = self.perform_read(&path, offset, len).await;
        if let Ok(data) = &result {
            self.metrics.add_bytes_read(data.len() as u64);
        }
        result
    }

    pub async fn write_at(&self, handle: HandleId, offset: u64, data: &[u8]) -> FsResult<()> {
        let (path, mode) = self.handles.resolve(handle)?;
        if !mode.can_write() {
            return Err(FsError::PermissionDenied);
        }
        let result = self.perform_write(&path, offset, data).await;
        if result.is_ok() {
            self.metrics.add_bytes_written(data.len() as u64);
        }
        result
    }

    async fn perform_read(&self, path: &str, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        if let Some(route) = self.mounts.route(path) {
            return route.ops.read_file(&route.rel_path, offset, len).await;
        }
        if self.mounts.is_pending(path) {
            return Err(FsError::NotMounted);
        }
        let tree = self.tree.read().await;
        let resolved = tree.resolve_symlinks(path, self.config.max_symlink_hops)?;
        tree.read_at(&resolved, offset, len)
    }

    /// The single write primitive behind `writeAll` and handle-based
    /// `writeAt`: zero-extends but never shrinks (spec's `TreeStore` has no
    /// truncate primitive, so a full-file overwrite that is shorter than
    /// the existing content leaves trailing bytes — see DESIGN.md).
    async fn perform_write(&self, path: &str, offset: u64, data: &[u8]) -> FsResult<()> {
        if let Some(route) = self.mounts.route(path) {
            if route.read_only {
                return Err(FsError::PermissionDenied);
            }
            route.ops.write_file(&route.rel_path, offset, data).await?;
            self.cache.invalidate(path);
            if let Some((parent, _)) = path::split_parent(path) {
                self.cache.invalidate_parent_listing(&parent);
            }
            self.events.publish(FsEvent { path: path.to_string(), kind: FsEventKind::Modified });
            return Ok(());
        }
        if self.mounts.is_pending(path) {
            return Err(FsError::NotMounted);
        }
        let now = now_millis();
        let mut tree = self.tree.write().await;
        let resolved = tree.resolve_symlinks(path, self.config.max_symlink_hops)?;
        let prior_size = tree.stat_raw(&resolved).map(|m| m.size).unwrap_or(0);
        let delta = data.len() as i64 - prior_size as i64;
        self.quota.try_charge(delta)?;
        let (prior_content, _) = match tree.write_at(&resolved, offset, data, now) {
            Ok(v) => v,
            Err(e) => {
                self.quota.release(delta.max(0));
                return Err(e);
            }
        };
        // spec §3/§9 open question a: the first write to an empty file does
        // not itself capture a version (there is nothing to roll back to).
        if !prior_content.is_empty() {
            self.versions.push(&resolved, prior_content.clone(), now);
            let _ = self.quota.try_charge(prior_content.len() as i64);
            let _ = self.persistence.write_versions(&self.versions.all()).await;
        }
        let rollback_path = resolved.clone();
        let rollback_prior = prior_content;
        let rollback_now = now;
        if let Err(e) = self
            .append_wal_guarded(&mut tree, WalEntry::Write { path: resolved.clone(), offset, bytes: data.to_vec() }, move |t| {
                let _ = t.write_at(&rollback_path, 0, &rollback_prior, rollback_now);
            })
            .await
        {
            self.quota.release(delta);
            return Err(e);
        }
        drop(tree);
        self.cache.invalidate(&resolved);
        if let Some((parent, _)) = path::split_parent(&resolved) {
            self.cache.invalidate_parent_listing(&parent);
        }
        self.events.publish(FsEvent { path: resolved, kind: FsEventKind::Modified });
        Ok(())
    }

    // ---- mounts ---------------------------------------------------------

    pub async fn mount(&self, virtual_path: &str, root_path: &str, read_only: bool, ops: Arc<dyn DiskOps>) -> FsResult<()> {
        let started = Instant::now();
        let result = self.mount_inner(virtual_path, root_path, read_only, ops).await;
        self.metrics.record("mount", result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    async fn mount_inner(&self, virtual_path: &str, root_path: &str, read_only: bool, ops: Arc<dyn DiskOps>) -> FsResult<()> {
        let virtual_path = path::normalize_checked(virtual_path)?;
        if virtual_path == "/" {
            return Err(FsError::InvalidPath);
        }
        self.mounts.check_disjoint(&virtual_path)?;
        let now = now_millis();
        {
            let mut tree = self.tree.write().await;
            match tree.get(&virtual_path) {
                Ok(Node::Directory(d)) if d.children.is_empty() => {}
                Ok(Node::Directory(_)) => return Err(FsError::AlreadyExists),
                Ok(_) => return Err(FsError::NotDirectory),
                Err(FsError::NotFound) => tree.create_dir(&virtual_path, now)?,
                Err(other) => return Err(other),
            }
        }
        let mount_id = self.next_mount_id.fetch_add(1, Ordering::Relaxed);
        self.mounts.mount(&virtual_path, root_path, read_only, ops)?;
        {
            let mut tree = self.tree.write().await;
            tree.set_mount(&virtual_path, Some(mount_id))?;
        }
        self.cache.clear();
        self.persistence.write_mounts(&self.mounts.all_records()).await?;
        tracing::info!(path = %virtual_path, read_only, "mounted backend");
        Ok(())
    }

    pub async fn unmount(&self, virtual_path: &str) -> FsResult<()> {
        let started = Instant::now();
        let virtual_path = path::normalize_checked(virtual_path)?;
        self.mounts.unmount(&virtual_path)?;
        {
            let mut tree = self.tree.write().await;
            let _ = tree.set_mount(&virtual_path, None);
        }
        self.cache.clear();
        let result = self.persistence.write_mounts(&self.mounts.all_records()).await;
        self.metrics.record("unmount", result.is_ok(), started.elapsed().as_millis() as u64);
        tracing::info!(path = %virtual_path, ok = result.is_ok(), "unmounted backend");
        result
    }

    pub fn mounts_pending(&self) -> Vec<MountRecord> {
        self.mounts.pending()
    }

    pub fn mounts_all(&self) -> Vec<MountRecord> {
        self.mounts.all_records()
    }

    /// Re-attach a backend to a mount that was restored from persistence
    /// without one (startup, before the host has reconnected its backends).
    pub fn mount_attach(&self, virtual_path: &str, ops: Arc<dyn DiskOps>) -> FsResult<()> {
        self.mounts.attach(virtual_path, ops)
    }

    // ---- sync (spec §4.14: reconcile a mount against its disk state) ---

    pub async fn sync(&self, path: &str) -> FsResult<()> {
        let path = path::normalize_checked(path)?;
        let started = Instant::now();
        let result = self.sync_inner(&path).await;
        self.metrics.record("sync", result.is_ok(), started.elapsed().as_millis() as u64);
        result
    }

    /// Reconciles the mount's entire subtree (not just its direct children)
    /// against what was last observed, emitting Created/Modified/Deleted
    /// events and capturing a version on every detected modification.
    async fn sync_inner(&self, path: &str) -> FsResult<()> {
        let route = self.mounts.route(path).ok_or(FsError::NotMounted)?;
        let now = now_millis();
        let seen: std::collections::HashSet<String> =
            self.sync_dir(&route, route.rel_path.clone(), route.virtual_path.clone(), now).await?.into_iter().collect();
        let scope = format!("{}/", route.virtual_path);
        let stale: Vec<String> =
            self.sync_observed.iter().filter(|e| e.key().starts_with(&scope) && !seen.contains(e.key())).map(|e| e.key().clone()).collect();
        for path in stale {
            self.sync_observed.remove(&path);
            self.events.publish(FsEvent { path, kind: FsEventKind::Deleted });
        }
        Ok(())
    }

    /// Reconciles one directory level of `route` and recurses into every
    /// child directory, returning every visited virtual path so the caller
    /// can detect deletions anywhere in the subtree, not just at the top
    /// level. Boxed because async fns can't recurse directly.
    fn sync_dir<'a>(
        &'a self,
        route: &'a RouteMatch,
        rel_dir: String,
        virtual_dir: String,
        now: i64,
    ) -> Pin<Box<dyn Future<Output = FsResult<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            let mut seen = Vec::new();
            let entries = route.ops.list(&rel_dir).await?;
            for entry in entries {
                let child_virtual = path::join(&virtual_dir, &entry.name);
                seen.push(child_virtual.clone());
                let rel_child = path::join(&rel_dir, &entry.name);
                let meta = route.ops.stat(&rel_child).await?;
                match self.sync_observed.get(&child_virtual).map(|m| m.clone()) {
                    None => {
                        self.events.publish(FsEvent { path: child_virtual.clone(), kind: FsEventKind::Created });
                    }
                    Some(prev) if prev.modified_at_millis != meta.modified_at_millis || prev.size != meta.size => {
                        if meta.node_type == NodeType::File {
                            if let Ok(content) = route.ops.read_file(&rel_child, 0, meta.size as usize).await {
                                self.versions.push(&child_virtual, content, now);
                            }
                        }
                        self.events.publish(FsEvent { path: child_virtual.clone(), kind: FsEventKind::Modified });
                    }
                    _ => {}
                }
                self.sync_observed.insert(child_virtual.clone(), meta.clone());
                if meta.node_type == NodeType::Directory {
                    let nested = self.sync_dir(route, rel_child, child_virtual, now).await?;
                    seen.extend(nested);
                }
            }
            Ok(seen)
        })
    }

    // ---- versions ---------------------------------------------------------

    pub fn versions_list(&self, path: &str) -> Vec<VersionInfo> {
        self.versions.list(path)
    }

    pub fn versions_read(&self, path: &str, version_id: Uuid) -> FsResult<Vec<u8>> {
        self.versions.read(path, version_id)
    }

    /// Push the current content as a new version, then overwrite with the
    /// historical blob (spec §4.8) — implemented as a plain `perform_write`,
    /// which already does exactly that.
    pub async fn versions_restore(&self, path: &str, version_id: Uuid) -> FsResult<()> {
        let path = path::normalize_checked(path)?;
        let historical = self.versions.read(&path, version_id)?;
        self.perform_write(&path, 0, &historical).await
    }

    // ---- search -------------------------------------------------------

    pub async fn search_find_by_name(&self, root: &str, pattern: &str) -> FsResult<Vec<SearchMatch>> {
        let root = path::normalize_checked(root)?;
        let tree = self.tree.read().await;
        search::find_by_name(&tree, &root, pattern)
    }

    pub async fn search_grep(&self, root: &str, needle: &str) -> FsResult<Vec<GrepMatch>> {
        let root = path::normalize_checked(root)?;
        let tree = self.tree.read().await;
        search::grep(&tree, &root, needle)
    }

    // ---- observe (event subscription) ----------------------------------

    pub fn observe_subscribe(&self, prefix: &str) -> EventSubscription {
        self.events.subscribe(prefix)
    }

    // ---- external watcher bridge -----------------------------------------

    /// Ingests a raw notification from a host `DiskFileWatcher`, translating
    /// it into a virtual-path `FsEvent` and, per spec §4.7/§4.8, capturing a
    /// version when a MODIFIED event's on-disk content differs from the last
    /// captured version's blob. Takes the same write lock `perform_write`
    /// holds so this bridge's version pushes and event publishes interleave
    /// correctly with concurrent user operations instead of racing them.
    pub async fn on_disk_event(&self, mount_virtual_path: &str, event: DiskFileEvent) -> FsResult<()> {
        let mount_virtual_path = path::normalize_checked(mount_virtual_path)?;
        let fs_event = EventBus::translate_disk_event(&mount_virtual_path, event);
        let now = now_millis();
        {
            let _tree = self.tree.write().await;
            if fs_event.kind == FsEventKind::Modified {
                if let Some(route) = self.mounts.route(&fs_event.path) {
                    if let Ok(meta) = route.ops.stat(&route.rel_path).await {
                        if meta.node_type == NodeType::File {
                            if let Ok(content) = route.ops.read_file(&route.rel_path, 0, meta.size as usize).await {
                                let last = self
                                    .versions
                                    .list(&fs_event.path)
                                    .first()
                                    .and_then(|v| self.versions.read(&fs_event.path, v.version_id).ok());
                                if last.as_deref() != Some(content.as_slice()) {
                                    self.versions.push(&fs_event.path, content, now);
                                }
                            }
                        }
                    }
                }
            }
            self.cache.invalidate(&fs_event.path);
        }
        self.events.publish(fs_event);
        Ok(())
    }

    // ---- checksum -------------------------------------------------------

    pub async fn checksum_crc32(&self, path: &str) -> FsResult<String> {
        let data = self.read_all(path).await?;
        Ok(checksum::crc32_hex(&data))
    }

    pub async fn checksum_sha256(&self, path: &str) -> FsResult<String> {
        let data = self.read_all(path).await?;
        Ok(checksum::sha256_hex(&data))
    }

    // ---- xattrs ---------------------------------------------------------

    pub async fn xattr_set(&self, path: &str, key: &str, value: Vec<u8>) -> FsResult<()> {
        let path = path::normalize_checked(path)?;
        if let Some(route) = self.mounts.route(&path) {
            if route.read_only {
                return Err(FsError::PermissionDenied);
            }
            route.ops.set_xattr(&route.rel_path, key, &value).await?;
            self.cache.invalidate(&path);
            self.events.publish(FsEvent { path, kind: FsEventKind::Modified });
            return Ok(());
        }
        if self.mounts.is_pending(&path) {
            return Err(FsError::NotMounted);
        }
        let mut tree = self.tree.write().await;
        let prior = tree.get_xattr(&path, key)?;
        tree.set_xattr(&path, key, value.clone())?;
        let rollback_path = path.clone();
        let rollback_key = key.to_string();
        self.append_wal_guarded(&mut tree, WalEntry::SetXattr { path: path.clone(), name: key.to_string(), value }, move |t| match prior {
            Some(v) => {
                let _ = t.set_xattr(&rollback_path, &rollback_key, v);
            }
            None => {
                let _ = t.remove_xattr(&rollback_path, &rollback_key);
            }
        })
        .await?;
        drop(tree);
        self.cache.invalidate(&path);
        self.events.publish(FsEvent { path, kind: FsEventKind::Modified });
        Ok(())
    }

    pub async fn xattr_remove(&self, path: &str, key: &str) -> FsResult<()> {
        let path = path::normalize_checked(path)?;
        if let Some(route) = self.mounts.route(&path) {
            if route.read_only {
                return Err(FsError::PermissionDenied);
            }
            route.ops.remove_xattr(&route.rel_path, key).await?;
            self.cache.invalidate(&path);
            self.events.publish(FsEvent { path, kind: FsEventKind::Modified });
            return Ok(());
        }
        if self.mounts.is_pending(&path) {
            return Err(FsError::NotMounted);
        }
        let mut tree = self.tree.write().await;
        let prior = tree.get_xattr(&path, key)?;
        tree.remove_xattr(&path, key)?;
        let rollback_path = path.clone();
        let rollback_key = key.to_string();
        self.append_wal_guarded(&mut tree, WalEntry::RemoveXattr { path: path.clone(), name: key.to_string() }, move |t| {
            if let Some(v) = prior {
                let _ = t.set_xattr(&rollback_path, &rollback_key, v);
            }
        })
        .await?;
        drop(tree);
        self.cache.invalidate(&path);
        self.events.publish(FsEvent { path, kind: FsEventKind::Modified });
        Ok(())
    }

    pub async fn xattr_get(&self, path: &str, key: &str) -> FsResult<Option<Vec<u8>>> {
        let path = path::normalize_checked(path)?;
        if let Some(route) = self.mounts.route(&path) {
            return route.ops.get_xattr(&route.rel_path, key).await;
        }
        if self.mounts.is_pending(&path) {
            return Err(FsError::NotMounted);
        }
        let tree = self.tree.read().await;
        tree.get_xattr(&path, key)
    }

    pub async fn xattr_list(&self, path: &str) -> FsResult<Vec<(String, Vec<u8>)>> {
        let path = path::normalize_checked(path)?;
        if let Some(route) = self.mounts.route(&path) {
            return route.ops.list_xattrs(&route.rel_path).await;
        }
        if self.mounts.is_pending(&path) {
            return Err(FsError::NotMounted);
        }
        let tree = self.tree.read().await;
        tree.list_xattrs(&path)
    }

    // ---- symlinks ---------------------------------------------------------

    pub async fn symlink_create(&self, path: &str, target: &str) -> FsResult<()> {
        let path = path::normalize_checked(path)?;
        if self.mounts.route(&path).is_some() || self.mounts.is_pending(&path) {
            // Symlinks are an in-memory-tree concept only; no DiskOps hook.
            return Err(FsError::PermissionDenied);
        }
        let now = now_millis();
        let mut tree = self.tree.write().await;
        tree.create_symlink(&path, target, now)?;
        let rollback_path = path.clone();
        self.append_wal_guarded(&mut tree, WalEntry::CreateSymlink { path: path.clone(), target: target.to_string() }, move |t| {
            let _ = t.delete(&rollback_path);
        })
        .await?;
        drop(tree);
        if let Some((p, _)) = path::split_parent(&path) {
            self.cache.invalidate_parent_listing(&p);
        }
        self.events.publish(FsEvent { path, kind: FsEventKind::Created });
        Ok(())
    }

    pub async fn symlink_read(&self, path: &str) -> FsResult<String> {
        let path = path::normalize_checked(path)?;
        let tree = self.tree.read().await;
        tree.read_link(&path)
    }

    pub async fn symlink_resolve(&self, path: &str) -> FsResult<String> {
        let path = path::normalize_checked(path)?;
        let tree = self.tree.read().await;
        tree.resolve_symlinks(&path, self.config.max_symlink_hops)
    }

    // ---- archive --------------------------------------------------------

    pub async fn archive_compress(&self, roots: &[String], out_path: &str, format: ArchiveFormat) -> FsResult<()> {
        let mut entries = Vec::new();
        for root in roots {
            self.collect_archive_entries(root, &mut entries).await?;
        }
        let bytes = match format {
            ArchiveFormat::Zip => archive::zip::encode(&entries),
            ArchiveFormat::Tar => archive::tar::encode(&entries),
        };
        if self.stat(out_path).await.is_err() {
            self.create_file(out_path).await?;
        }
        self.write_all(out_path, &bytes).await
    }

    async fn collect_archive_entries(&self, root: &str, out: &mut Vec<ArchiveEntry>) -> FsResult<()> {
        let mut queue = vec![root.to_string()];
        while let Some(current) = queue.pop() {
            let meta = self.stat(&current).await?;
            let name = current.trim_start_matches('/').to_string();
            match meta.node_type {
                NodeType::Directory => {
                    out.push(ArchiveEntry { name: format!("{name}/"), is_dir: true, content: Vec::new(), modified_at_millis: meta.modified_at_millis });
                    for entry in self.read_dir(&current).await? {
                        queue.push(path::join(&current, &entry.name));
                    }
                }
                _ => {
                    let data = self.read_all(&current).await?;
                    out.push(ArchiveEntry { name, is_dir: false, content: data, modified_at_millis: meta.modified_at_millis });
                }
            }
        }
        Ok(())
    }

    pub async fn archive_list(&self, archive_path: &str) -> FsResult<Vec<ArchiveEntryMeta>> {
        let bytes = self.read_all(archive_path).await?;
        match archive::detect_format(&bytes) {
            Some(ArchiveFormat::Zip) => archive::zip::list(&bytes),
            Some(ArchiveFormat::Tar) => archive::tar::list(&bytes),
            None => Err(FsError::Unknown),
        }
    }

    pub async fn archive_extract(&self, archive_path: &str, dest_root: &str) -> FsResult<()> {
        let bytes = self.read_all(archive_path).await?;
        let entries = match archive::detect_format(&bytes) {
            Some(ArchiveFormat::Zip) => archive::zip::decode(&bytes)?,
            Some(ArchiveFormat::Tar) => archive::tar::decode(&bytes)?,
            None => return Err(FsError::Unknown),
        };
        for entry in entries {
            let target = path::normalize(&path::join(dest_root, entry.name.trim_end_matches('/')));
            if entry.is_dir {
                if self.create_dir_recursive(&target).await.is_err() && self.stat(&target).await.is_err() {
                    return Err(FsError::Unknown);
                }
                continue;
            }
            if let Some((parent, _)) = path::split_parent(&target) {
                if self.stat(&parent).await.is_err() {
                    self.create_dir_recursive(&parent).await?;
                }
            }
            if self.stat(&target).await.is_err() {
                self.create_file(&target).await?;
            }
            self.write_all(&target, &entry.content).await?;
        }
        Ok(())
    }

    // ---- trash ----------------------------------------------------------

    pub async fn trash_move(&self, path: &str) -> FsResult<Uuid> {
        let path = path::normalize_checked(path)?;
        if path == "/" {
            return Err(FsError::PermissionDenied);
        }
        if let Some(route) = self.mounts.route(&path) {
            if route.read_only {
                return Err(FsError::PermissionDenied);
            }
            let meta = route.ops.stat(&route.rel_path).await?;
            let disk_trash_id = route.ops.move_to_trash(&route.rel_path).await?;
            let now = now_millis();
            let trash_id = self.trash.store_mount_reference(&path, disk_trash_id, meta.node_type, now);
            self.cache.invalidate(&path);
            self.handles.bump_generation(&path);
            self.events.publish(FsEvent { path, kind: FsEventKind::Deleted });
            self.persistence.write_trash(&self.trash.all()).await?;
            return Ok(trash_id);
        }
        if self.mounts.is_pending(&path) {
            return Err(FsError::NotMounted);
        }
        if self.handles.has_live_holder(&path) || self.locks.has_any_holder(&path) {
            return Err(FsError::Locked);
        }
        let now = now_millis();
        let mut tree = self.tree.write().await;
        let node = tree.get(&path)?.clone();
        tree.remove_node(&path)?;
        let trash_id = self.trash.store_in_memory(&path, node.clone(), now);
        let rollback_path = path.clone();
        if let Err(e) = self
            .append_wal_guarded(&mut tree, WalEntry::MoveToTrash { path: path.clone(), trash_id: trash_id.to_string() }, move |t| {
                let _ = t.insert_node(&rollback_path, node);
            })
            .await
        {
            let _ = self.trash.take(trash_id);
            return Err(e);
        }
        drop(tree);
        self.handles.bump_generation(&path);
        if let Some((p, _)) = path::split_parent(&path) {
            self.cache.invalidate_parent_listing(&p);
        }
        self.cache.invalidate(&path);
        self.events.publish(FsEvent { path, kind: FsEventKind::Deleted });
        self.persistence.write_trash(&self.trash.all()).await?;
        Ok(trash_id)
    }

    pub fn trash_list(&self) -> Vec<TrashInfo> {
        self.trash.list()
    }

    pub async fn trash_restore(&self, trash_id: Uuid) -> FsResult<()> {
        let item = self.trash.get(trash_id)?;
        if let Some(disk_trash_id) = &item.mount_disk_trash_id {
            let route = self.mounts.route(&item.original_path).ok_or(FsError::NotMounted)?;
            route.ops.restore_from_trash(disk_trash_id, &route.rel_path).await?;
            self.trash.take(trash_id)?;
            self.cache.invalidate(&item.original_path);
            self.events.publish(FsEvent { path: item.original_path.clone(), kind: FsEventKind::Created });
            self.persistence.write_trash(&self.trash.all()).await?;
            return Ok(());
        }
        let now = now_millis();
        let mut tree = self.tree.write().await;
        if tree.get(&item.original_path).is_ok() {
            return Err(FsError::AlreadyExists);
        }
        if let Some((parent, _)) = path::split_parent(&item.original_path) {
            if tree.get(&parent).is_err() {
                tree.create_dir_recursive(&parent, now)?;
            }
        }
        let payload = item.payload.clone().ok_or(FsError::NotFound)?;
        tree.insert_node(&item.original_path, payload)?;
        let taken = self.trash.take(trash_id)?;
        let rollback_path = item.original_path.clone();
        if let Err(e) = self
            .append_wal_guarded(&mut tree, WalEntry::RestoreFromTrash { trash_id: trash_id.to_string(), path: item.original_path.clone() }, move |t| {
                let _ = t.remove_node(&rollback_path);
            })
            .await
        {
            self.trash.reinsert(taken);
            return Err(e);
        }
        drop(tree);
        self.handles.bump_generation(&item.original_path);
        if let Some((p, _)) = path::split_parent(&item.original_path) {
            self.cache.invalidate_parent_listing(&p);
        }
        self.events.publish(FsEvent { path: item.original_path.clone(), kind: FsEventKind::Created });
        self.persistence.write_trash(&self.trash.all()).await?;
        Ok(())
    }

    pub async fn trash_purge(&self, trash_id: Uuid) -> FsResult<()> {
        let item = self.trash.take(trash_id)?;
        if let Some(disk_trash_id) = &item.mount_disk_trash_id {
            if let Some(route) = self.mounts.route(&item.original_path) {
                route.ops.purge_trash(disk_trash_id).await?;
            }
        } else {
            self.quota.release(item.size as i64);
        }
        self.persistence.write_trash(&self.trash.all()).await?;
        Ok(())
    }

    pub async fn trash_purge_all(&self) -> FsResult<()> {
        let items = self.trash.purge_all();
        let mut by_mount: HashMap<String, Arc<dyn DiskOps>> = HashMap::new();
        for item in &items {
            if item.mount_disk_trash_id.is_none() {
                self.quota.release(item.size as i64);
                continue;
            }
            if let Some(route) = self.mounts.route(&item.original_path) {
                by_mount.entry(route.virtual_path.clone()).or_insert(route.ops);
            }
        }
        for ops in by_mount.values() {
            ops.purge_all_trash().await?;
        }
        self.persistence.write_trash(&self.trash.all()).await?;
        Ok(())
    }

    // ---- quota / metrics --------------------------------------------------

    pub fn quota_used(&self) -> i64 {
        self.quota.used()
    }

    pub fn quota_limit(&self) -> i64 {
        self.quota.limit()
    }

    pub fn metrics_snapshot(&self, op: &str) -> Option<OpSnapshot> {
        self.metrics.snapshot(op)
    }

    pub fn metrics_total_bytes_read(&self) -> u64 {
        self.metrics.total_bytes_read()
    }

    pub fn metrics_total_bytes_written(&self) -> u64 {
        self.metrics.total_bytes_written()
    }

    pub fn metrics_reset(&self) {
        self.metrics.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileSystemConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MemStorage {
        data: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemStorage {
        fn new() -> Self {
            Self { data: Mutex::new(HashMap::new()) }
        }
    }

    #[async_trait]
    impl Storage for MemStorage {
        async fn read(&self, key: &str) -> FsResult<Option<Vec<u8>>> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }
        async fn write(&self, key: &str, bytes: Vec<u8>) -> FsResult<()> {
            self.data.lock().unwrap().insert(key.to_string(), bytes);
            Ok(())
        }
        async fn append(&self, key: &str, bytes: Vec<u8>) -> FsResult<()> {
            self.data.lock().unwrap().entry(key.to_string()).or_default().extend_from_slice(&bytes);
            Ok(())
        }
        async fn delete(&self, key: &str) -> FsResult<()> {
            self.data.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn new_fs() -> FileSystem {
        FileSystem::new(FileSystemConfig::default(), Arc::new(MemStorage::new()))
    }

    #[tokio::test]
    async fn create_write_read_round_trips() {
        let fs = new_fs();
        fs.create_dir("/d").await.unwrap();
        fs.create_file("/d/f.txt").await.unwrap();
        fs.write_all("/d/f.txt", b"Hello").await.unwrap();
        assert_eq!(fs.read_all("/d/f.txt").await.unwrap(), b"Hello");
        assert_eq!(fs.stat("/d/f.txt").await.unwrap().size, 5);
    }

    #[tokio::test]
    async fn second_write_captures_a_version_but_first_does_not() {
        let fs = new_fs();
        fs.create_file("/f").await.unwrap();
        fs.write_all("/f", b"v1").await.unwrap();
        assert!(fs.versions_list("/f").is_empty());
        fs.write_all("/f", b"version 2").await.unwrap();
        let versions = fs.versions_list("/f");
        assert_eq!(versions.len(), 1);
        assert_eq!(fs.versions_read("/f", versions[0].version_id).unwrap(), b"v1");
    }

    #[tokio::test]
    async fn delete_rejects_locked_file() {
        let fs = new_fs();
        fs.create_file("/f").await.unwrap();
        let h = fs.open("/f", OpenMode::ReadWrite).await.unwrap();
        fs.try_lock(h, LockMode::Exclusive).unwrap();
        assert_eq!(fs.delete("/f").await, Err(FsError::Locked));
        fs.close(h);
        fs.delete("/f").await.unwrap();
    }

    #[tokio::test]
    async fn trash_move_then_restore_round_trips() {
        let fs = new_fs();
        fs.create_file("/f").await.unwrap();
        fs.write_all("/f", b"keep me").await.unwrap();
        let id = fs.trash_move("/f").await.unwrap();
        assert!(fs.stat("/f").await.is_err());
        fs.trash_restore(id).await.unwrap();
        assert_eq!(fs.read_all("/f").await.unwrap(), b"keep me");
    }

    #[tokio::test]
    async fn quota_exceeded_on_oversized_write() {
        let config = FileSystemConfig { quota: 4, ..FileSystemConfig::default() };
        let fs = FileSystem::new(config, Arc::new(MemStorage::new()));
        fs.create_file("/f").await.unwrap();
        assert_eq!(fs.write_all("/f", b"too long").await, Err(FsError::QuotaExceeded));
        assert_eq!(fs.quota_used(), 0);
    }

    #[tokio::test]
    async fn recover_restores_tree_from_snapshot_and_wal() {
        let storage: Arc<dyn Storage> = Arc::new(MemStorage::new());
        {
            let fs = FileSystem::new(FileSystemConfig::default(), storage.clone());
            fs.recover().await.unwrap();
            fs.create_dir("/d").await.unwrap();
            fs.create_file("/d/f").await.unwrap();
            fs.write_all("/d/f", b"persisted").await.unwrap();
        }
        let fs2 = FileSystem::new(FileSystemConfig::default(), storage);
        fs2.recover().await.unwrap();
        assert_eq!(fs2.read_all("/d/f").await.unwrap(), b"persisted");
    }

    #[tokio::test]
    async fn search_and_checksum() {
        let fs = new_fs();
        fs.create_dir("/d").await.unwrap();
        fs.create_file("/d/a.txt").await.unwrap();
        fs.write_all("/d/a.txt", b"hello").await.unwrap();
        let matches = fs.search_find_by_name("/d", "*.txt").await.unwrap();
        assert_eq!(matches.len(), 1);
        let sum = fs.checksum_sha256("/d/a.txt").await.unwrap();
        assert_eq!(sum.len(), 64);
    }
}
