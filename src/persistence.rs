//! Host storage contract plus snapshot/WAL persistence (spec §4.13).

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::codec::model::{MountsRecord, SnapshotRecord, TrashRecord, VersionsRecord, WalEntry};
use crate::codec::{self, cbor, tlv};
use crate::config::WireCodec;
use crate::error::FsResult;
use crate::mount::MountRecord;
use crate::node::Node;
use crate::trash::TrashItem;
use crate::version::Version;

pub const KEY_SNAPSHOT: &str = "vfs_snapshot";
pub const KEY_WAL: &str = "vfs_wal";
pub const KEY_MOUNTS: &str = "vfs_mounts";
pub const KEY_VERSIONS: &str = "vfs_versions";
pub const KEY_TRASH: &str = "vfs_trash";

/// Host-supplied key/value storage backing persistence. Implementations are
/// assumed durable for a single key write but need not be transactional
/// across keys.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, key: &str) -> FsResult<Option<Vec<u8>>>;
    async fn write(&self, key: &str, bytes: Vec<u8>) -> FsResult<()>;
    async fn append(&self, key: &str, bytes: Vec<u8>) -> FsResult<()>;
    async fn delete(&self, key: &str) -> FsResult<()>;
}

/// Orchestrates snapshot + WAL persistence over a [`Storage`] backend,
/// fail-soft on corruption per spec §4.13/§7.
pub struct Persistence {
    storage: std::sync::Arc<dyn Storage>,
    codec: WireCodec,
    snapshot_threshold: u32,
    appends_since_snapshot: AtomicU32,
}

impl Persistence {
    pub fn new(storage: std::sync::Arc<dyn Storage>, codec: WireCodec, snapshot_threshold: u32) -> Self {
        Self { storage, codec, snapshot_threshold, appends_since_snapshot: AtomicU32::new(0) }
    }

    fn encode_snapshot(&self, root: &Node) -> Vec<u8> {
        let record = SnapshotRecord { root: root.clone() };
        match self.codec {
            WireCodec::Cbor => cbor::encode(&record).unwrap_or_default(),
            WireCodec::Tlv => tlv::encode_snapshot(&record),
        }
    }

    fn decode_snapshot(&self, bytes: &[u8]) -> FsResult<Node> {
        match self.codec {
            WireCodec::Cbor => cbor::decode::<SnapshotRecord>(bytes).map(|r| r.root),
            WireCodec::Tlv => tlv::decode_snapshot(bytes).map(|r| r.root),
        }
    }

    fn encode_wal_entry(&self, entry: &WalEntry) -> Vec<u8> {
        match self.codec {
            WireCodec::Cbor => cbor::encode(entry).unwrap_or_default(),
            WireCodec::Tlv => tlv::encode_wal_entry(entry),
        }
    }

    fn decode_wal_entry(&self, bytes: &[u8]) -> FsResult<WalEntry> {
        match self.codec {
            WireCodec::Cbor => cbor::decode(bytes),
            WireCodec::Tlv => tlv::decode_wal_entry(bytes),
        }
    }

    fn encode_mounts(&self, mounts: &[MountRecord]) -> Vec<u8> {
        let record = MountsRecord { mounts: mounts.iter().map(Into::into).collect() };
        match self.codec {
            WireCodec::Cbor => cbor::encode(&record).unwrap_or_default(),
            WireCodec::Tlv => tlv::encode_mounts(&record),
        }
    }

    fn decode_mounts(&self, bytes: &[u8]) -> FsResult<Vec<MountRecord>> {
        match self.codec {
            WireCodec::Cbor => cbor::decode::<MountsRecord>(bytes).map(|r| r.mounts.into_iter().map(Into::into).collect()),
            WireCodec::Tlv => tlv::decode_mounts(bytes).map(|r| r.mounts.into_iter().map(Into::into).collect()),
        }
    }

    fn encode_versions(&self, versions: &[Version]) -> Vec<u8> {
        let record = VersionsRecord { versions: versions.iter().map(Into::into).collect() };
        match self.codec {
            WireCodec::Cbor => cbor::encode(&record).unwrap_or_default(),
            WireCodec::Tlv => tlv::encode_versions(&record),
        }
    }

    fn decode_versions(&self, bytes: &[u8]) -> FsResult<Vec<Version>> {
        match self.codec {
            WireCodec::Cbor => cbor::decode::<VersionsRecord>(bytes).map(|r| r.versions.into_iter().filter_map(|w| w.try_into().ok()).collect()),
            WireCodec::Tlv => tlv::decode_versions(bytes),
        }
    }

    fn encode_trash(&self, items: &[TrashItem]) -> Vec<u8> {
        let record = TrashRecord { items: items.iter().map(Into::into).collect() };
        match self.codec {
            WireCodec::Cbor => cbor::encode(&record).unwrap_or_default(),
            WireCodec::Tlv => tlv::encode_trash(&record),
        }
    }

    fn decode_trash(&self, bytes: &[u8]) -> FsResult<Vec<TrashItem>> {
        match self.codec {
            WireCodec::Cbor => cbor::decode::<TrashRecord>(bytes).map(|r| r.items.into_iter().filter_map(|w| w.try_into().ok()).collect()),
            WireCodec::Tlv => tlv::decode_trash(bytes),
        }
    }

    /// Step 1 of recovery: read and decode the snapshot, degrading to
    /// `default_root` on any CRC/decode failure.
    pub async fn load_snapshot(&self, default_root: Node) -> FsResult<Node> {
        let Some(bytes) = self.storage.read(KEY_SNAPSHOT).await? else {
            return Ok(default_root);
        };
        match codec::unframe_single(&bytes) {
            Ok(payload) => Ok(self.decode_snapshot(&payload).unwrap_or_else(|| {
                tracing::warn!("snapshot failed to decode, falling back to default root");
                default_root
            })),
            Err(_) => {
                tracing::warn!("snapshot frame failed crc check, falling back to default root");
                Ok(default_root)
            }
        }
    }

    /// Step 2: replay the WAL, skipping any record whose CRC fails or whose
    /// payload doesn't decode to a known variant. Order is preserved.
    pub async fn load_wal_entries(&self) -> FsResult<Vec<WalEntry>> {
        let Some(bytes) = self.storage.read(KEY_WAL).await? else {
            return Ok(Vec::new());
        };
        let payloads = codec::scan_wal_records(&bytes);
        let total = payloads.len();
        let entries: Vec<WalEntry> = payloads.into_iter().filter_map(|p| self.decode_wal_entry(&p).ok()).collect();
        if entries.len() < total {
            tracing::warn!(skipped = total - entries.len(), "skipped corrupt wal records during replay");
        }
        Ok(entries)
    }

    /// Step 3: read Mounts/Versions/Trash, each fail-soft to empty.
    pub async fn load_mounts(&self) -> FsResult<Vec<MountRecord>> {
        let Some(bytes) = self.storage.read(KEY_MOUNTS).await? else { return Ok(Vec::new()) };
        Ok(codec::unframe_single(&bytes).ok().and_then(|p| self.decode_mounts(&p).ok()).unwrap_or_default())
    }

    pub async fn load_versions(&self) -> FsResult<Vec<Version>> {
        let Some(bytes) = self.storage.read(KEY_VERSIONS).await? else { return Ok(Vec::new()) };
        Ok(codec::unframe_single(&bytes).ok().and_then(|p| self.decode_versions(&p).ok()).unwrap_or_default())
    }

    pub async fn load_trash(&self) -> FsResult<Vec<TrashItem>> {
        let Some(bytes) = self.storage.read(KEY_TRASH).await? else { return Ok(Vec::new()) };
        Ok(codec::unframe_single(&bytes).ok().and_then(|p| self.decode_trash(&p).ok()).unwrap_or_default())
    }

    /// Append one WAL record. Returns `true` if the auto-snapshot threshold
    /// has now been reached (the caller should then call
    /// [`Self::write_snapshot`] and [`Self::truncate_wal`]).
    pub async fn append_wal(&self, entry: &WalEntry) -> FsResult<bool> {
        let payload = self.encode_wal_entry(entry);
        let framed = codec::append_wal_record(&payload);
        self.storage.append(KEY_WAL, framed).await?;
        let count = self.appends_since_snapshot.fetch_add(1, Ordering::AcqRel) + 1;
        Ok(count >= self.snapshot_threshold)
    }

    /// Write a full snapshot, then truncate the WAL (only after the
    /// snapshot succeeds, so a crash in between is idempotent on replay).
    pub async fn write_snapshot(&self, root: &Node) -> FsResult<()> {
        let framed = codec::frame_single(&self.encode_snapshot(root));
        self.storage.write(KEY_SNAPSHOT, framed).await?;
        self.storage.write(KEY_WAL, Vec::new()).await?;
        self.appends_since_snapshot.store(0, Ordering::Release);
        Ok(())
    }

    pub async fn write_mounts(&self, mounts: &[MountRecord]) -> FsResult<()> {
        let framed = codec::frame_single(&self.encode_mounts(mounts));
        self.storage.write(KEY_MOUNTS, framed).await
    }

    pub async fn write_versions(&self, versions: &[Version]) -> FsResult<()> {
        let framed = codec::frame_single(&self.encode_versions(versions));
        self.storage.write(KEY_VERSIONS, framed).await
    }

    pub async fn write_trash(&self, items: &[TrashItem]) -> FsResult<()> {
        let framed = codec::frame_single(&self.encode_trash(items));
        self.storage.write(KEY_TRASH, framed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{DirNode, FileNode};
    use dashmap::DashMap;

    struct MemStorage {
        data: DashMap<String, Vec<u8>>,
    }

    impl MemStorage {
        fn new() -> Self {
            Self { data: DashMap::new() }
        }
    }

    #[async_trait]
    impl Storage for MemStorage {
        async fn read(&self, key: &str) -> FsResult<Option<Vec<u8>>> {
            Ok(self.data.get(key).map(|v| v.clone()))
        }
        async fn write(&self, key: &str, bytes: Vec<u8>) -> FsResult<()> {
            self.data.insert(key.to_string(), bytes);
            Ok(())
        }
        async fn append(&self, key: &str, bytes: Vec<u8>) -> FsResult<()> {
            self.data.entry(key.to_string()).or_default().extend_from_slice(&bytes);
            Ok(())
        }
        async fn delete(&self, key: &str) -> FsResult<()> {
            self.data.remove(key);
            Ok(())
        }
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_storage() {
        let storage = std::sync::Arc::new(MemStorage::new());
        let persistence = Persistence::new(storage, WireCodec::Cbor, 100);
        let mut root = DirNode::new("", 0);
        root.children.insert("f".into(), Node::File(FileNode::new("f", 0)));
        let root = Node::Directory(root);
        persistence.write_snapshot(&root).await.unwrap();
        let loaded = persistence.load_snapshot(Node::root(0)).await.unwrap();
        assert_eq!(loaded, root);
    }

    #[tokio::test]
    async fn corrupted_snapshot_degrades_to_default() {
        let storage = std::sync::Arc::new(MemStorage::new());
        storage.write(KEY_SNAPSHOT, vec![1, 2, 3, 4, 5]).await.unwrap();
        let persistence = Persistence::new(storage, WireCodec::Cbor, 100);
        let loaded = persistence.load_snapshot(Node::root(0)).await.unwrap();
        assert_eq!(loaded, Node::root(0));
    }

    #[tokio::test]
    async fn wal_replay_skips_corrupt_record() {
        let storage = std::sync::Arc::new(MemStorage::new());
        let persistence = Persistence::new(storage.clone(), WireCodec::Tlv, 100);
        persistence.append_wal(&WalEntry::CreateFile { path: "/a".into() }).await.unwrap();
        // Corrupt the WAL by overwriting with garbage of the same general shape
        storage.write(KEY_WAL, vec![9; 20]).await.unwrap();
        let entries = persistence.load_wal_entries().await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn threshold_triggers_after_n_appends() {
        let storage = std::sync::Arc::new(MemStorage::new());
        let persistence = Persistence::new(storage, WireCodec::Tlv, 2);
        let hit1 = persistence.append_wal(&WalEntry::CreateFile { path: "/a".into() }).await.unwrap();
        assert!(!hit1);
        let hit2 = persistence.append_wal(&WalEntry::CreateFile { path: "/b".into() }).await.unwrap();
        assert!(hit2);
    }
}
