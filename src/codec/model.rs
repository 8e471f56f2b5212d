//! Wire record types for Snapshot/WAL/Mounts/Versions/Trash (spec §4.12).
//!
//! [`crate::node::Node`] already derives `Serialize`/`Deserialize` and is
//! reused directly as the snapshot payload and as trash item payloads —
//! spec §4.12's recursive `SnapshotNode` description and `Node` describe the
//! same shape, so no separate struct is introduced for it.

use serde::{Deserialize, Serialize};

use crate::mount::MountRecord;
use crate::node::{Node, NodeType};
use crate::trash::TrashItem;
use crate::version::Version;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub root: Node,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountRecordWire {
    pub virtual_path: String,
    pub root_path: String,
    pub read_only: bool,
}

impl From<&MountRecord> for MountRecordWire {
    fn from(r: &MountRecord) -> Self {
        Self { virtual_path: r.virtual_path.clone(), root_path: r.root_path.clone(), read_only: r.read_only }
    }
}

impl From<MountRecordWire> for MountRecord {
    fn from(w: MountRecordWire) -> Self {
        Self { virtual_path: w.virtual_path, root_path: w.root_path, read_only: w.read_only }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountsRecord {
    pub mounts: Vec<MountRecordWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecordWire {
    pub version_id: String,
    pub source_path: String,
    pub timestamp_millis: i64,
    pub blob: Vec<u8>,
}

impl From<&Version> for VersionRecordWire {
    fn from(v: &Version) -> Self {
        Self { version_id: v.version_id.to_string(), source_path: v.source_path.clone(), timestamp_millis: v.timestamp_millis, blob: v.blob.clone() }
    }
}

impl TryFrom<VersionRecordWire> for Version {
    type Error = uuid::Error;

    fn try_from(w: VersionRecordWire) -> Result<Self, Self::Error> {
        Ok(Self { version_id: uuid::Uuid::parse_str(&w.version_id)?, timestamp_millis: w.timestamp_millis, blob: w.blob, source_path: w.source_path })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionsRecord {
    pub versions: Vec<VersionRecordWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashRecordWire {
    pub trash_id: String,
    pub original_path: String,
    pub node_type: NodeType,
    pub size: u64,
    pub deleted_at_millis: i64,
    pub payload: Option<Node>,
    pub mount_disk_trash_id: Option<String>,
}

impl From<&TrashItem> for TrashRecordWire {
    fn from(t: &TrashItem) -> Self {
        Self {
            trash_id: t.trash_id.to_string(),
            original_path: t.original_path.clone(),
            node_type: t.node_type,
            size: t.size,
            deleted_at_millis: t.deleted_at_millis,
            payload: t.payload.clone(),
            mount_disk_trash_id: t.mount_disk_trash_id.clone(),
        }
    }
}

impl TryFrom<TrashRecordWire> for TrashItem {
    type Error = uuid::Error;

    fn try_from(w: TrashRecordWire) -> Result<Self, Self::Error> {
        Ok(Self {
            trash_id: uuid::Uuid::parse_str(&w.trash_id)?,
            original_path: w.original_path,
            node_type: w.node_type,
            size: w.size,
            deleted_at_millis: w.deleted_at_millis,
            payload: w.payload,
            mount_disk_trash_id: w.mount_disk_trash_id,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrashRecord {
    pub items: Vec<TrashRecordWire>,
}

/// One mutation, as appended to the WAL (spec §4.12: 12 tagged variants).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalEntry {
    CreateFile { path: String },
    CreateDir { path: String },
    CreateSymlink { path: String, target: String },
    Delete { path: String },
    Write { path: String, offset: u64, bytes: Vec<u8> },
    SetPermissions { path: String, read: bool, write: bool, execute: bool },
    SetXattr { path: String, name: String, value: Vec<u8> },
    RemoveXattr { path: String, name: String },
    Copy { src: String, dst: String },
    Move { src: String, dst: String },
    MoveToTrash { path: String, trash_id: String },
    RestoreFromTrash { trash_id: String, path: String },
}
