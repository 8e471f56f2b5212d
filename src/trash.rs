//! Soft-delete with restore (spec §4.10).
//!
//! In-memory subtrees are serialised as owned [`Node`] clones (which already
//! derive `Serialize`/`Deserialize` for persistence, so no separate wire
//! type is needed here). Mount-path trash items instead carry a
//! backend-assigned trash id and no in-memory payload — their content stays
//! on disk under the mount's own `.trash/` hook.

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::{FsError, FsResult};
use crate::node::{Node, NodeType};

/// One trashed item, in-memory or mount-delegated.
#[derive(Clone)]
pub struct TrashItem {
    pub trash_id: Uuid,
    pub original_path: String,
    pub node_type: NodeType,
    pub size: u64,
    pub deleted_at_millis: i64,
    pub payload: Option<Node>,
    pub mount_disk_trash_id: Option<String>,
}

/// Metadata-only view returned by `list`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrashInfo {
    pub trash_id: Uuid,
    pub original_path: String,
    pub node_type: NodeType,
    pub size: u64,
    pub deleted_at_millis: i64,
    pub is_mounted: bool,
}

pub struct TrashManager {
    items: DashMap<Uuid, TrashItem>,
}

impl TrashManager {
    pub fn new() -> Self {
        Self { items: DashMap::new() }
    }

    /// Record an in-memory subtree that was just removed from the tree.
    pub fn store_in_memory(&self, original_path: &str, payload: Node, now_millis: i64) -> Uuid {
        let node_type = payload.node_type();
        let size = subtree_size(&payload);
        let trash_id = Uuid::new_v4();
        self.items.insert(
            trash_id,
            TrashItem {
                trash_id,
                original_path: original_path.to_string(),
                node_type,
                size,
                deleted_at_millis: now_millis,
                payload: Some(payload),
                mount_disk_trash_id: None,
            },
        );
        trash_id
    }

    /// Record a mount-delegated trash entry whose content lives on disk.
    pub fn store_mount_reference(&self, original_path: &str, disk_trash_id: String, node_type: NodeType, now_millis: i64) -> Uuid {
        let trash_id = Uuid::new_v4();
        self.items.insert(
            trash_id,
            TrashItem {
                trash_id,
                original_path: original_path.to_string(),
                node_type,
                size: 0,
                deleted_at_millis: now_millis,
                payload: None,
                mount_disk_trash_id: Some(disk_trash_id),
            },
        );
        trash_id
    }

    pub fn list(&self) -> Vec<TrashInfo> {
        let mut out: Vec<TrashInfo> = self
            .items
            .iter()
            .map(|e| TrashInfo {
                trash_id: e.trash_id,
                original_path: e.original_path.clone(),
                node_type: e.node_type,
                size: e.size,
                deleted_at_millis: e.deleted_at_millis,
                is_mounted: e.mount_disk_trash_id.is_some(),
            })
            .collect();
        out.sort_by(|a, b| b.deleted_at_millis.cmp(&a.deleted_at_millis));
        out
    }

    pub fn get(&self, trash_id: Uuid) -> FsResult<TrashItem> {
        self.items.get(&trash_id).map(|e| e.clone()).ok_or(FsError::NotFound)
    }

    /// Remove and return an item (used by both `restore` and `purge`).
    pub fn take(&self, trash_id: Uuid) -> FsResult<TrashItem> {
        self.items.remove(&trash_id).map(|(_, item)| item).ok_or(FsError::NotFound)
    }

    pub fn purge_all(&self) -> Vec<TrashItem> {
        let ids: Vec<Uuid> = self.items.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter_map(|id| self.items.remove(&id).map(|(_, item)| item)).collect()
    }

    /// Total bytes charged by in-memory trash payloads (spec I5).
    pub fn total_bytes(&self) -> i64 {
        self.items.iter().filter(|e| e.payload.is_some()).map(|e| e.size as i64).sum()
    }

    pub fn clear(&self) {
        self.items.clear();
    }

    pub fn all(&self) -> Vec<TrashItem> {
        self.items.iter().map(|e| e.value().clone()).collect()
    }

    pub fn restore_all(&self, items: Vec<TrashItem>) {
        self.items.clear();
        for item in items {
            self.items.insert(item.trash_id, item);
        }
    }

    /// Put a single previously-taken item back without touching any other
    /// entry (used to undo a `take` on a failed WAL append).
    pub fn reinsert(&self, item: TrashItem) {
        self.items.insert(item.trash_id, item);
    }
}

impl Default for TrashManager {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn subtree_size(node: &Node) -> u64 {
    match node {
        Node::File(f) => f.size,
        Node::Directory(d) => d.children.values().map(subtree_size).sum(),
        Node::Symlink(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::FileNode;

    #[test]
    fn store_then_list_newest_first() {
        let trash = TrashManager::new();
        trash.store_in_memory("/a", Node::File(FileNode::new("a", 0)), 100);
        trash.store_in_memory("/b", Node::File(FileNode::new("b", 0)), 200);
        let list = trash.list();
        assert_eq!(list[0].original_path, "/b");
        assert_eq!(list[1].original_path, "/a");
    }

    #[test]
    fn take_removes_item() {
        let trash = TrashManager::new();
        let mut file = FileNode::new("a", 0);
        file.blocks.push(crate::node::Block(vec![1, 2, 3]));
        file.recompute_size();
        let id = trash.store_in_memory("/a", Node::File(file), 0);
        assert_eq!(trash.list()[0].size, 3);
        let item = trash.take(id).unwrap();
        assert_eq!(item.original_path, "/a");
        assert_eq!(trash.take(id), Err(FsError::NotFound));
    }
}
