//! In-memory tree data model (spec §3).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A fixed-size (except possibly the last) chunk of file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block(pub Vec<u8>);

impl Block {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Read/write/execute bits, applied uniformly regardless of owner (PicoFS
/// has no multi-user model; a single `{read,write,execute}` triple per
/// node is sufficient per spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Permissions {
    pub const fn all() -> Self {
        Self { read: true, write: true, execute: true }
    }

    pub const fn read_only() -> Self {
        Self { read: true, write: false, execute: false }
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::all()
    }
}

/// Fields common to every node variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub name: String,
    pub created_at_millis: i64,
    pub modified_at_millis: i64,
    pub permissions: Permissions,
}

impl NodeMeta {
    pub fn new(name: impl Into<String>, now_millis: i64) -> Self {
        Self {
            name: name.into(),
            created_at_millis: now_millis,
            modified_at_millis: now_millis,
            permissions: Permissions::default(),
        }
    }
}

/// A regular file: ordered blocks of content plus its extended attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub meta: NodeMeta,
    pub blocks: Vec<Block>,
    pub size: u64,
    pub xattrs: BTreeMap<String, Vec<u8>>,
}

impl FileNode {
    pub fn new(name: impl Into<String>, now_millis: i64) -> Self {
        Self {
            meta: NodeMeta::new(name, now_millis),
            blocks: Vec::new(),
            size: 0,
            xattrs: BTreeMap::new(),
        }
    }

    /// Invariant I3: size must equal the sum of block lengths.
    pub fn recompute_size(&mut self) {
        self.size = self.blocks.iter().map(|b| b.len() as u64).sum();
    }
}

/// A directory: an ordered-by-name mapping of child name to node, plus its
/// own extended attributes. `mount` is set when this directory is a mount
/// point (spec §3 I4) — its children are never materialized here; they are
/// served by the attached `DiskOps` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirNode {
    pub meta: NodeMeta,
    pub children: BTreeMap<String, Node>,
    pub xattrs: BTreeMap<String, Vec<u8>>,
    pub mount: Option<u64>,
}

impl DirNode {
    pub fn new(name: impl Into<String>, now_millis: i64) -> Self {
        Self {
            meta: NodeMeta::new(name, now_millis),
            children: BTreeMap::new(),
            xattrs: BTreeMap::new(),
            mount: None,
        }
    }
}

/// A symbolic link: a literal target with no existence check at creation
/// time (spec §4.9 — dangling links are legal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymlinkNode {
    pub meta: NodeMeta,
    pub target: String,
}

impl SymlinkNode {
    pub fn new(name: impl Into<String>, target: impl Into<String>, now_millis: i64) -> Self {
        Self { meta: NodeMeta::new(name, now_millis), target: target.into() }
    }
}

/// Tagged sum type for the three node kinds (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    File(FileNode),
    Directory(DirNode),
    Symlink(SymlinkNode),
}

/// A type-erased tag, used where callers only need to branch on kind
/// without pattern-matching the full payload (e.g. `readDir` results).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    File,
    Directory,
    Symlink,
}

impl Node {
    pub fn root(now_millis: i64) -> Self {
        Node::Directory(DirNode::new("", now_millis))
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Node::File(_) => NodeType::File,
            Node::Directory(_) => NodeType::Directory,
            Node::Symlink(_) => NodeType::Symlink,
        }
    }

    pub fn meta(&self) -> &NodeMeta {
        match self {
            Node::File(f) => &f.meta,
            Node::Directory(d) => &d.meta,
            Node::Symlink(s) => &s.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut NodeMeta {
        match self {
            Node::File(f) => &mut f.meta,
            Node::Directory(d) => &mut d.meta,
            Node::Symlink(s) => &mut s.meta,
        }
    }

    pub fn as_dir(&self) -> Option<&DirNode> {
        match self {
            Node::Directory(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_dir_mut(&mut self) -> Option<&mut DirNode> {
        match self {
            Node::Directory(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Node::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut FileNode> {
        match self {
            Node::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_symlink(&self) -> Option<&SymlinkNode> {
        match self {
            Node::Symlink(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Directory(_))
    }

    pub fn size(&self) -> u64 {
        match self {
            Node::File(f) => f.size,
            _ => 0,
        }
    }
}

/// Metadata snapshot returned by `stat`-like operations (separate from the
/// owned [`Node`] so the cache can hold it cheaply).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsMeta {
    pub name: String,
    pub node_type: NodeType,
    pub size: u64,
    pub created_at_millis: i64,
    pub modified_at_millis: i64,
    pub permissions: Permissions,
}

impl FsMeta {
    pub fn from_node(node: &Node) -> Self {
        let meta = node.meta();
        Self {
            name: meta.name.clone(),
            node_type: node.node_type(),
            size: node.size(),
            created_at_millis: meta.created_at_millis,
            modified_at_millis: meta.modified_at_millis,
            permissions: meta.permissions,
        }
    }
}

/// A single entry returned by `readDir` (spec §4.2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FsEntry {
    pub name: String,
    pub node_type: NodeType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_size_matches_block_sum() {
        let mut f = FileNode::new("a.txt", 0);
        f.blocks.push(Block(vec![1, 2, 3]));
        f.blocks.push(Block(vec![4, 5]));
        f.recompute_size();
        assert_eq!(f.size, 5);
    }

    #[test]
    fn directory_children_are_name_unique_by_construction() {
        let mut d = DirNode::new("d", 0);
        d.children.insert("a".into(), Node::File(FileNode::new("a", 0)));
        d.children.insert("a".into(), Node::File(FileNode::new("a", 1)));
        assert_eq!(d.children.len(), 1);
    }
}
