//! In-memory node tree with path routing (spec §4.2).
//!
//! `TreeStore` is plain, synchronous, and carries no locking of its own —
//! every access happens while the caller (normally `fs::FileSystem`) holds
//! the instance-wide write or read guard described in spec §5.

use crate::error::{FsError, FsResult};
use crate::node::{Block, DirNode, FileNode, FsEntry, FsMeta, Node, NodeType, SymlinkNode};
use crate::path;

/// In-memory node tree rooted at `/`.
pub struct TreeStore {
    root: Node,
    block_size: usize,
}

impl TreeStore {
    pub fn new(block_size: usize, now_millis: i64) -> Self {
        Self { root: Node::root(now_millis), block_size }
    }

    /// Replace the entire tree (used by snapshot restore).
    pub fn reset(&mut self, root: Node) {
        self.root = root;
    }

    pub fn root_node(&self) -> &Node {
        &self.root
    }

    /// Look up a node by its exact (non-symlink-following) path.
    pub fn get(&self, path: &str) -> FsResult<&Node> {
        if path == "/" {
            return Ok(&self.root);
        }
        let mut current = &self.root;
        for seg in path::split(path) {
            let dir = current.as_dir().ok_or(FsError::NotDirectory)?;
            current = dir.children.get(seg).ok_or(FsError::NotFound)?;
        }
        Ok(current)
    }

    fn get_mut(&mut self, path: &str) -> FsResult<&mut Node> {
        if path == "/" {
            return Ok(&mut self.root);
        }
        let mut current = &mut self.root;
        for seg in path::split(path) {
            let dir = current.as_dir_mut().ok_or(FsError::NotDirectory)?;
            current = dir.children.get_mut(seg).ok_or(FsError::NotFound)?;
        }
        Ok(current)
    }

    fn get_dir_mut(&mut self, path: &str) -> FsResult<&mut DirNode> {
        self.get_mut(path)?.as_dir_mut().ok_or(FsError::NotDirectory)
    }

    /// Resolve a path through any chain of symlinks (spec §4.2: stat/read/
    /// write follow the chain; max 40 hops by default).
    pub fn resolve_symlinks(&self, path: &str, max_hops: u32) -> FsResult<String> {
        let mut current = path.to_string();
        let mut hops = 0u32;
        loop {
            let node = self.get(&current)?;
            let target = match node {
                Node::Symlink(s) => s.target.clone(),
                _ => return Ok(current),
            };
            hops += 1;
            if hops > max_hops {
                return Err(FsError::SymlinkLoop);
            }
            let parent = path::split_parent(&current).map(|(p, _)| p).unwrap_or_else(|| "/".to_string());
            current = if target.starts_with('/') {
                path::normalize(&target)
            } else {
                path::normalize(&path::join(&parent, &target))
            };
        }
    }

    fn check_read(node: &Node) -> FsResult<()> {
        if node.meta().permissions.read {
            Ok(())
        } else {
            Err(FsError::PermissionDenied)
        }
    }

    fn check_write(node: &Node) -> FsResult<()> {
        if node.meta().permissions.write {
            Ok(())
        } else {
            Err(FsError::PermissionDenied)
        }
    }

    fn check_write_exec_dir(dir: &DirNode) -> FsResult<()> {
        if dir.meta.permissions.write && dir.meta.permissions.execute {
            Ok(())
        } else {
            Err(FsError::PermissionDenied)
        }
    }

    fn parent_dir(&self, parent_path: &str) -> FsResult<&DirNode> {
        self.get(parent_path)?.as_dir().ok_or(FsError::NotDirectory)
    }

    /// Create an empty regular file at `path`.
    pub fn create_file(&mut self, path: &str, now_millis: i64) -> FsResult<()> {
        let (parent_path, name) = path::split_parent(path).ok_or(FsError::AlreadyExists)?;
        {
            let parent = self.parent_dir(&parent_path)?;
            Self::check_write_exec_dir(parent)?;
            if parent.children.contains_key(name) {
                return Err(FsError::AlreadyExists);
            }
        }
        let parent_mut = self.get_dir_mut(&parent_path)?;
        parent_mut.children.insert(name.to_string(), Node::File(FileNode::new(name, now_millis)));
        Ok(())
    }

    /// Create a directory at `path`; the parent must already exist.
    pub fn create_dir(&mut self, path: &str, now_millis: i64) -> FsResult<()> {
        let (parent_path, name) = path::split_parent(path).ok_or(FsError::AlreadyExists)?;
        {
            let parent = self.parent_dir(&parent_path)?;
            Self::check_write_exec_dir(parent)?;
            if parent.children.contains_key(name) {
                return Err(FsError::AlreadyExists);
            }
        }
        let parent_mut = self.get_dir_mut(&parent_path)?;
        parent_mut.children.insert(name.to_string(), Node::Directory(DirNode::new(name, now_millis)));
        Ok(())
    }

    /// Create every missing directory along `path`; succeeds if it already
    /// exists as a directory, fails with `NotDirectory` if a component
    /// exists as something else.
    pub fn create_dir_recursive(&mut self, path: &str, now_millis: i64) -> FsResult<()> {
        let mut current = "/".to_string();
        for seg in path::split(path) {
            let next = path::join(&current, seg);
            match self.get(&next) {
                Ok(Node::Directory(_)) => {}
                Ok(_) => return Err(FsError::NotDirectory),
                Err(FsError::NotFound) => self.create_dir(&next, now_millis)?,
                Err(other) => return Err(other),
            }
            current = next;
        }
        Ok(())
    }

    /// Remove a single node. Fails if it is a non-empty directory
    /// (`PermissionDenied`, spec §4.2/§9 — the taxonomy has no dedicated
    /// "not empty" code) or carries a live lock holder (`Locked`), checked
    /// by the caller via `has_live_holder` before invoking this.
    pub fn delete(&mut self, path: &str) -> FsResult<()> {
        let (parent_path, name) = path::split_parent(path).ok_or(FsError::PermissionDenied)?;
        {
            let node = self.get(path)?;
            if let Some(dir) = node.as_dir() {
                if !dir.children.is_empty() {
                    return Err(FsError::PermissionDenied);
                }
            }
            let parent = self.parent_dir(&parent_path)?;
            Self::check_write_exec_dir(parent)?;
        }
        let parent_mut = self.get_dir_mut(&parent_path)?;
        parent_mut.children.remove(name);
        Ok(())
    }

    /// Remove a node and its entire subtree. Fails on root.
    pub fn delete_recursive(&mut self, path: &str) -> FsResult<()> {
        let (parent_path, name) = path::split_parent(path).ok_or(FsError::PermissionDenied)?;
        {
            self.get(path)?;
            let parent = self.parent_dir(&parent_path)?;
            Self::check_write_exec_dir(parent)?;
        }
        let parent_mut = self.get_dir_mut(&parent_path)?;
        parent_mut.children.remove(name);
        Ok(())
    }

    /// All paths in the subtree rooted at `path`, including `path` itself,
    /// depth-first. Used by callers that must check every descendant (e.g.
    /// for live lock holders) before `delete_recursive`.
    pub fn subtree_paths(&self, path: &str) -> FsResult<Vec<String>> {
        let node = self.get(path)?;
        let mut out = vec![path.to_string()];
        if let Some(dir) = node.as_dir() {
            for name in dir.children.keys() {
                let child_path = path::join(path, name);
                out.extend(self.subtree_paths(&child_path)?);
            }
        }
        Ok(out)
    }

    /// Move `src` to `dst` atomically within the tree. Fails if `dst`
    /// already exists.
    pub fn rename(&mut self, src: &str, dst: &str) -> FsResult<()> {
        if src == "/" {
            return Err(FsError::PermissionDenied);
        }
        let (src_parent, src_name) = path::split_parent(src).ok_or(FsError::PermissionDenied)?;
        let (dst_parent, dst_name) = path::split_parent(dst).ok_or(FsError::PermissionDenied)?;
        {
            let node = self.get(src)?;
            Self::check_write(node)?;
            let sp = self.parent_dir(&src_parent)?;
            Self::check_write_exec_dir(sp)?;
            let dp = self.parent_dir(&dst_parent)?;
            Self::check_write_exec_dir(dp)?;
            if dp.children.contains_key(dst_name) {
                return Err(FsError::AlreadyExists);
            }
        }
        let mut node = self.get_dir_mut(&src_parent)?.children.remove(src_name).ok_or(FsError::NotFound)?;
        node.meta_mut().name = dst_name.to_string();
        self.get_dir_mut(&dst_parent)?.children.insert(dst_name.to_string(), node);
        Ok(())
    }

    /// Recursively copy `src` to `dst`. Fails if `dst` already exists.
    pub fn copy(&mut self, src: &str, dst: &str, now_millis: i64) -> FsResult<()> {
        let (dst_parent, dst_name) = path::split_parent(dst).ok_or(FsError::PermissionDenied)?;
        let mut cloned = {
            let node = self.get(src)?;
            Self::check_read(node)?;
            let mut c = node.clone();
            c.meta_mut().name = dst_name.to_string();
            c.meta_mut().created_at_millis = now_millis;
            c.meta_mut().modified_at_millis = now_millis;
            c
        };
        if let Some(dir) = cloned.as_dir_mut() {
            if dir.mount.is_some() {
                return Err(FsError::PermissionDenied);
            }
        }
        {
            let dp = self.parent_dir(&dst_parent)?;
            Self::check_write_exec_dir(dp)?;
            if dp.children.contains_key(dst_name) {
                return Err(FsError::AlreadyExists);
            }
        }
        self.get_dir_mut(&dst_parent)?.children.insert(dst_name.to_string(), cloned);
        Ok(())
    }

    /// List the direct children of a directory, deterministically ordered
    /// by name (the `BTreeMap` backing storage already sorts by name).
    pub fn read_dir(&self, path: &str) -> FsResult<Vec<FsEntry>> {
        let node = self.get(path)?;
        Self::check_read(node)?;
        let dir = node.as_dir().ok_or(FsError::NotDirectory)?;
        Ok(dir
            .children
            .values()
            .map(|child| FsEntry { name: child.meta().name.clone(), node_type: child.node_type() })
            .collect())
    }

    /// Stat a node without following symlinks (the SYMLINK type itself is
    /// reported, per spec §4.2's `readDir` note; callers wanting the
    /// followed target call `resolve_symlinks` first).
    pub fn stat_raw(&self, path: &str) -> FsResult<FsMeta> {
        let node = self.get(path)?;
        Ok(FsMeta::from_node(node))
    }

    pub fn node_type(&self, path: &str) -> FsResult<NodeType> {
        Ok(self.get(path)?.node_type())
    }

    /// Read `len` bytes at `offset` from the file at `path` (no symlink
    /// following — callers resolve first). Reads past EOF return empty.
    pub fn read_at(&self, path: &str, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        let node = self.get(path)?;
        Self::check_read(node)?;
        let file = node.as_file().ok_or(FsError::NotFile)?;
        Ok(read_range(&file.blocks, offset, len))
    }

    /// Write `data` at `offset` into the file at `path`, zero-extending as
    /// needed. Returns the prior full content if this write replaces
    /// non-empty content (needed by the caller to push a version, spec
    /// §4.8) and the new size.
    pub fn write_at(&mut self, path: &str, offset: u64, data: &[u8], now_millis: i64) -> FsResult<(Vec<u8>, u64)> {
        let node = self.get_mut(path)?;
        Self::check_write(node)?;
        let file = node.as_file_mut().ok_or(FsError::NotFile)?;
        let prior = read_range(&file.blocks, 0, usize::MAX);
        write_range(&mut file.blocks, self.block_size, offset, data);
        file.recompute_size();
        file.meta.modified_at_millis = now_millis;
        Ok((prior, file.size))
    }

    pub fn create_symlink(&mut self, path: &str, target: &str, now_millis: i64) -> FsResult<()> {
        let (parent_path, name) = path::split_parent(path).ok_or(FsError::AlreadyExists)?;
        {
            let parent = self.parent_dir(&parent_path)?;
            Self::check_write_exec_dir(parent)?;
            if parent.children.contains_key(name) {
                return Err(FsError::AlreadyExists);
            }
        }
        let parent_mut = self.get_dir_mut(&parent_path)?;
        parent_mut
            .children
            .insert(name.to_string(), Node::Symlink(SymlinkNode::new(name, target, now_millis)));
        Ok(())
    }

    pub fn set_permissions(&mut self, path: &str, permissions: crate::node::Permissions, now_millis: i64) -> FsResult<()> {
        let node = self.get_mut(path)?;
        node.meta_mut().permissions = permissions;
        node.meta_mut().modified_at_millis = now_millis;
        Ok(())
    }

    pub fn set_xattr(&mut self, path: &str, key: &str, value: Vec<u8>) -> FsResult<()> {
        let node = self.get_mut(path)?;
        match node {
            Node::File(f) => {
                f.xattrs.insert(key.to_string(), value);
                Ok(())
            }
            Node::Directory(d) => {
                d.xattrs.insert(key.to_string(), value);
                Ok(())
            }
            Node::Symlink(_) => Err(FsError::NotFile),
        }
    }

    pub fn remove_xattr(&mut self, path: &str, key: &str) -> FsResult<()> {
        let node = self.get_mut(path)?;
        match node {
            Node::File(f) => {
                f.xattrs.remove(key);
                Ok(())
            }
            Node::Directory(d) => {
                d.xattrs.remove(key);
                Ok(())
            }
            Node::Symlink(_) => Err(FsError::NotFile),
        }
    }

    pub fn list_xattrs(&self, path: &str) -> FsResult<Vec<(String, Vec<u8>)>> {
        let node = self.get(path)?;
        match node {
            Node::File(f) => Ok(f.xattrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            Node::Directory(d) => Ok(d.xattrs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            Node::Symlink(_) => Err(FsError::NotFile),
        }
    }

    pub fn get_xattr(&self, path: &str, key: &str) -> FsResult<Option<Vec<u8>>> {
        let node = self.get(path)?;
        match node {
            Node::File(f) => Ok(f.xattrs.get(key).cloned()),
            Node::Directory(d) => Ok(d.xattrs.get(key).cloned()),
            Node::Symlink(_) => Err(FsError::NotFile),
        }
    }

    pub fn read_link(&self, path: &str) -> FsResult<String> {
        let node = self.get(path)?;
        Ok(node.as_symlink().ok_or(FsError::NotFile)?.target.clone())
    }

    /// Mark the directory at `path` as a mount point.
    pub fn set_mount(&mut self, path: &str, mount_id: Option<u64>) -> FsResult<()> {
        let node = self.get_mut(path)?;
        let dir = node.as_dir_mut().ok_or(FsError::NotDirectory)?;
        dir.mount = mount_id;
        Ok(())
    }

    /// Insert an arbitrary node at `path`, overwriting whatever (if
    /// anything) is already there. Used for trash restore and for
    /// WAL-failure rollback, which both need to place a previously-known
    /// node back without going through the user-facing create checks.
    pub fn insert_node(&mut self, path: &str, node: Node) -> FsResult<()> {
        let (parent_path, name) = path::split_parent(path).ok_or(FsError::PermissionDenied)?;
        let parent_mut = self.get_dir_mut(&parent_path)?;
        parent_mut.children.insert(name.to_string(), node);
        Ok(())
    }

    /// Remove and return whatever node is at `path`, regardless of type or
    /// emptiness (used by `trash::move_to_trash`, which may remove a
    /// non-empty directory, unlike the user-facing `delete`).
    pub fn remove_node(&mut self, path: &str) -> FsResult<Node> {
        if path == "/" {
            return Err(FsError::PermissionDenied);
        }
        let (parent_path, name) = path::split_parent(path).ok_or(FsError::PermissionDenied)?;
        self.get_dir_mut(&parent_path)?.children.remove(name).ok_or(FsError::NotFound)
    }
}

fn read_range(blocks: &[Block], offset: u64, len: usize) -> Vec<u8> {
    let total: u64 = blocks.iter().map(|b| b.len() as u64).sum();
    if offset >= total || len == 0 {
        return Vec::new();
    }
    let end = offset.saturating_add(len as u64).min(total);
    let mut out = Vec::with_capacity((end - offset) as usize);
    let mut pos = 0u64;
    for block in blocks {
        let block_start = pos;
        let block_end = pos + block.len() as u64;
        if block_end > offset && block_start < end {
            let start_in_block = offset.saturating_sub(block_start) as usize;
            let end_in_block = ((end - block_start).min(block.len() as u64)) as usize;
            out.extend_from_slice(&block.0[start_in_block..end_in_block]);
        }
        pos = block_end;
        if pos >= end {
            break;
        }
    }
    out
}

fn zero_extend(blocks: &mut Vec<Block>, block_size: usize, target_len: u64) {
    let mut total: u64 = blocks.iter().map(|b| b.len() as u64).sum();
    if total >= target_len {
        return;
    }
    if let Some(last) = blocks.last_mut() {
        if last.len() < block_size {
            let room = block_size - last.len();
            let add = room.min((target_len - total) as usize);
            last.0.resize(last.len() + add, 0);
            total += add as u64;
        }
    }
    while total < target_len {
        let add = block_size.min((target_len - total) as usize);
        blocks.push(Block(vec![0u8; add]));
        total += add as u64;
    }
}

fn write_range(blocks: &mut Vec<Block>, block_size: usize, offset: u64, data: &[u8]) {
    if data.is_empty() {
        return;
    }
    let needed_end = offset + data.len() as u64;
    zero_extend(blocks, block_size, needed_end);
    let mut pos = 0u64;
    let mut data_pos = 0usize;
    for block in blocks.iter_mut() {
        let block_start = pos;
        let block_len = block.len() as u64;
        pos += block_len;
        if data_pos >= data.len() {
            break;
        }
        if pos <= offset {
            continue;
        }
        let start_in_block = offset.saturating_sub(block_start) as usize;
        let count = (block.len() - start_in_block).min(data.len() - data_pos);
        block.0[start_in_block..start_in_block + count].copy_from_slice(&data[data_pos..data_pos + count]);
        data_pos += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_tree() -> TreeStore {
        TreeStore::new(64 * 1024, 0)
    }

    #[test]
    fn create_and_read_file() {
        let mut t = new_tree();
        t.create_dir("/d", 0).unwrap();
        t.create_file("/d/f.txt", 0).unwrap();
        t.write_at("/d/f.txt", 0, b"Hello", 0).unwrap();
        assert_eq!(t.read_at("/d/f.txt", 0, 100).unwrap(), b"Hello");
        assert_eq!(t.stat_raw("/d/f.txt").unwrap().size, 5);
    }

    #[test]
    fn write_spans_multiple_blocks() {
        let mut t = TreeStore::new(4, 0); // tiny blocks to exercise chunking
        t.create_file("/f", 0).unwrap();
        t.write_at("/f", 0, b"abcdefghij", 0).unwrap();
        assert_eq!(t.read_at("/f", 0, 100).unwrap(), b"abcdefghij");
        assert_eq!(t.read_at("/f", 3, 4).unwrap(), b"defg");
        assert_eq!(t.stat_raw("/f").unwrap().size, 10);
    }

    #[test]
    fn write_past_eof_zero_extends() {
        let mut t = TreeStore::new(4, 0);
        t.create_file("/f", 0).unwrap();
        t.write_at("/f", 0, b"ab", 0).unwrap();
        t.write_at("/f", 5, b"Z", 0).unwrap();
        let content = t.read_at("/f", 0, 100).unwrap();
        assert_eq!(content, vec![b'a', b'b', 0, 0, 0, b'Z']);
    }

    #[test]
    fn read_past_eof_is_empty() {
        let mut t = new_tree();
        t.create_file("/f", 0).unwrap();
        t.write_at("/f", 0, b"ab", 0).unwrap();
        assert_eq!(t.read_at("/f", 10, 5).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn delete_fails_on_nonempty_dir() {
        let mut t = new_tree();
        t.create_dir("/d", 0).unwrap();
        t.create_file("/d/f", 0).unwrap();
        assert!(t.delete("/d").is_err());
        t.delete("/d/f").unwrap();
        t.delete("/d").unwrap();
    }

    #[test]
    fn rename_moves_content() {
        let mut t = new_tree();
        t.create_file("/a", 0).unwrap();
        t.write_at("/a", 0, b"hi", 0).unwrap();
        t.rename("/a", "/b").unwrap();
        assert_eq!(t.get("/a"), Err(FsError::NotFound));
        assert_eq!(t.read_at("/b", 0, 10).unwrap(), b"hi");
    }

    #[test]
    fn copy_preserves_source() {
        let mut t = new_tree();
        t.create_file("/a", 0).unwrap();
        t.write_at("/a", 0, b"hi", 0).unwrap();
        t.copy("/a", "/b", 0).unwrap();
        assert_eq!(t.read_at("/a", 0, 10).unwrap(), b"hi");
        assert_eq!(t.read_at("/b", 0, 10).unwrap(), b"hi");
    }

    #[test]
    fn symlink_loop_detected() {
        let mut t = new_tree();
        t.create_symlink("/a", "/b", 0).unwrap();
        t.create_symlink("/b", "/a", 0).unwrap();
        assert_eq!(t.resolve_symlinks("/a", 40), Err(FsError::SymlinkLoop));
    }

    #[test]
    fn symlink_resolves_relative_target() {
        let mut t = new_tree();
        t.create_dir("/d", 0).unwrap();
        t.create_file("/d/real", 0).unwrap();
        t.create_symlink("/d/link", "real", 0).unwrap();
        assert_eq!(t.resolve_symlinks("/d/link", 40).unwrap(), "/d/real");
    }

    #[test]
    fn readdir_is_deterministic() {
        let mut t = new_tree();
        t.create_dir("/d", 0).unwrap();
        t.create_file("/d/b", 0).unwrap();
        t.create_file("/d/a", 0).unwrap();
        let entries: Vec<_> = t.read_dir("/d").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(entries, vec!["a".to_string(), "b".to_string()]);
    }
}
