//! Hand-rolled tag/length/value wire codec (spec §4.12). Unlike the CBOR
//! codec this is purpose-built for our five concrete wire records rather
//! than generic over any `Serialize` type — every field is a varint length
//! (or a single tag byte) followed immediately by its value, with none of
//! CBOR's self-describing major-type headers, which is what keeps it
//! strictly smaller (spec P8).

use std::collections::BTreeMap;

use crate::error::{FsError, FsResult};
use crate::mount::MountRecord;
use crate::node::{Block, DirNode, FileNode, Node, NodeMeta, NodeType, Permissions, SymlinkNode};
use crate::trash::TrashItem;
use crate::version::Version;

use super::model::{MountsRecord, SnapshotRecord, TrashRecord, VersionsRecord, WalEntry};

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn varint(&mut self, mut v: u64) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                self.buf.push(byte | 0x80);
            } else {
                self.buf.push(byte);
                break;
            }
        }
    }

    fn i64(&mut self, v: i64) {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        self.varint(zigzag);
    }

    fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    fn bytes(&mut self, data: &[u8]) {
        self.varint(data.len() as u64);
        self.buf.extend_from_slice(data);
    }

    fn str(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }

    fn option<T>(&mut self, value: &Option<T>, write_some: impl FnOnce(&mut Self, &T)) {
        match value {
            None => self.buf.push(0),
            Some(v) => {
                self.buf.push(1);
                write_some(self, v);
            }
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn varint(&mut self) -> FsResult<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            if self.pos >= self.bytes.len() || shift > 63 {
                return Err(FsError::Unknown);
            }
            let b = self.bytes[self.pos];
            self.pos += 1;
            result |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        Ok(result)
    }

    fn i64(&mut self) -> FsResult<i64> {
        let zigzag = self.varint()?;
        Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
    }

    fn bool(&mut self) -> FsResult<bool> {
        let b = self.byte()?;
        Ok(b != 0)
    }

    fn byte(&mut self) -> FsResult<u8> {
        let b = *self.bytes.get(self.pos).ok_or(FsError::Unknown)?;
        self.pos += 1;
        Ok(b)
    }

    fn bytes_field(&mut self) -> FsResult<Vec<u8>> {
        let len = self.varint()? as usize;
        if self.pos + len > self.bytes.len() {
            return Err(FsError::Unknown);
        }
        let out = self.bytes[self.pos..self.pos + len].to_vec();
        self.pos += len;
        Ok(out)
    }

    fn str_field(&mut self) -> FsResult<String> {
        String::from_utf8(self.bytes_field()?).map_err(|_| FsError::Unknown)
    }

    fn option<T>(&mut self, read_some: impl FnOnce(&mut Self) -> FsResult<T>) -> FsResult<Option<T>> {
        match self.byte()? {
            0 => Ok(None),
            1 => Ok(Some(read_some(self)?)),
            _ => Err(FsError::Unknown),
        }
    }
}

fn write_permissions(w: &mut Writer, p: &Permissions) {
    w.bool(p.read);
    w.bool(p.write);
    w.bool(p.execute);
}

fn read_permissions(r: &mut Reader) -> FsResult<Permissions> {
    Ok(Permissions { read: r.bool()?, write: r.bool()?, execute: r.bool()? })
}

fn write_meta(w: &mut Writer, meta: &NodeMeta) {
    w.str(&meta.name);
    w.i64(meta.created_at_millis);
    w.i64(meta.modified_at_millis);
    write_permissions(w, &meta.permissions);
}

fn read_meta(r: &mut Reader) -> FsResult<NodeMeta> {
    Ok(NodeMeta {
        name: r.str_field()?,
        created_at_millis: r.i64()?,
        modified_at_millis: r.i64()?,
        permissions: read_permissions(r)?,
    })
}

fn write_xattrs(w: &mut Writer, xattrs: &BTreeMap<String, Vec<u8>>) {
    w.varint(xattrs.len() as u64);
    for (k, v) in xattrs {
        w.str(k);
        w.bytes(v);
    }
}

fn read_xattrs(r: &mut Reader) -> FsResult<BTreeMap<String, Vec<u8>>> {
    let count = r.varint()?;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let k = r.str_field()?;
        let v = r.bytes_field()?;
        map.insert(k, v);
    }
    Ok(map)
}

fn write_node(w: &mut Writer, node: &Node) {
    match node {
        Node::File(f) => {
            w.buf.push(0);
            write_meta(w, &f.meta);
            w.varint(f.blocks.len() as u64);
            for block in &f.blocks {
                w.bytes(&block.0);
            }
            w.varint(f.size);
            write_xattrs(w, &f.xattrs);
        }
        Node::Directory(d) => {
            w.buf.push(1);
            write_meta(w, &d.meta);
            w.varint(d.children.len() as u64);
            for (name, child) in &d.children {
                w.str(name);
                write_node(w, child);
            }
            write_xattrs(w, &d.xattrs);
            w.option(&d.mount, |w, id| w.varint(*id));
        }
        Node::Symlink(s) => {
            w.buf.push(2);
            write_meta(w, &s.meta);
            w.str(&s.target);
        }
    }
}

fn read_node(r: &mut Reader) -> FsResult<Node> {
    match r.byte()? {
        0 => {
            let meta = read_meta(r)?;
            let block_count = r.varint()?;
            let mut blocks = Vec::with_capacity(block_count as usize);
            for _ in 0..block_count {
                blocks.push(Block(r.bytes_field()?));
            }
            let size = r.varint()?;
            let xattrs = read_xattrs(r)?;
            Ok(Node::File(FileNode { meta, blocks, size, xattrs }))
        }
        1 => {
            let meta = read_meta(r)?;
            let child_count = r.varint()?;
            let mut children = BTreeMap::new();
            for _ in 0..child_count {
                let name = r.str_field()?;
                let child = read_node(r)?;
                children.insert(name, child);
            }
            let xattrs = read_xattrs(r)?;
            let mount = r.option(|r| r.varint())?;
            Ok(Node::Directory(DirNode { meta, children, xattrs, mount }))
        }
        2 => {
            let meta = read_meta(r)?;
            let target = r.str_field()?;
            Ok(Node::Symlink(SymlinkNode { meta, target }))
        }
        _ => Err(FsError::Unknown),
    }
}

pub fn encode_snapshot(record: &SnapshotRecord) -> Vec<u8> {
    let mut w = Writer::new();
    write_node(&mut w, &record.root);
    w.buf
}

pub fn decode_snapshot(bytes: &[u8]) -> FsResult<SnapshotRecord> {
    let mut r = Reader::new(bytes);
    Ok(SnapshotRecord { root: read_node(&mut r)? })
}

pub fn encode_mounts(record: &MountsRecord) -> Vec<u8> {
    let mut w = Writer::new();
    w.varint(record.mounts.len() as u64);
    for m in &record.mounts {
        w.str(&m.virtual_path);
        w.str(&m.root_path);
        w.bool(m.read_only);
    }
    w.buf
}

pub fn decode_mounts(bytes: &[u8]) -> FsResult<MountsRecord> {
    let mut r = Reader::new(bytes);
    let count = r.varint()?;
    let mut mounts = Vec::with_capacity(count as usize);
    for _ in 0..count {
        mounts.push(MountRecord { virtual_path: r.str_field()?, root_path: r.str_field()?, read_only: r.bool()? });
    }
    Ok(MountsRecord { mounts: mounts.iter().map(Into::into).collect() })
}

pub fn encode_versions(record: &VersionsRecord) -> Vec<u8> {
    let mut w = Writer::new();
    w.varint(record.versions.len() as u64);
    for v in &record.versions {
        w.str(&v.version_id);
        w.str(&v.source_path);
        w.i64(v.timestamp_millis);
        w.bytes(&v.blob);
    }
    w.buf
}

pub fn decode_versions(bytes: &[u8]) -> FsResult<Vec<Version>> {
    let mut r = Reader::new(bytes);
    let count = r.varint()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let version_id = r.str_field()?;
        let source_path = r.str_field()?;
        let timestamp_millis = r.i64()?;
        let blob = r.bytes_field()?;
        let version_id = uuid::Uuid::parse_str(&version_id).map_err(|_| FsError::Unknown)?;
        out.push(Version { version_id, source_path, timestamp_millis, blob });
    }
    Ok(out)
}

pub fn encode_trash(record: &TrashRecord) -> Vec<u8> {
    let mut w = Writer::new();
    w.varint(record.items.len() as u64);
    for item in &record.items {
        w.str(&item.trash_id);
        w.str(&item.original_path);
        w.buf.push(node_type_tag(item.node_type));
        w.varint(item.size);
        w.i64(item.deleted_at_millis);
        w.option(&item.payload, |w, n| write_node(w, n));
        w.option(&item.mount_disk_trash_id, |w, s| w.str(s));
    }
    w.buf
}

pub fn decode_trash(bytes: &[u8]) -> FsResult<Vec<TrashItem>> {
    let mut r = Reader::new(bytes);
    let count = r.varint()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let trash_id = r.str_field()?;
        let original_path = r.str_field()?;
        let node_type = node_type_from_tag(r.byte()?)?;
        let size = r.varint()?;
        let deleted_at_millis = r.i64()?;
        let payload = r.option(|r| read_node(r))?;
        let mount_disk_trash_id = r.option(|r| r.str_field())?;
        let trash_id = uuid::Uuid::parse_str(&trash_id).map_err(|_| FsError::Unknown)?;
        out.push(TrashItem { trash_id, original_path, node_type, size, deleted_at_millis, payload, mount_disk_trash_id });
    }
    Ok(out)
}

fn node_type_tag(t: NodeType) -> u8 {
    match t {
        NodeType::File => 0,
        NodeType::Directory => 1,
        NodeType::Symlink => 2,
    }
}

fn node_type_from_tag(tag: u8) -> FsResult<NodeType> {
    match tag {
        0 => Ok(NodeType::File),
        1 => Ok(NodeType::Directory),
        2 => Ok(NodeType::Symlink),
        _ => Err(FsError::Unknown),
    }
}

pub fn encode_wal_entry(entry: &WalEntry) -> Vec<u8> {
    let mut w = Writer::new();
    match entry {
        WalEntry::CreateFile { path } => {
            w.buf.push(0);
            w.str(path);
        }
        WalEntry::CreateDir { path } => {
            w.buf.push(1);
            w.str(path);
        }
        WalEntry::CreateSymlink { path, target } => {
            w.buf.push(2);
            w.str(path);
            w.str(target);
        }
        WalEntry::Delete { path } => {
            w.buf.push(3);
            w.str(path);
        }
        WalEntry::Write { path, offset, bytes } => {
            w.buf.push(4);
            w.str(path);
            w.varint(*offset);
            w.bytes(bytes);
        }
        WalEntry::SetPermissions { path, read, write, execute } => {
            w.buf.push(5);
            w.str(path);
            w.bool(*read);
            w.bool(*write);
            w.bool(*execute);
        }
        WalEntry::SetXattr { path, name, value } => {
            w.buf.push(6);
            w.str(path);
            w.str(name);
            w.bytes(value);
        }
        WalEntry::RemoveXattr { path, name } => {
            w.buf.push(7);
            w.str(path);
            w.str(name);
        }
        WalEntry::Copy { src, dst } => {
            w.buf.push(8);
            w.str(src);
            w.str(dst);
        }
        WalEntry::Move { src, dst } => {
            w.buf.push(9);
            w.str(src);
            w.str(dst);
        }
        WalEntry::MoveToTrash { path, trash_id } => {
            w.buf.push(10);
            w.str(path);
            w.str(trash_id);
        }
        WalEntry::RestoreFromTrash { trash_id, path } => {
            w.buf.push(11);
            w.str(trash_id);
            w.str(path);
        }
    }
    w.buf
}

pub fn decode_wal_entry(bytes: &[u8]) -> FsResult<WalEntry> {
    let mut r = Reader::new(bytes);
    let entry = match r.byte()? {
        0 => WalEntry::CreateFile { path: r.str_field()? },
        1 => WalEntry::CreateDir { path: r.str_field()? },
        2 => WalEntry::CreateSymlink { path: r.str_field()?, target: r.str_field()? },
        3 => WalEntry::Delete { path: r.str_field()? },
        4 => WalEntry::Write { path: r.str_field()?, offset: r.varint()?, bytes: r.bytes_field()? },
        5 => WalEntry::SetPermissions { path: r.str_field()?, read: r.bool()?, write: r.bool()?, execute: r.bool()? },
        6 => WalEntry::SetXattr { path: r.str_field()?, name: r.str_field()?, value: r.bytes_field()? },
        7 => WalEntry::RemoveXattr { path: r.str_field()?, name: r.str_field()? },
        8 => WalEntry::Copy { src: r.str_field()?, dst: r.str_field()? },
        9 => WalEntry::Move { src: r.str_field()?, dst: r.str_field()? },
        10 => WalEntry::MoveToTrash { path: r.str_field()?, trash_id: r.str_field()? },
        11 => WalEntry::RestoreFromTrash { trash_id: r.str_field()?, path: r.str_field()? },
        _ => return Err(FsError::Unknown),
    };
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::cbor;

    #[test]
    fn wal_entry_round_trips() {
        let entry = WalEntry::Write { path: "/f".into(), offset: 4, bytes: vec![1, 2, 3] };
        let bytes = encode_wal_entry(&entry);
        assert_eq!(decode_wal_entry(&bytes).unwrap(), entry);
    }

    #[test]
    fn snapshot_round_trips() {
        let mut root = DirNode::new("", 0);
        root.children.insert("a".into(), Node::File(FileNode::new("a", 0)));
        let record = SnapshotRecord { root: Node::Directory(root) };
        let bytes = encode_snapshot(&record);
        let decoded = decode_snapshot(&bytes).unwrap();
        assert_eq!(decoded.root, record.root);
    }

    #[test]
    fn tlv_is_smaller_than_cbor_for_wal_entry() {
        let entry = WalEntry::Write { path: "/some/long/path.txt".into(), offset: 128, bytes: vec![7; 64] };
        let tlv = encode_wal_entry(&entry);
        let cbor = cbor::encode(&entry).unwrap();
        assert!(tlv.len() < cbor.len(), "tlv={} cbor={}", tlv.len(), cbor.len());
    }
}
