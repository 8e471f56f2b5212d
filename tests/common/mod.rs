use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use picofs::{DiskOps, FsEntry, FsMeta, FsResult, NodeType, Permissions, Storage};
use tempfile::TempDir;

/// In-memory `Storage` double shared across tests, mirroring the `MemStorage`
/// test doubles colocated with `persistence.rs`/`fs.rs` themselves.
pub struct MemStorage {
    data: DashMap<String, Vec<u8>>,
}

impl MemStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { data: DashMap::new() })
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

/// Overwrite a key with garbage bytes of a given length, to exercise
/// fail-soft corruption recovery.
pub async fn corrupt(storage: &MemStorage, key: &str, len: usize) {
    storage.data.insert(key.to_string(), vec![0xAA; len]);
}

/// `DiskOps` rooted at a real `tempfile::TempDir`, grounded on the
/// teacher's `shadow_fs` fixture (`tests/shadow_fs/common.rs`): a temp
/// directory plus a thin struct that maps relative paths onto it.
pub struct TempDiskOps {
    root: PathBuf,
}

impl TempDiskOps {
    pub fn new(tempdir: &TempDir) -> Self {
        Self { root: tempdir.path().to_path_buf() }
    }

    fn full_path(&self, rel_path: &str) -> PathBuf {
        let trimmed = rel_path.trim_start_matches('/');
        if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.root.join(trimmed)
        }
    }
}

#[async_trait]
impl DiskOps for TempDiskOps {
    async fn create_file(&self, rel_path: &str) -> FsResult<()> {
        tokio::fs::File::create(self.full_path(rel_path)).await?;
        Ok(())
    }

    async fn create_dir(&self, rel_path: &str) -> FsResult<()> {
        tokio::fs::create_dir_all(self.full_path(rel_path)).await?;
        Ok(())
    }

    async fn read_file(&self, rel_path: &str, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        let mut file = tokio::fs::File::open(self.full_path(rel_path)).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        let read = file.read(&mut buf).await?;
        buf.truncate(read);
        Ok(buf)
    }

    async fn write_file(&self, rel_path: &str, offset: u64, data: &[u8]) -> FsResult<()> {
        use tokio::io::{AsyncSeekExt, AsyncWriteExt};
        let mut file = tokio::fs::OpenOptions::new().write(true).create(true).open(self.full_path(rel_path)).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(())
    }

    async fn delete(&self, rel_path: &str) -> FsResult<()> {
        let path = self.full_path(rel_path);
        if path.is_dir() {
            tokio::fs::remove_dir_all(path).await?;
        } else {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list(&self, rel_path: &str) -> FsResult<Vec<FsEntry>> {
        let mut entries = tokio::fs::read_dir(self.full_path(rel_path)).await?;
        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            out.push(FsEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                node_type: if meta.is_dir() { NodeType::Directory } else { NodeType::File },
            });
        }
        Ok(out)
    }

    async fn stat(&self, rel_path: &str) -> FsResult<FsMeta> {
        let path = self.full_path(rel_path);
        let meta = tokio::fs::metadata(&path).await?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        Ok(FsMeta {
            name,
            node_type: if meta.is_dir() { NodeType::Directory } else { NodeType::File },
            size: meta.len(),
            created_at_millis: 0,
            modified_at_millis: 0,
            permissions: Permissions::all(),
        })
    }

    async fn exists(&self, rel_path: &str) -> FsResult<bool> {
        Ok(self.full_path(rel_path).try_exists().unwrap_or(false))
    }
}
