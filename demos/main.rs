//! Minimal end-to-end walkthrough of the `picofs` facade: create files in
//! the in-memory tree, mount a real directory, write through it, snapshot,
//! then recover a fresh instance from the same storage and show the tree
//! survived the restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use picofs::{DiskOps, FileSystem, FileSystemConfig, FsEntry, FsMeta, FsResult, NodeType, Permissions, Storage};
use tokio::fs;
use tokio::sync::Mutex;

/// `Storage` backed by one file per key under `root`. Good enough for a
/// demo; a real host would use its own database or key/value store.
struct FileStorage {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    async fn new(root: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&root).await?;
        Ok(Self { root, lock: Mutex::new(()) })
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn read(&self, key: &str) -> FsResult<Option<Vec<u8>>> {
        match fs::read(self.key_path(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> FsResult<()> {
        let _guard = self.lock.lock().await;
        fs::write(self.key_path(key), bytes).await?;
        Ok(())
    }

    async fn append(&self, key: &str, bytes: Vec<u8>) -> FsResult<()> {
        use tokio::io::AsyncWriteExt;
        let _guard = self.lock.lock().await;
        let mut file = fs::OpenOptions::new().create(true).append(true).open(self.key_path(key)).await?;
        file.write_all(&bytes).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> FsResult<()> {
        match fs::remove_file(self.key_path(key)).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }
}

/// `DiskOps` delegating straight to a real directory on the host's own
/// filesystem, so a mount actually reads and writes real files.
struct LocalDisk {
    root: PathBuf,
}

impl LocalDisk {
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
impl DiskOps for LocalDisk {
    async fn create_file(&self, rel_path: &str) -> FsResult<()> {
        fs::File::create(self.full_path(rel_path)).await?;
        Ok(())
    }

    async fn create_dir(&self, rel_path: &str) -> FsResult<()> {
        fs::create_dir_all(self.full_path(rel_path)).await?;
        Ok(())
    }

    async fn read_file(&self, rel_path: &str, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};
        let mut file = fs::File::open(self.full_path(rel_path)).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        let read = file.read(&mut buf).await?;
        buf.truncate(read);
        Ok(buf)
    }

    async fn write_file(&self, rel_path: &str, offset: u64, data: &[u8]) -> FsResult<()> {
        use tokio::io::{AsyncSeekExt, AsyncWriteExt};
        let mut file = fs::OpenOptions::new().write(true).create(true).open(self.full_path(rel_path)).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        Ok(())
    }

    async fn delete(&self, rel_path: &str) -> FsResult<()> {
        let path = self.full_path(rel_path);
        if path.is_dir() {
            fs::remove_dir_all(path).await?;
        } else {
            fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn list(&self, rel_path: &str) -> FsResult<Vec<FsEntry>> {
        let mut entries = fs::read_dir(self.full_path(rel_path)).await?;
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
        let meta = fs::metadata(&path).await?;
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

async fn run(storage_root: &Path, mount_root: &Path) -> FsResult<()> {
    let storage = Arc::new(FileStorage::new(storage_root.to_path_buf()).await.expect("storage dir"));
    let vfs = FileSystem::new(FileSystemConfig::default(), storage.clone());
    vfs.recover().await?;

    vfs.create_dir("/docs").await?;
    vfs.create_file("/docs/readme.txt").await?;
    vfs.write_all("/docs/readme.txt", b"hello picofs").await?;
    tracing::info!("wrote /docs/readme.txt");

    fs::create_dir_all(mount_root).await.expect("mount dir");
    vfs.mount("/disk", mount_root.to_str().unwrap(), false, Arc::new(LocalDisk { root: mount_root.to_path_buf() })).await?;
    vfs.write_all("/disk/note.txt", b"through the mount").await?;

    let listing = vfs.read_dir("/docs").await?;
    tracing::info!(entries = listing.len(), "docs listing");

    drop(vfs);

    // Fresh instance, same storage: recovery should rebuild the tree.
    let vfs2 = FileSystem::new(FileSystemConfig::default(), storage);
    vfs2.recover().await?;
    let content = vfs2.read_all("/docs/readme.txt").await?;
    assert_eq!(content, b"hello picofs");
    tracing::info!("recovered content matches after restart");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let dir = std::env::temp_dir().join(format!("picofs-demo-{}", std::process::id()));
    let storage_root = dir.join("storage");
    let mount_root = dir.join("mount");
    if let Err(err) = run(&storage_root, &mount_root).await {
        eprintln!("demo failed: {err}");
        std::process::exit(1);
    }
}
