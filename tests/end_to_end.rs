mod common;

use std::sync::Arc;

use picofs::{FileSystem, FileSystemConfig, FsError, LockMode, OpenMode, Uuid, ArchiveFormat};
use tempfile::TempDir;

use common::{MemStorage, TempDiskOps};

fn config_with_quota(quota: i64) -> FileSystemConfig {
    FileSystemConfig { quota, ..FileSystemConfig::default() }
}

/// Scenario 1: create, write, read, stat round trip.
#[tokio::test]
async fn scenario_create_write_read_stat() {
    let storage = MemStorage::new();
    let fs = FileSystem::new(FileSystemConfig::default(), storage);
    fs.recover().await.unwrap();

    fs.create_dir("/d").await.unwrap();
    fs.create_file("/d/f.txt").await.unwrap();
    fs.write_all("/d/f.txt", b"Hello").await.unwrap();
    assert_eq!(fs.read_all("/d/f.txt").await.unwrap(), b"Hello");
    assert_eq!(fs.stat("/d/f.txt").await.unwrap().size, 5);
}

/// Scenario 2: second write on a non-empty file captures exactly one version.
#[tokio::test]
async fn scenario_second_write_captures_one_version() {
    let storage = MemStorage::new();
    let fs = FileSystem::new(FileSystemConfig::default(), storage);
    fs.recover().await.unwrap();

    fs.create_file("/f").await.unwrap();
    fs.write_all("/f", b"v1").await.unwrap();
    fs.write_all("/f", b"version 2").await.unwrap();

    let versions = fs.versions_list("/f");
    assert_eq!(versions.len(), 1);
    let blob = fs.versions_read("/f", versions[0].version_id).unwrap();
    assert_eq!(blob, b"v1");
}

/// Scenario 3: content survives a full drop/recreate against the same storage.
#[tokio::test]
async fn scenario_restart_persists_content() {
    let storage = MemStorage::new();
    {
        let fs = FileSystem::new(FileSystemConfig::default(), storage.clone());
        fs.recover().await.unwrap();
        fs.create_dir("/d").await.unwrap();
        fs.create_file("/d/file.txt").await.unwrap();
        fs.write_all("/d/file.txt", b"persisted").await.unwrap();
    }
    let fs2 = FileSystem::new(FileSystemConfig::default(), storage);
    fs2.recover().await.unwrap();
    assert_eq!(fs2.read_all("/d/file.txt").await.unwrap(), b"persisted");
}

/// Scenario 4: a corrupted WAL degrades to the last snapshot, never panics.
#[tokio::test]
async fn scenario_corrupt_wal_degrades_to_snapshot() {
    let storage = MemStorage::new();
    {
        // snapshot_threshold = 2 lands a real snapshot right after the
        // create+write pair below, leaving the next append WAL-only so
        // corrupting the WAL can't touch it.
        let snapshot_cfg = FileSystemConfig { snapshot_threshold: 2, ..FileSystemConfig::default() };
        let fs = FileSystem::new(snapshot_cfg, storage.clone());
        fs.recover().await.unwrap();
        fs.create_file("/good.txt").await.unwrap();
        fs.write_all("/good.txt", b"snapshot-worthy").await.unwrap();
        // this append lands only in the WAL, which we are about to corrupt
        fs.create_file("/bad.txt").await.unwrap();
    }
    common::corrupt(&storage, picofs::persistence::KEY_WAL, 13).await;

    let fs2 = FileSystem::new(FileSystemConfig::default(), storage);
    fs2.recover().await.unwrap();
    assert_eq!(fs2.read_all("/good.txt").await.unwrap(), b"snapshot-worthy");
    assert_eq!(fs2.stat("/bad.txt").await, Err(FsError::NotFound));
}

/// Scenario 5: exclusive locks are mutually exclusive until released.
#[tokio::test]
async fn scenario_exclusive_lock_excludes_until_closed() {
    let storage = MemStorage::new();
    let fs = FileSystem::new(FileSystemConfig::default(), storage);
    fs.recover().await.unwrap();
    fs.create_file("/f").await.unwrap();
    fs.write_all("/f", b"data").await.unwrap();

    let h1 = fs.open("/f", OpenMode::ReadWrite).await.unwrap();
    let h2 = fs.open("/f", OpenMode::ReadWrite).await.unwrap();

    fs.try_lock(h1, LockMode::Exclusive).unwrap();
    assert_eq!(fs.try_lock(h2, LockMode::Exclusive), Err(FsError::Locked));

    fs.close(h1);
    fs.try_lock(h2, LockMode::Exclusive).unwrap();
}

/// Scenario 6: quota admission control, release on delete, ground-truth P10.
#[tokio::test]
async fn scenario_quota_admission_and_release() {
    let storage = MemStorage::new();
    let fs = FileSystem::new(config_with_quota(100), storage);
    fs.recover().await.unwrap();

    fs.create_file("/a.txt").await.unwrap();
    fs.create_file("/b.txt").await.unwrap();
    fs.write_all("/a.txt", &vec![1u8; 50]).await.unwrap();
    assert_eq!(fs.write_all("/b.txt", &vec![2u8; 60]).await, Err(FsError::QuotaExceeded));

    fs.delete("/a.txt").await.unwrap();
    fs.write_all("/b.txt", &vec![2u8; 60]).await.unwrap();
    assert_eq!(fs.quota_used(), 60);
}

/// Scenario 7: compress a subtree to ZIP, list it, extract it byte-identically.
#[tokio::test]
async fn scenario_archive_round_trip() {
    let storage = MemStorage::new();
    let fs = FileSystem::new(FileSystemConfig::default(), storage);
    fs.recover().await.unwrap();

    fs.create_dir("/d").await.unwrap();
    fs.create_file("/d/one.txt").await.unwrap();
    fs.write_all("/d/one.txt", b"one").await.unwrap();
    fs.create_file("/d/two.txt").await.unwrap();
    fs.write_all("/d/two.txt", b"two-longer").await.unwrap();

    fs.archive_compress(&["/d".to_string()], "/out.zip", ArchiveFormat::Zip).await.unwrap();
    let listed = fs.archive_list("/out.zip").await.unwrap();
    assert!(listed.iter().any(|e| e.name.ends_with("one.txt") && e.size == 3));
    assert!(listed.iter().any(|e| e.name.ends_with("two.txt") && e.size == 10));

    fs.archive_extract("/out.zip", "/restored").await.unwrap();
    assert_eq!(fs.read_all("/restored/d/one.txt").await.unwrap(), b"one");
    assert_eq!(fs.read_all("/restored/d/two.txt").await.unwrap(), b"two-longer");
}

/// P6: after restart, xattrs and trash survive alongside plain file content.
#[tokio::test]
async fn restart_preserves_xattrs_and_trash() {
    let storage = MemStorage::new();
    let trash_id: Uuid;
    {
        let fs = FileSystem::new(FileSystemConfig::default(), storage.clone());
        fs.recover().await.unwrap();
        fs.create_file("/kept.txt").await.unwrap();
        fs.write_all("/kept.txt", b"data").await.unwrap();
        fs.xattr_set("/kept.txt", "user.tag", b"v1".to_vec()).await.unwrap();
        fs.create_file("/gone.txt").await.unwrap();
        fs.write_all("/gone.txt", b"bye").await.unwrap();
        trash_id = fs.trash_move("/gone.txt").await.unwrap();
    }
    let fs2 = FileSystem::new(FileSystemConfig::default(), storage);
    fs2.recover().await.unwrap();
    assert_eq!(fs2.xattr_get("/kept.txt", "user.tag").await.unwrap(), Some(b"v1".to_vec()));
    let trashed = fs2.trash_list();
    assert!(trashed.iter().any(|t| t.trash_id == trash_id && t.original_path == "/gone.txt"));
}

/// A mount delegates reads/writes to a real directory on disk, and its
/// entries show up through `read_dir` like any in-memory file.
#[tokio::test]
async fn mounted_backend_round_trips_through_real_disk() {
    let tempdir = TempDir::new().expect("create temp dir");
    let storage = MemStorage::new();
    let fs = FileSystem::new(FileSystemConfig::default(), storage);
    fs.recover().await.unwrap();

    fs.mount("/disk", tempdir.path().to_str().unwrap(), false, Arc::new(TempDiskOps::new(&tempdir))).await.unwrap();
    fs.create_file("/disk/note.txt").await.unwrap();
    fs.write_all("/disk/note.txt", b"through the mount").await.unwrap();

    assert_eq!(fs.read_all("/disk/note.txt").await.unwrap(), b"through the mount");
    assert!(std::fs::read_to_string(tempdir.path().join("note.txt")).unwrap().contains("through the mount"));

    let listing = fs.read_dir("/disk").await.unwrap();
    assert!(listing.iter().any(|e| e.name == "note.txt"));
}

/// P9: corrupting a single persisted blob never panics, just degrades.
#[tokio::test]
async fn corrupted_trash_blob_degrades_to_empty() {
    let storage = MemStorage::new();
    {
        let fs = FileSystem::new(FileSystemConfig::default(), storage.clone());
        fs.recover().await.unwrap();
        fs.create_file("/gone.txt").await.unwrap();
        fs.write_all("/gone.txt", b"bye").await.unwrap();
        fs.trash_move("/gone.txt").await.unwrap();
    }
    common::corrupt(&storage, picofs::persistence::KEY_TRASH, 9).await;

    let fs2 = FileSystem::new(FileSystemConfig::default(), storage);
    fs2.recover().await.unwrap();
    assert!(fs2.trash_list().is_empty());
}
