//! Immutable configuration record for a [`crate::fs::FileSystem`] instance.

/// Default file content block size (64 KiB, spec §3).
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default number of WAL appends between automatic snapshots (spec §4.13).
pub const DEFAULT_SNAPSHOT_THRESHOLD: u32 = 100;

/// Default maximum number of symlink hops before `SymlinkLoop` (spec §4.2).
pub const DEFAULT_MAX_SYMLINK_HOPS: u32 = 40;

/// Value of `quota` that disables all quota admission checks (spec §4.5).
pub const QUOTA_UNLIMITED: i64 = -1;

/// Which wire codec persists Snapshot/WAL/Mounts/Versions/Trash records
/// (spec §4.12 requires both to be supported; an instance picks one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCodec {
    Cbor,
    Tlv,
}

/// Immutable, pass-by-value configuration for a [`crate::fs::FileSystem`].
///
/// Operation-specific options (open mode, mount options, search queries)
/// are their own small value types; this struct only covers
/// instance-lifetime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSystemConfig {
    /// Size of a file content block. The last block of a file may be short.
    pub block_size: usize,
    /// Total bytes available to in-memory content (files + versions +
    /// in-memory trash). `-1` disables quota checks entirely.
    pub quota: i64,
    /// Number of successful WAL appends after which a full snapshot is
    /// written and the WAL cleared. `1` forces snapshot-on-every-write.
    pub snapshot_threshold: u32,
    /// Bounded capacity of each subscriber's event buffer in the
    /// [`crate::events::EventBus`]; oldest events are dropped on overflow.
    pub event_buffer_capacity: usize,
    /// Maximum number of symlink hops followed before `SymlinkLoop`.
    pub max_symlink_hops: u32,
    /// Capacity of each of the two LRU caches (`stat`, `readDir`).
    pub cache_capacity: u64,
    /// Wire codec used for all persisted records.
    pub wire_codec: WireCodec,
}

impl Default for FileSystemConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            quota: QUOTA_UNLIMITED,
            snapshot_threshold: DEFAULT_SNAPSHOT_THRESHOLD,
            event_buffer_capacity: 1024,
            max_symlink_hops: DEFAULT_MAX_SYMLINK_HOPS,
            cache_capacity: 4096,
            wire_codec: WireCodec::Cbor,
        }
    }
}
