//! PicoFS - a portable, embeddable user-space virtual filesystem.
//!
//! `FileSystem` is the single entry point: an in-memory tree of files,
//! directories and symlinks that can have real disk-backed subtrees mounted
//! into it, with crash-safe snapshot+WAL persistence, advisory locking,
//! quota accounting, version history, trash, search and archive codecs
//! layered on top. See [`fs::FileSystem`] for the full operation surface.

pub mod archive;
pub mod cache;
pub mod checksum;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod fs;
pub mod handle;
pub mod lock;
pub mod metrics;
pub mod mount;
pub mod node;
pub mod path;
pub mod persistence;
pub mod quota;
pub mod search;
pub mod trash;
mod tree;
pub mod version;

pub use archive::{ArchiveEntryMeta, ArchiveFormat};
pub use config::{FileSystemConfig, WireCodec};
pub use error::{FsError, FsResult};
pub use events::{DiskFileEvent, FsEvent, FsEventKind, EventSubscription};
pub use fs::FileSystem;
pub use handle::{HandleId, OpenMode};
pub use lock::LockMode;
pub use metrics::OpSnapshot;
pub use mount::{DiskOps, MountRecord};
pub use node::{FsEntry, FsMeta, NodeType, Permissions};
pub use persistence::Storage;
pub use search::{GrepMatch, SearchMatch};
pub use trash::TrashInfo;
pub use version::VersionInfo;

/// Re-exported so callers can name trash/version ids without a direct
/// `uuid` dependency of their own.
pub use uuid::Uuid;
