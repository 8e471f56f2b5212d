//! Error taxonomy shared by every public PicoFS operation (spec §6/§7).

use std::fmt;

/// Structured result type returned by every fallible PicoFS operation.
pub type FsResult<T> = Result<T, FsError>;

/// Errors surfaced by PicoFS. The core never panics or raises an unhandled
/// exception on caller-reachable input; every validation failure maps to one
/// of these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    NotDirectory,
    NotFile,
    PermissionDenied,
    InvalidPath,
    NotMounted,
    Locked,
    QuotaExceeded,
    SymlinkLoop,
    Unknown,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            FsError::NotFound => "no such file or directory",
            FsError::AlreadyExists => "entry already exists",
            FsError::NotDirectory => "not a directory",
            FsError::NotFile => "not a regular file",
            FsError::PermissionDenied => "permission denied",
            FsError::InvalidPath => "invalid path",
            FsError::NotMounted => "path is not below a mount point",
            FsError::Locked => "resource is locked",
            FsError::QuotaExceeded => "quota exceeded",
            FsError::SymlinkLoop => "too many levels of symbolic links",
            FsError::Unknown => "unknown error",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for FsError {}

impl From<std::io::Error> for FsError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            NotFound => FsError::NotFound,
            AlreadyExists => FsError::AlreadyExists,
            PermissionDenied => FsError::PermissionDenied,
            _ => FsError::Unknown,
        }
    }
}
