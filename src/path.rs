//! Path normalisation and validation (spec §4.1).

use crate::error::{FsError, FsResult};

/// Maximum number of bytes allowed in a single path segment.
pub const MAX_SEGMENT_LEN: usize = 255;

/// Canonicalise a path: split on `/`, drop empty and `.` segments, pop on
/// `..` (never above root), re-join with a leading `/`. Empty input (or a
/// path that normalises to nothing) yields `/`.
pub fn normalize(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    if stack.is_empty() {
        "/".to_string()
    } else {
        let mut out = String::with_capacity(path.len());
        for segment in stack {
            out.push('/');
            out.push_str(segment);
        }
        out
    }
}

/// Split a normalised path into its segments (no leading/trailing empties).
pub fn split(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Join a parent (normalised) path with a child name.
pub fn join(parent: &str, child: &str) -> String {
    if parent == "/" {
        format!("/{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Return the parent path of a normalised, non-root path, and the final
/// segment (the entry's own name). Returns `None` for `/`.
pub fn split_parent(path: &str) -> Option<(String, &str)> {
    if path == "/" {
        return None;
    }
    let segments = split(path);
    let (name, rest) = segments.split_last()?;
    let parent = if rest.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", rest.join("/"))
    };
    Some((parent, name))
}

/// Validate a *normalised* path per spec §4.1: must start with `/`, contain
/// no NUL byte, and no segment may exceed [`MAX_SEGMENT_LEN`] bytes.
pub fn is_legal(path: &str) -> bool {
    if !path.starts_with('/') {
        return false;
    }
    if path.as_bytes().contains(&0) {
        return false;
    }
    split(path).iter().all(|seg| seg.len() <= MAX_SEGMENT_LEN)
}

/// Normalise and validate a raw path in one step.
pub fn normalize_checked(path: &str) -> FsResult<String> {
    if path.as_bytes().contains(&0) {
        return Err(FsError::InvalidPath);
    }
    let normalized = normalize(path);
    if is_legal(&normalized) {
        Ok(normalized)
    } else {
        Err(FsError::InvalidPath)
    }
}

/// True iff `path` is `prefix` itself or lies beneath it.
pub fn is_prefixed_by(path: &str, prefix: &str) -> bool {
    if prefix == "/" {
        return true;
    }
    path == prefix || path.starts_with(&format!("{prefix}/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dot_and_dotdot() {
        assert_eq!(normalize("/a/./b/../c"), "/a/c");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/../../a"), "/a");
    }

    #[test]
    fn idempotent_normalisation() {
        // P1: normalize(normalize(p)) == normalize(p)
        for p in ["/a/./b/../c", "", "/", "/x/y/z", "/../a/b"] {
            let once = normalize(p);
            let twice = normalize(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn rejects_overlong_segment() {
        let long = "a".repeat(256);
        let path = format!("/{long}");
        assert!(!is_legal(&path));
    }

    #[test]
    fn rejects_nul_byte() {
        assert!(normalize_checked("/a\0b").is_err());
    }

    #[test]
    fn split_parent_handles_root() {
        assert_eq!(split_parent("/"), None);
        assert_eq!(split_parent("/a/b"), Some(("/a".to_string(), "b")));
        assert_eq!(split_parent("/a"), Some(("/".to_string(), "a")));
    }

    #[test]
    fn prefix_matching() {
        assert!(is_prefixed_by("/mnt/a", "/mnt"));
        assert!(is_prefixed_by("/mnt", "/mnt"));
        assert!(!is_prefixed_by("/mntx", "/mnt"));
        assert!(is_prefixed_by("/anything", "/"));
    }
}
