//! Helpers for `/`-separated relative paths.

use crate::error::{StorageError, StorageResult};

/// Joins two relative paths with a single `/`.
///
/// An empty side is ignored, so `join("", "a")` is `"a"`.
#[must_use]
pub fn join(base: &str, name: &str) -> String {
    match (base.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{}/{}", base.trim_end_matches('/'), name),
    }
}

/// Returns the parent of a relative path (`""` for a top-level entry).
#[must_use]
pub fn parent(path: &str) -> &str {
    path.rfind('/').map_or("", |idx| &path[..idx])
}

/// Validates a relative path and returns it without trailing slashes.
///
/// # Errors
///
/// Rejects absolute paths and paths containing `.` or `..` components.
pub fn normalize(path: &str) -> StorageResult<&str> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        return Err(StorageError::InvalidPath {
            path: path.to_string(),
        });
    }
    if trimmed.is_empty() {
        return Ok(trimmed);
    }
    for component in trimmed.split('/') {
        if component.is_empty() || component == "." || component == ".." {
            return Err(StorageError::InvalidPath {
                path: path.to_string(),
            });
        }
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_paths() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a", ""), "a");
        assert_eq!(join("a/", "b"), "a/b");
        assert_eq!(join("segment_1/attribute", "price"), "segment_1/attribute/price");
    }

    #[test]
    fn parent_paths() {
        assert_eq!(parent("a/b/c"), "a/b");
        assert_eq!(parent("a"), "");
    }

    #[test]
    fn normalize_rejects_escapes() {
        assert!(normalize("../x").is_err());
        assert!(normalize("/abs").is_err());
        assert!(normalize("a//b").is_err());
        assert_eq!(normalize("a/b/").unwrap(), "a/b");
        assert_eq!(normalize("").unwrap(), "");
    }
}
