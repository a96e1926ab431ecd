//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested file or directory does not exist.
    #[error("path not found: {path}")]
    NotFound {
        /// The missing path, relative to the directory root.
        path: String,
    },

    /// The path is malformed (absolute, contains `..`, or empty where a
    /// file name is required).
    #[error("invalid path: {path}")]
    InvalidPath {
        /// The offending path.
        path: String,
    },
}

impl StorageError {
    /// Creates a not-found error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Returns true if this error means the path was already absent.
    ///
    /// Raw `io::Error`s of kind `NotFound` are treated the same way.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            Self::InvalidPath { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_detected() {
        assert!(StorageError::not_found("a/b").is_not_found());
        let io_err = StorageError::Io(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(io_err.is_not_found());
    }

    #[test]
    fn other_errors_are_not_not_found() {
        let denied = StorageError::Io(io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert!(!denied.is_not_found());
        let bad = StorageError::InvalidPath {
            path: "../x".into(),
        };
        assert!(!bad.is_not_found());
    }
}
