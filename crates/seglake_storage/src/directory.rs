//! Directory trait definition.

use crate::error::StorageResult;

/// A file tree holding one partition's versions, schemas and segments.
///
/// Directories are **opaque file stores**. They read and replace whole
/// files and enumerate entries; the engine owns every format decision.
///
/// # Invariants
///
/// - `write` replaces the file atomically: readers see the old bytes or
///   the new bytes, never a mix
/// - `write` creates missing parent directories
/// - `list` returns entry names (not paths) in ascending byte order
/// - Operations on a missing path fail with `StorageError::NotFound`
///
/// # Implementors
///
/// - [`super::InMemoryDirectory`] - For testing
/// - [`super::FsDirectory`] - For persistent storage
pub trait Directory: Send + Sync {
    /// Reads the whole file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist, or an I/O error.
    fn read(&self, path: &str) -> StorageResult<Vec<u8>>;

    /// Atomically replaces the file at `path` with `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or an I/O error occurs.
    fn write(&self, path: &str, data: &[u8]) -> StorageResult<()>;

    /// Returns true if a file or directory exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the existence check itself fails.
    fn exists(&self, path: &str) -> StorageResult<bool>;

    /// Returns true if `path` is a directory.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing exists at `path`.
    fn is_dir(&self, path: &str) -> StorageResult<bool>;

    /// Returns the size in bytes of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist.
    fn file_len(&self, path: &str) -> StorageResult<u64>;

    /// Lists the names of the entries directly under `dir`.
    ///
    /// The empty path lists the root.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `dir` does not exist.
    fn list(&self, dir: &str) -> StorageResult<Vec<String>>;

    /// Creates `dir` and all missing parents.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or an I/O error occurs.
    fn create_dir_all(&self, dir: &str) -> StorageResult<()>;

    /// Removes the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file does not exist.
    fn remove_file(&self, path: &str) -> StorageResult<()>;

    /// Removes `dir` and everything below it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the directory does not exist.
    fn remove_dir_all(&self, dir: &str) -> StorageResult<()>;
}
