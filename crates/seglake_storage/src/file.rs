//! Filesystem-backed directory for persistent storage.

use crate::directory::Directory;
use crate::error::{StorageError, StorageResult};
use crate::path;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Suffix for temporary files written before an atomic rename.
const TEMP_SUFFIX: &str = ".__tmp__";

/// A directory rooted at a path on the local filesystem.
///
/// # Durability
///
/// `write` uses the write-then-rename pattern:
/// 1. Write to a temporary sibling file
/// 2. Sync the temporary file to disk
/// 3. Rename it over the target
/// 4. Fsync the parent directory so the rename is durable
///
/// # Example
///
/// ```no_run
/// use seglake_storage::{Directory, FsDirectory};
/// use std::path::Path;
///
/// let dir = FsDirectory::open(Path::new("partition_0"), true).unwrap();
/// dir.write("version.0", b"{}").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    /// Opens a directory rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root doesn't exist and `create_if_missing`
    /// is false, if the root is not a directory, or on I/O failure.
    pub fn open(root: &Path, create_if_missing: bool) -> StorageResult<Self> {
        if !root.exists() {
            if create_if_missing {
                fs::create_dir_all(root)?;
            } else {
                return Err(StorageError::not_found(root.display().to_string()));
            }
        }
        if !root.is_dir() {
            return Err(StorageError::InvalidPath {
                path: root.display().to_string(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the root path.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, relative: &str) -> StorageResult<PathBuf> {
        let relative = path::normalize(relative)?;
        if relative.is_empty() {
            return Ok(self.root.clone());
        }
        Ok(self.root.join(relative))
    }

    fn map_missing(err: io::Error, relative: &str) -> StorageError {
        if err.kind() == io::ErrorKind::NotFound {
            StorageError::not_found(relative)
        } else {
            StorageError::Io(err)
        }
    }

    #[cfg(unix)]
    fn sync_dir(dir: &Path) -> StorageResult<()> {
        File::open(dir)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_dir(_dir: &Path) -> StorageResult<()> {
        // NTFS journaling covers rename durability
        Ok(())
    }
}

impl Directory for FsDirectory {
    fn read(&self, relative: &str) -> StorageResult<Vec<u8>> {
        let full = self.resolve(relative)?;
        fs::read(&full).map_err(|e| Self::map_missing(e, relative))
    }

    fn write(&self, relative: &str, data: &[u8]) -> StorageResult<()> {
        let full = self.resolve(relative)?;
        let parent = full.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)?;

        let mut temp_name = full.file_name().unwrap_or_default().to_os_string();
        temp_name.push(TEMP_SUFFIX);
        let temp = parent.join(temp_name);

        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &full)?;
        Self::sync_dir(&parent)
    }

    fn exists(&self, relative: &str) -> StorageResult<bool> {
        Ok(self.resolve(relative)?.exists())
    }

    fn is_dir(&self, relative: &str) -> StorageResult<bool> {
        let full = self.resolve(relative)?;
        let meta = fs::metadata(&full).map_err(|e| Self::map_missing(e, relative))?;
        Ok(meta.is_dir())
    }

    fn file_len(&self, relative: &str) -> StorageResult<u64> {
        let full = self.resolve(relative)?;
        let meta = fs::metadata(&full).map_err(|e| Self::map_missing(e, relative))?;
        Ok(meta.len())
    }

    fn list(&self, relative: &str) -> StorageResult<Vec<String>> {
        let full = self.resolve(relative)?;
        let mut names = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| Self::map_missing(e, relative))? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if !name.ends_with(TEMP_SUFFIX) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn create_dir_all(&self, relative: &str) -> StorageResult<()> {
        fs::create_dir_all(self.resolve(relative)?)?;
        Ok(())
    }

    fn remove_file(&self, relative: &str) -> StorageResult<()> {
        let full = self.resolve(relative)?;
        fs::remove_file(&full).map_err(|e| Self::map_missing(e, relative))
    }

    fn remove_dir_all(&self, relative: &str) -> StorageResult<()> {
        let full = self.resolve(relative)?;
        if full == self.root {
            return Err(StorageError::InvalidPath {
                path: relative.to_string(),
            });
        }
        fs::remove_dir_all(&full).map_err(|e| Self::map_missing(e, relative))
    }
}
