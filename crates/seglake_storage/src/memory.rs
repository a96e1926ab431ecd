//! In-memory directory for testing.

use crate::directory::Directory;
use crate::error::{StorageError, StorageResult};
use crate::path;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Entry {
    File(Arc<Vec<u8>>),
    Dir,
}

/// An in-memory directory tree.
///
/// This directory keeps every file in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral partitions that don't need persistence
///
/// # Thread Safety
///
/// This directory is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use seglake_storage::{Directory, InMemoryDirectory};
///
/// let dir = InMemoryDirectory::new();
/// dir.write("version.0", b"{}").unwrap();
/// assert_eq!(dir.read("version.0").unwrap(), b"{}");
/// assert_eq!(dir.file_len("version.0").unwrap(), 2);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    entries: RwLock<BTreeMap<String, Entry>>,
}

impl InMemoryDirectory {
    /// Creates a new empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the paths of all files, in ascending order.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn file_paths(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| matches!(e, Entry::File(_)))
            .map(|(p, _)| p.clone())
            .collect()
    }

    fn insert_parents(entries: &mut BTreeMap<String, Entry>, path: &str) -> StorageResult<()> {
        let mut dir = path::parent(path);
        while !dir.is_empty() {
            match entries.get(dir) {
                Some(Entry::Dir) => break,
                Some(Entry::File(_)) => {
                    return Err(StorageError::InvalidPath {
                        path: path.to_string(),
                    })
                }
                None => {
                    entries.insert(dir.to_string(), Entry::Dir);
                }
            }
            dir = path::parent(dir);
        }
        Ok(())
    }

    fn child_prefix(dir: &str) -> String {
        if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        }
    }
}

impl Directory for InMemoryDirectory {
    fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        let path = path::normalize(path)?;
        match self.entries.read().get(path) {
            Some(Entry::File(data)) => Ok(data.as_ref().clone()),
            _ => Err(StorageError::not_found(path)),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        let path = path::normalize(path)?;
        if path.is_empty() {
            return Err(StorageError::InvalidPath {
                path: path.to_string(),
            });
        }
        let mut entries = self.entries.write();
        if matches!(entries.get(path), Some(Entry::Dir)) {
            return Err(StorageError::InvalidPath {
                path: path.to_string(),
            });
        }
        Self::insert_parents(&mut entries, path)?;
        entries.insert(path.to_string(), Entry::File(Arc::new(data.to_vec())));
        Ok(())
    }

    fn exists(&self, path: &str) -> StorageResult<bool> {
        let path = path::normalize(path)?;
        Ok(path.is_empty() || self.entries.read().contains_key(path))
    }

    fn is_dir(&self, path: &str) -> StorageResult<bool> {
        let path = path::normalize(path)?;
        if path.is_empty() {
            return Ok(true);
        }
        match self.entries.read().get(path) {
            Some(Entry::Dir) => Ok(true),
            Some(Entry::File(_)) => Ok(false),
            None => Err(StorageError::not_found(path)),
        }
    }

    fn file_len(&self, path: &str) -> StorageResult<u64> {
        let path = path::normalize(path)?;
        match self.entries.read().get(path) {
            Some(Entry::File(data)) => Ok(data.len() as u64),
            _ => Err(StorageError::not_found(path)),
        }
    }

    fn list(&self, dir: &str) -> StorageResult<Vec<String>> {
        let dir = path::normalize(dir)?;
        let entries = self.entries.read();
        if !dir.is_empty() && !matches!(entries.get(dir), Some(Entry::Dir)) {
            return Err(StorageError::not_found(dir));
        }
        let prefix = Self::child_prefix(dir);
        let names = entries
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter_map(|(p, _)| {
                let rest = &p[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect();
        Ok(names)
    }

    fn create_dir_all(&self, dir: &str) -> StorageResult<()> {
        let dir = path::normalize(dir)?;
        if dir.is_empty() {
            return Ok(());
        }
        let mut entries = self.entries.write();
        match entries.get(dir) {
            Some(Entry::Dir) => return Ok(()),
            Some(Entry::File(_)) => {
                return Err(StorageError::InvalidPath {
                    path: dir.to_string(),
                })
            }
            None => {}
        }
        Self::insert_parents(&mut entries, dir)?;
        entries.insert(dir.to_string(), Entry::Dir);
        Ok(())
    }

    fn remove_file(&self, path: &str) -> StorageResult<()> {
        let path = path::normalize(path)?;
        let mut entries = self.entries.write();
        match entries.get(path) {
            Some(Entry::File(_)) => {
                entries.remove(path);
                Ok(())
            }
            _ => Err(StorageError::not_found(path)),
        }
    }

    fn remove_dir_all(&self, dir: &str) -> StorageResult<()> {
        let dir = path::normalize(dir)?;
        let mut entries = self.entries.write();
        if !matches!(entries.get(dir), Some(Entry::Dir)) {
            return Err(StorageError::not_found(dir));
        }
        let prefix = Self::child_prefix(dir);
        entries.retain(|p, _| p != dir && !p.starts_with(&prefix));
        Ok(())
    }
}
