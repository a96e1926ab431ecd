//! Fault injection for directory operations.
//!
//! [`FaultyDirectory`] wraps any [`Directory`] and fails selected
//! operations under selected path prefixes with a permission error,
//! the way a read-only mount or a busy file would on a real disk.

use parking_lot::Mutex;
use seglake_storage::{Directory, StorageError, StorageResult};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Operations a fault can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    /// `write`.
    Write,
    /// `remove_file`.
    RemoveFile,
    /// `remove_dir_all`.
    RemoveDir,
    /// `read`.
    Read,
}

#[derive(Debug, Clone)]
struct Fault {
    op: FaultOp,
    prefix: String,
}

/// The faults of a [`FaultyDirectory`], shareable after the directory has
/// been handed to the code under test.
#[derive(Debug, Default)]
pub struct FaultPlan {
    faults: Mutex<Vec<Fault>>,
    injected: AtomicUsize,
}

impl FaultPlan {
    /// Fails `op` for every path starting with `prefix`.
    pub fn fail(&self, op: FaultOp, prefix: impl Into<String>) {
        self.faults.lock().push(Fault {
            op,
            prefix: prefix.into(),
        });
    }

    /// Removes every configured fault.
    pub fn heal(&self) {
        self.faults.lock().clear();
    }

    /// Number of operations failed so far.
    pub fn injected_count(&self) -> usize {
        self.injected.load(Ordering::Relaxed)
    }

    fn check(&self, op: FaultOp, path: &str) -> StorageResult<()> {
        let hit = self
            .faults
            .lock()
            .iter()
            .any(|f| f.op == op && path.starts_with(&f.prefix));
        if hit {
            self.injected.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("injected {op:?} fault at {path}"),
            )));
        }
        Ok(())
    }
}

/// A directory that fails configured operations.
pub struct FaultyDirectory<D> {
    inner: D,
    plan: Arc<FaultPlan>,
}

impl<D: Directory> FaultyDirectory<D> {
    /// Wraps `inner` without any fault.
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            plan: Arc::new(FaultPlan::default()),
        }
    }

    /// Returns the shared fault plan.
    pub fn plan(&self) -> Arc<FaultPlan> {
        Arc::clone(&self.plan)
    }

    /// Returns the wrapped directory.
    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn check(&self, op: FaultOp, path: &str) -> StorageResult<()> {
        self.plan.check(op, path)
    }
}

impl<D: Directory> Directory for FaultyDirectory<D> {
    fn read(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.check(FaultOp::Read, path)?;
        self.inner.read(path)
    }

    fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        self.check(FaultOp::Write, path)?;
        self.inner.write(path, data)
    }

    fn exists(&self, path: &str) -> StorageResult<bool> {
        self.inner.exists(path)
    }

    fn is_dir(&self, path: &str) -> StorageResult<bool> {
        self.inner.is_dir(path)
    }

    fn file_len(&self, path: &str) -> StorageResult<u64> {
        self.inner.file_len(path)
    }

    fn list(&self, dir: &str) -> StorageResult<Vec<String>> {
        self.inner.list(dir)
    }

    fn create_dir_all(&self, dir: &str) -> StorageResult<()> {
        self.inner.create_dir_all(dir)
    }

    fn remove_file(&self, path: &str) -> StorageResult<()> {
        self.check(FaultOp::RemoveFile, path)?;
        self.inner.remove_file(path)
    }

    fn remove_dir_all(&self, dir: &str) -> StorageResult<()> {
        self.check(FaultOp::RemoveDir, dir)?;
        self.inner.remove_dir_all(dir)
    }
}
