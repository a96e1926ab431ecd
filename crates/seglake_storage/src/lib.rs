//! # seglake storage
//!
//! Directory abstraction for the seglake segment store.
//!
//! This crate provides the lowest-level file access used by the engine.
//! Directories are **opaque file trees**: they store named byte blobs and
//! nested directories, and know nothing about versions, segments or
//! attribute formats.
//!
//! ## Design Principles
//!
//! - Paths are `/`-separated and relative to the directory root
//! - Writes replace a whole file atomically
//! - A missing path is reported as [`StorageError::NotFound`], never as a
//!   generic I/O error, so cleaners can tolerate concurrent removal
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Implementations
//!
//! - [`InMemoryDirectory`] - For testing and ephemeral partitions
//! - [`FsDirectory`] - For persistent storage using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use seglake_storage::{Directory, InMemoryDirectory};
//!
//! let dir = InMemoryDirectory::new();
//! dir.write("segment_0/segment_info", b"{}").unwrap();
//! assert!(dir.exists("segment_0").unwrap());
//! assert_eq!(dir.list("").unwrap(), vec!["segment_0".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod directory;
mod error;
mod file;
mod memory;
pub mod path;

pub use directory::Directory;
pub use error::{StorageError, StorageResult};
pub use file::FsDirectory;
pub use memory::InMemoryDirectory;
