//! # seglake core
//!
//! Segment store engine for seglake.
//!
//! This crate provides:
//! - Versions: immutable snapshots over ascending segment ids
//! - Partition views presenting built and building segments as one doc
//!   id space
//! - Attribute storage with plain and compressed offset tables and
//!   in-place updates
//! - Segment merging under a doc id reclaim map, serial or parallel
//! - Version retention and garbage collection
//! - Redo range computation for online reopen
//!
//! ## Example
//!
//! ```rust
//! use seglake_core::{
//!     AttributeConfig, BuildingSegment, Document, IdAllocator, OffsetConfig, PartitionView,
//!     Schema, SchemaVersionId, Version, VersionCommitter,
//! };
//! use seglake_storage::InMemoryDirectory;
//!
//! let dir = InMemoryDirectory::new();
//! let schema = Schema::new("docs", SchemaVersionId::new(0))
//!     .with_attribute(AttributeConfig::var_len("title"));
//! let mut ids = IdAllocator::default();
//!
//! let mut segment = BuildingSegment::new(ids.allocate_segment(), &schema, &OffsetConfig::default())?;
//! segment.add_document(&Document::new().with_attribute("title", "hello"))?;
//! let built = segment.dump(&dir)?;
//!
//! let version = Version::new(ids.allocate_version(), schema.schema_version_id, [built.id]);
//! VersionCommitter::new(&dir).commit(&version, &mut ids)?;
//!
//! let view = PartitionView::open(&dir, version, Vec::new(), false)?;
//! assert_eq!(view.total_doc_count(), 1);
//! # Ok::<(), seglake_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod attribute;
mod config;
pub mod dir;
mod error;
pub mod merge;
pub mod offset;
pub mod redo;
mod schema;
pub mod segment;
mod stats;
mod types;
pub mod version;

pub use attribute::{AttributeReader, AttributeWriter};
pub use config::{MergeConfig, OffsetConfig, RetentionConfig};
pub use error::{CoreError, CoreResult};
pub use merge::{MergeCoordinator, MergeOutcome, MergePlan, OutputSplit, ReclaimMap, SegmentMergeInfo};
pub use offset::{AttributeOffsetReader, OffsetCodec, OffsetTable};
pub use redo::{Operation, OperationType, RedoHint, RedoHintKind, ReopenRedoStrategy};
pub use schema::{AttributeConfig, AttributeKind, Schema};
pub use segment::{
    BuildingSegment, Document, PartitionView, Segment, SegmentData, SegmentInfo, SegmentKind,
};
pub use stats::{OffsetMetrics, OffsetMetricsSnapshot};
pub use types::{now_micros, DocId, DocIdRange, IdAllocator, SchemaVersionId, SegmentId, VersionId};
pub use version::{
    list_versions, load_latest, CleanFailure, CleanReport, IndexSummary, Version, VersionCommitter,
};

/// Crate version, also stamped into CLI output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
