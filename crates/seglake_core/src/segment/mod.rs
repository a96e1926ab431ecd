//! Segments and their composition into one doc id space.
//!
//! A segment is either built (immutable, on disk) or building (mutable,
//! in memory). Segments carry no base doc id of their own; it is assigned
//! by position when a [`PartitionView`] iterates them, so the same segment
//! may start at different global ids in different versions.

mod building;
mod iterator;
mod view;

pub use building::{BuildingSegment, Document, SUB_JOIN_DIR};
pub use iterator::{BuildingSegmentIterator, BuiltSegmentIterator, PartitionSegmentIterator};
pub use view::PartitionView;

use crate::dir::SEGMENT_INFO_FILE;
use crate::error::CoreResult;
use crate::types::{now_micros, DocId, DocIdRange, SegmentId};
use seglake_storage::path::join;
use seglake_storage::Directory;
use serde::{Deserialize, Serialize};

/// Whether a segment is finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// Read-only, persisted.
    Built,
    /// Mutable, in memory until dumped.
    Building,
}

/// Contents of `segment_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Documents in the main doc space.
    pub doc_count: u32,
    /// Time the segment was dumped, microseconds since the epoch.
    pub timestamp: i64,
    /// Documents in the sub doc space.
    #[serde(default)]
    pub sub_doc_count: u32,
}

impl SegmentInfo {
    /// Creates an info stamped with the current time.
    #[must_use]
    pub fn new(doc_count: u32, sub_doc_count: u32) -> Self {
        Self {
            doc_count,
            timestamp: now_micros(),
            sub_doc_count,
        }
    }

    /// Loads the info of the segment at `segment_path`.
    ///
    /// # Errors
    ///
    /// Returns storage or parse errors.
    pub fn load(dir: &dyn Directory, segment_path: &str) -> CoreResult<Self> {
        let bytes = dir.read(&join(segment_path, SEGMENT_INFO_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Writes the info of the segment at `segment_path`.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn store(&self, dir: &dyn Directory, segment_path: &str) -> CoreResult<()> {
        dir.write(
            &join(segment_path, SEGMENT_INFO_FILE),
            &serde_json::to_vec_pretty(self)?,
        )?;
        Ok(())
    }
}

/// Runtime description of a segment held by a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentData {
    /// Segment id.
    pub id: SegmentId,
    /// Built or building.
    pub kind: SegmentKind,
    /// Documents in the main doc space.
    pub doc_count: u32,
    /// Documents in the sub doc space.
    pub sub_doc_count: u32,
}

impl SegmentData {
    /// Describes a built segment from its info.
    #[must_use]
    pub fn built(id: SegmentId, info: &SegmentInfo) -> Self {
        Self {
            id,
            kind: SegmentKind::Built,
            doc_count: info.doc_count,
            sub_doc_count: info.sub_doc_count,
        }
    }

    /// The same segment seen through the sub doc space.
    #[must_use]
    pub fn sub_segment(&self) -> Self {
        Self {
            doc_count: self.sub_doc_count,
            sub_doc_count: 0,
            ..*self
        }
    }
}

/// A segment positioned in a doc id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Segment id.
    pub id: SegmentId,
    /// Built or building.
    pub kind: SegmentKind,
    /// Documents in the segment.
    pub doc_count: u32,
    /// First global doc id owned by the segment.
    pub base_doc_id: DocId,
}

impl Segment {
    /// Global doc ids owned by the segment.
    #[must_use]
    pub fn doc_id_range(&self) -> DocIdRange {
        self.base_doc_id..self.base_doc_id + self.doc_count
    }

    /// Converts a global doc id to a local one, if the segment owns it.
    #[must_use]
    pub fn to_local(&self, global: DocId) -> Option<DocId> {
        self.doc_id_range()
            .contains(&global)
            .then(|| global - self.base_doc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seglake_storage::InMemoryDirectory;

    #[test]
    fn info_round_trips_through_directory() {
        let dir = InMemoryDirectory::new();
        let info = SegmentInfo::new(10, 4);
        info.store(&dir, "segment_2").unwrap();
        assert_eq!(SegmentInfo::load(&dir, "segment_2").unwrap(), info);
    }

    #[test]
    fn info_without_sub_count_parses() {
        let info: SegmentInfo =
            serde_json::from_str(r#"{"doc_count":3,"timestamp":1}"#).unwrap();
        assert_eq!(info.sub_doc_count, 0);
    }

    #[test]
    fn local_conversion() {
        let segment = Segment {
            id: SegmentId::new(1),
            kind: SegmentKind::Built,
            doc_count: 5,
            base_doc_id: 10,
        };
        assert_eq!(segment.doc_id_range(), 10..15);
        assert_eq!(segment.to_local(12), Some(2));
        assert_eq!(segment.to_local(15), None);
        assert_eq!(segment.to_local(9), None);
    }
}
