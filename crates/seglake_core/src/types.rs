//! Core type definitions for seglake.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Global or segment-local document id.
pub type DocId = u32;

/// Half-open range of global doc ids.
pub type DocIdRange = Range<DocId>;

/// Identifier of a segment.
///
/// Segment ids are monotonically increasing and never reused, even after
/// the segment is merged away.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SegmentId(pub u32);

impl SegmentId {
    /// Creates a new segment ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg:{}", self.0)
    }
}

/// Identifier of a committed version.
///
/// Version ids are monotonically increasing. Higher ids are newer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct VersionId(pub u32);

impl VersionId {
    /// Creates a new version ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ver:{}", self.0)
    }
}

/// Identifier of a schema revision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SchemaVersionId(pub u32);

impl SchemaVersionId {
    /// Creates a new schema version ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SchemaVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "schema:{}", self.0)
    }
}

/// Hands out segment and version ids.
///
/// Passed explicitly to whoever creates segments or versions; tests can
/// start it at any point to get deterministic ids. Ids only move forward.
#[derive(Debug, Clone, Default)]
pub struct IdAllocator {
    next_segment: u32,
    next_version: u32,
}

impl IdAllocator {
    /// Creates an allocator whose next ids are the given values.
    #[must_use]
    pub const fn new(next_segment: u32, next_version: u32) -> Self {
        Self {
            next_segment,
            next_version,
        }
    }

    /// Allocates the next segment id.
    pub fn allocate_segment(&mut self) -> SegmentId {
        let id = SegmentId(self.next_segment);
        self.next_segment += 1;
        id
    }

    /// Allocates the next version id.
    pub fn allocate_version(&mut self) -> VersionId {
        let id = VersionId(self.next_version);
        self.next_version += 1;
        id
    }

    /// Records a segment id seen on disk so it is never handed out again.
    pub fn observe_segment(&mut self, id: SegmentId) {
        self.next_segment = self.next_segment.max(id.0 + 1);
    }

    /// Records a version id seen on disk so it is never handed out again.
    pub fn observe_version(&mut self, id: VersionId) {
        self.next_version = self.next_version.max(id.0 + 1);
    }

    /// Returns the next segment id without allocating it.
    #[must_use]
    pub const fn peek_segment(&self) -> SegmentId {
        SegmentId(self.next_segment)
    }

    /// Returns the next version id without allocating it.
    #[must_use]
    pub const fn peek_version(&self) -> VersionId {
        VersionId(self.next_version)
    }

    /// Checks that a version id is not older than the newest id allocated
    /// or observed so far.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolated` if `id` is below the allocation floor.
    pub fn ensure_version_fresh(&self, id: VersionId) -> CoreResult<()> {
        if id.0 + 1 < self.next_version {
            return Err(CoreError::invariant_violated(format!(
                "version id {id} is older than allocated ids (next {})",
                self.next_version
            )));
        }
        Ok(())
    }
}

/// Returns the current wall-clock time in microseconds since the epoch.
#[must_use]
pub fn now_micros() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_id_ordering() {
        assert!(SegmentId::new(1) < SegmentId::new(2));
    }

    #[test]
    fn id_display() {
        assert_eq!(format!("{}", SegmentId::new(3)), "seg:3");
        assert_eq!(format!("{}", VersionId::new(5)), "ver:5");
        assert_eq!(format!("{}", SchemaVersionId::new(0)), "schema:0");
    }

    #[test]
    fn allocator_is_monotonic() {
        let mut alloc = IdAllocator::new(4, 0);
        assert_eq!(alloc.allocate_segment(), SegmentId(4));
        assert_eq!(alloc.allocate_segment(), SegmentId(5));

        alloc.observe_segment(SegmentId(2));
        assert_eq!(alloc.peek_segment(), SegmentId(6));

        alloc.observe_segment(SegmentId(10));
        assert_eq!(alloc.allocate_segment(), SegmentId(11));
    }

    #[test]
    fn allocator_rejects_stale_version() {
        let mut alloc = IdAllocator::default();
        alloc.observe_version(VersionId(7));
        assert!(alloc.ensure_version_fresh(VersionId(7)).is_ok());
        assert!(alloc.ensure_version_fresh(VersionId(8)).is_ok());
        let err = alloc.ensure_version_fresh(VersionId(3)).unwrap_err();
        assert!(err.is_fatal());
    }
}
