//! Segment iterators.
//!
//! Each iterator is a cursor: it is either positioned on a segment
//! ([`is_valid`](BuiltSegmentIterator::is_valid)) or exhausted, and moves
//! with `move_to_next`. All three also implement [`Iterator`], yielding
//! the current segment and then advancing.

use super::{Segment, SegmentData};
use crate::types::DocId;

#[derive(Debug, Clone)]
struct Cursor<'a> {
    segments: &'a [SegmentData],
    pos: usize,
    base_doc_id: DocId,
}

impl<'a> Cursor<'a> {
    fn new(segments: &'a [SegmentData], base_doc_id: DocId) -> Self {
        Self {
            segments,
            pos: 0,
            base_doc_id,
        }
    }

    fn current(&self) -> Option<Segment> {
        self.segments.get(self.pos).map(|data| Segment {
            id: data.id,
            kind: data.kind,
            doc_count: data.doc_count,
            base_doc_id: self.base_doc_id,
        })
    }

    fn move_to_next(&mut self) {
        if let Some(data) = self.segments.get(self.pos) {
            self.base_doc_id += data.doc_count;
            self.pos += 1;
        }
    }
}

/// Iterates built segments in id order, starting at doc id 0.
#[derive(Debug, Clone)]
pub struct BuiltSegmentIterator<'a> {
    cursor: Cursor<'a>,
}

impl<'a> BuiltSegmentIterator<'a> {
    /// Creates an iterator over `segments`, which must be ordered by id.
    #[must_use]
    pub fn new(segments: &'a [SegmentData]) -> Self {
        Self {
            cursor: Cursor::new(segments, 0),
        }
    }

    /// True while positioned on a segment.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cursor.current().is_some()
    }

    /// The current segment, or `None` once exhausted.
    #[must_use]
    pub fn current(&self) -> Option<Segment> {
        self.cursor.current()
    }

    /// Advances to the next segment.
    pub fn move_to_next(&mut self) {
        self.cursor.move_to_next();
    }

    /// First doc id after the segments visited so far.
    #[must_use]
    pub fn next_base_doc_id(&self) -> DocId {
        self.cursor.base_doc_id
    }
}

impl Iterator for BuiltSegmentIterator<'_> {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        let segment = self.current()?;
        self.move_to_next();
        Some(segment)
    }
}

/// Iterates building segments in id order, continuing the doc id space
/// after the last built segment.
#[derive(Debug, Clone)]
pub struct BuildingSegmentIterator<'a> {
    cursor: Cursor<'a>,
}

impl<'a> BuildingSegmentIterator<'a> {
    /// Creates an iterator whose first segment starts at `base_doc_id`.
    #[must_use]
    pub fn new(segments: &'a [SegmentData], base_doc_id: DocId) -> Self {
        Self {
            cursor: Cursor::new(segments, base_doc_id),
        }
    }

    /// True while positioned on a segment.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.cursor.current().is_some()
    }

    /// The current segment, or `None` once exhausted.
    #[must_use]
    pub fn current(&self) -> Option<Segment> {
        self.cursor.current()
    }

    /// Advances to the next segment.
    pub fn move_to_next(&mut self) {
        self.cursor.move_to_next();
    }
}

impl Iterator for BuildingSegmentIterator<'_> {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        let segment = self.current()?;
        self.move_to_next();
        Some(segment)
    }
}

/// Iterates built then building segments with one running base doc id.
#[derive(Debug, Clone)]
pub struct PartitionSegmentIterator<'a> {
    built: &'a [SegmentData],
    building: &'a [SegmentData],
    pos: usize,
    base_doc_id: DocId,
}

impl<'a> PartitionSegmentIterator<'a> {
    /// Creates an iterator over both sequences.
    #[must_use]
    pub fn new(built: &'a [SegmentData], building: &'a [SegmentData]) -> Self {
        Self {
            built,
            building,
            pos: 0,
            base_doc_id: 0,
        }
    }

    fn data(&self) -> Option<&'a SegmentData> {
        if self.pos < self.built.len() {
            self.built.get(self.pos)
        } else {
            self.building.get(self.pos - self.built.len())
        }
    }

    /// True while positioned on a segment.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.data().is_some()
    }

    /// The current segment, or `None` once exhausted.
    #[must_use]
    pub fn current(&self) -> Option<Segment> {
        self.data().map(|data| Segment {
            id: data.id,
            kind: data.kind,
            doc_count: data.doc_count,
            base_doc_id: self.base_doc_id,
        })
    }

    /// Advances to the next segment, crossing from built to building.
    pub fn move_to_next(&mut self) {
        if let Some(data) = self.data() {
            self.base_doc_id += data.doc_count;
            self.pos += 1;
        }
    }
}

impl Iterator for PartitionSegmentIterator<'_> {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        let segment = self.current()?;
        self.move_to_next();
        Some(segment)
    }
}
