//! Redo decisions after an online reopen.
//!
//! When a reader switches to a newer on-disk version, operations it
//! buffered against the old view may have to be replayed. Replaying all of
//! them is expensive, so [`ReopenRedoStrategy`] bounds each operation to
//! the doc id ranges the version switch could have affected:
//!
//! - updates: the built segments new in this version,
//! - deletes: every built segment of the new version.
//!
//! Building (realtime) segments are never part of a range; they are not
//! versioned yet.

use crate::error::{CoreError, CoreResult};
use crate::schema::Schema;
use crate::segment::PartitionView;
use crate::types::{DocId, DocIdRange, SegmentId};
use crate::version::Version;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, trace};

/// Type of a buffered operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationType {
    /// Add a document.
    AddDoc = 1,
    /// Update one field of a document.
    UpdateField = 2,
    /// Delete a document.
    DeleteDoc = 3,
    /// Delete a sub document.
    DeleteSubDoc = 4,
    /// Checkpoint marker.
    Checkpoint = 5,
}

impl OperationType {
    /// Converts a byte to an operation type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::AddDoc),
            2 => Some(Self::UpdateField),
            3 => Some(Self::DeleteDoc),
            4 => Some(Self::DeleteSubDoc),
            5 => Some(Self::Checkpoint),
            _ => None,
        }
    }

    /// Converts the operation type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Name used in errors and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AddDoc => "add_doc",
            Self::UpdateField => "update_field",
            Self::DeleteDoc => "delete_doc",
            Self::DeleteSubDoc => "delete_sub_doc",
            Self::Checkpoint => "checkpoint",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A buffered operation. Doc ids are global ids of the view the operation
/// was applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Add a document.
    AddDoc {
        /// Operation timestamp.
        timestamp: i64,
        /// Assigned doc id.
        doc_id: DocId,
    },
    /// Update one field.
    UpdateField {
        /// Operation timestamp.
        timestamp: i64,
        /// Target doc.
        doc_id: DocId,
        /// Field name.
        field: String,
        /// New value.
        value: Vec<u8>,
    },
    /// Delete a document.
    DeleteDoc {
        /// Operation timestamp.
        timestamp: i64,
        /// Target doc.
        doc_id: DocId,
    },
    /// Delete a sub document.
    DeleteSubDoc {
        /// Operation timestamp.
        timestamp: i64,
        /// Target sub doc.
        sub_doc_id: DocId,
    },
    /// Checkpoint marker.
    Checkpoint {
        /// Operation timestamp.
        timestamp: i64,
    },
}

impl Operation {
    /// Returns the operation type.
    #[must_use]
    pub fn op_type(&self) -> OperationType {
        match self {
            Self::AddDoc { .. } => OperationType::AddDoc,
            Self::UpdateField { .. } => OperationType::UpdateField,
            Self::DeleteDoc { .. } => OperationType::DeleteDoc,
            Self::DeleteSubDoc { .. } => OperationType::DeleteSubDoc,
            Self::Checkpoint { .. } => OperationType::Checkpoint,
        }
    }

    /// Operation timestamp.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::AddDoc { timestamp, .. }
            | Self::UpdateField { timestamp, .. }
            | Self::DeleteDoc { timestamp, .. }
            | Self::DeleteSubDoc { timestamp, .. }
            | Self::Checkpoint { timestamp } => *timestamp,
        }
    }

    /// Target doc in the main doc space, if any.
    #[must_use]
    pub fn doc_id(&self) -> Option<DocId> {
        match self {
            Self::AddDoc { doc_id, .. }
            | Self::UpdateField { doc_id, .. }
            | Self::DeleteDoc { doc_id, .. } => Some(*doc_id),
            Self::DeleteSubDoc { .. } | Self::Checkpoint { .. } => None,
        }
    }

    /// Target doc in the sub doc space, if any.
    #[must_use]
    pub fn sub_doc_id(&self) -> Option<DocId> {
        match self {
            Self::DeleteSubDoc { sub_doc_id, .. } => Some(*sub_doc_id),
            _ => None,
        }
    }

    /// Serializes the operation: type byte, timestamp, then the fields.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a field or value too long to encode.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut buf = vec![self.op_type().as_byte()];
        buf.extend_from_slice(&self.timestamp().to_le_bytes());
        match self {
            Self::AddDoc { doc_id, .. } | Self::DeleteDoc { doc_id, .. } => {
                buf.extend_from_slice(&doc_id.to_le_bytes());
            }
            Self::DeleteSubDoc { sub_doc_id, .. } => {
                buf.extend_from_slice(&sub_doc_id.to_le_bytes());
            }
            Self::UpdateField {
                doc_id,
                field,
                value,
                ..
            } => {
                buf.extend_from_slice(&doc_id.to_le_bytes());
                for bytes in [field.as_bytes(), value.as_slice()] {
                    let len = u32::try_from(bytes.len()).map_err(|_| {
                        CoreError::invalid_argument("update operation too large")
                    })?;
                    buf.extend_from_slice(&len.to_le_bytes());
                    buf.extend_from_slice(bytes);
                }
            }
            Self::Checkpoint { .. } => {}
        }
        Ok(buf)
    }

    /// Deserializes an operation.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOperationType` for an unknown type byte and
    /// `CorruptFormat` for truncated or trailing bytes.
    pub fn decode(data: &[u8]) -> CoreResult<Self> {
        let mut reader = ByteReader { data, pos: 0 };
        let type_byte = reader.take(1)?[0];
        let op_type = OperationType::from_byte(type_byte)
            .ok_or_else(|| CoreError::unknown_operation_type(format!("type byte {type_byte}")))?;
        let timestamp = i64::from_le_bytes(reader.array()?);
        let op = match op_type {
            OperationType::AddDoc => Self::AddDoc {
                timestamp,
                doc_id: reader.u32()?,
            },
            OperationType::DeleteDoc => Self::DeleteDoc {
                timestamp,
                doc_id: reader.u32()?,
            },
            OperationType::DeleteSubDoc => Self::DeleteSubDoc {
                timestamp,
                sub_doc_id: reader.u32()?,
            },
            OperationType::UpdateField => {
                let doc_id = reader.u32()?;
                let field_len = reader.u32()? as usize;
                let field = String::from_utf8(reader.take(field_len)?.to_vec())
                    .map_err(|_| CoreError::corrupt_format("field name is not UTF-8"))?;
                let value_len = reader.u32()? as usize;
                let value = reader.take(value_len)?.to_vec();
                Self::UpdateField {
                    timestamp,
                    doc_id,
                    field,
                    value,
                }
            }
            OperationType::Checkpoint => Self::Checkpoint { timestamp },
        };
        if reader.pos != data.len() {
            return Err(CoreError::corrupt_format(format!(
                "{} trailing bytes after operation",
                data.len() - reader.pos
            )));
        }
        Ok(op)
    }
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> CoreResult<&'a [u8]> {
        let bytes = self
            .pos
            .checked_add(n)
            .and_then(|end| self.data.get(self.pos..end))
            .ok_or_else(|| CoreError::corrupt_format("truncated operation"))?;
        self.pos += n;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> CoreResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }
}

/// How a redo hint bounds the replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedoHintKind {
    /// No bound: nothing was decided yet.
    #[default]
    Unknown,
    /// Replay only for docs inside the hint's ranges.
    RedoDocRange,
}

/// Doc id ranges an operation must be re-checked against.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RedoHint {
    kind: RedoHintKind,
    main_ranges: Vec<DocIdRange>,
    sub_ranges: Vec<DocIdRange>,
}

impl RedoHint {
    /// Creates an empty hint.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Hint kind.
    #[must_use]
    pub fn kind(&self) -> RedoHintKind {
        self.kind
    }

    /// Ranges in the main doc space, sorted by begin.
    #[must_use]
    pub fn main_ranges(&self) -> &[DocIdRange] {
        &self.main_ranges
    }

    /// Ranges in the sub doc space, sorted by begin.
    #[must_use]
    pub fn sub_ranges(&self) -> &[DocIdRange] {
        &self.sub_ranges
    }

    /// Whether main doc `doc_id` lies in a range.
    #[must_use]
    pub fn contains(&self, doc_id: DocId) -> bool {
        ranges_contain(&self.main_ranges, doc_id)
    }

    /// Whether sub doc `doc_id` lies in a range.
    #[must_use]
    pub fn contains_sub(&self, doc_id: DocId) -> bool {
        ranges_contain(&self.sub_ranges, doc_id)
    }

    /// Clears the hint.
    pub fn reset(&mut self) {
        self.kind = RedoHintKind::Unknown;
        self.main_ranges.clear();
        self.sub_ranges.clear();
    }

    fn set(&mut self, ranges: &SpaceRanges) {
        self.kind = RedoHintKind::RedoDocRange;
        self.main_ranges.clone_from(&ranges.main);
        self.sub_ranges.clone_from(&ranges.sub);
    }
}

fn ranges_contain(ranges: &[DocIdRange], doc_id: DocId) -> bool {
    let i = ranges.partition_point(|r| r.start <= doc_id);
    i > 0 && ranges[i - 1].contains(&doc_id)
}

/// Sorts ranges by begin and coalesces overlapping or touching ones.
#[must_use]
pub fn normalize_ranges(mut ranges: Vec<DocIdRange>) -> Vec<DocIdRange> {
    ranges.retain(|r| !r.is_empty());
    ranges.sort_by_key(|r| r.start);
    let mut out: Vec<DocIdRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match out.last_mut() {
            Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
            _ => out.push(range),
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct SpaceRanges {
    main: Vec<DocIdRange>,
    sub: Vec<DocIdRange>,
}

#[derive(Debug, Clone)]
struct RedoRanges {
    delete: SpaceRanges,
    update: SpaceRanges,
}

fn built_ranges(view: &PartitionView) -> BTreeMap<SegmentId, DocIdRange> {
    view.built_iter().map(|s| (s.id, s.doc_id_range())).collect()
}

fn collect_ranges(
    built: &BTreeMap<SegmentId, DocIdRange>,
    segments: &[SegmentId],
) -> Vec<DocIdRange> {
    normalize_ranges(
        segments
            .iter()
            .filter_map(|id| built.get(id).cloned())
            .collect(),
    )
}

/// Decides which buffered operations must be replayed after a reopen.
///
/// Call [`Self::init`] on every reopen attempt; it discards the ranges of
/// the previous one.
#[derive(Debug, Clone, Default)]
pub struct ReopenRedoStrategy {
    ranges: Option<RedoRanges>,
}

impl ReopenRedoStrategy {
    /// Creates an uninitialized strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether [`Self::init`] has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.ranges.is_some()
    }

    /// Computes the redo ranges of a switch from `old_version` to the
    /// version of `new_view`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the schema has a sub schema but the
    /// view has no sub view.
    pub fn init(
        &mut self,
        new_view: &PartitionView,
        old_version: &Version,
        schema: &Schema,
    ) -> CoreResult<()> {
        self.ranges = None;
        let new_version = new_view.version();
        let diff = new_version.diff(old_version);

        let built = built_ranges(new_view);
        let mut delete = SpaceRanges {
            main: collect_ranges(&built, new_version.segments()),
            sub: Vec::new(),
        };
        let mut update = SpaceRanges {
            main: collect_ranges(&built, diff.segments()),
            sub: Vec::new(),
        };

        if schema.has_sub_schema() {
            let sub_view = new_view.sub_view().ok_or_else(|| {
                CoreError::invalid_argument("schema has a sub schema but the view has no sub view")
            })?;
            let sub_built = built_ranges(sub_view);
            delete.sub = collect_ranges(&sub_built, new_version.segments());
            update.sub = collect_ranges(&sub_built, diff.segments());
        }

        info!(
            target: "seglake::redo",
            old_version = %old_version.version_id(),
            new_version = %new_version.version_id(),
            new_segments = diff.segment_count(),
            update_ranges = ?update.main,
            delete_ranges = ?delete.main,
            "computed redo ranges"
        );
        self.ranges = Some(RedoRanges { delete, update });
        Ok(())
    }

    fn ranges(&self) -> CoreResult<&RedoRanges> {
        self.ranges
            .as_ref()
            .ok_or_else(|| CoreError::invariant_violated("redo strategy used before init"))
    }

    /// Update-class ranges as `(main, sub)`.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolated` before [`Self::init`].
    pub fn update_ranges(&self) -> CoreResult<(&[DocIdRange], &[DocIdRange])> {
        let r = &self.ranges()?.update;
        Ok((&r.main, &r.sub))
    }

    /// Delete-class ranges as `(main, sub)`.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolated` before [`Self::init`].
    pub fn delete_ranges(&self) -> CoreResult<(&[DocIdRange], &[DocIdRange])> {
        let r = &self.ranges()?.delete;
        Ok((&r.main, &r.sub))
    }

    /// Classifies `operation`, buffered by `operation_segment`, and fills
    /// `hint` with the ranges it must be re-checked against.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolated` before [`Self::init`] and
    /// `UnknownOperationType` for operations that cannot be bounded.
    pub fn need_redo(
        &self,
        operation_segment: SegmentId,
        operation: &Operation,
        hint: &mut RedoHint,
    ) -> CoreResult<bool> {
        let ranges = self.ranges()?;
        hint.reset();
        match operation.op_type() {
            OperationType::UpdateField => hint.set(&ranges.update),
            OperationType::DeleteDoc | OperationType::DeleteSubDoc => hint.set(&ranges.delete),
            other => return Err(CoreError::unknown_operation_type(other.name())),
        }
        trace!(
            target: "seglake::redo",
            segment = %operation_segment,
            operation = %operation.op_type(),
            ranges = hint.main_ranges().len(),
            "redo bounded by doc ranges"
        );
        Ok(true)
    }
}
