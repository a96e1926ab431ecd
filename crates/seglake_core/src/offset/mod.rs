//! Offset tables for variable-length attributes.
//!
//! Every variable-length attribute stores its values back to back in a
//! data blob. The offset table maps a segment-local doc id to the byte
//! offset of that doc's value. Two encodings exist, chosen once per
//! attribute when the segment is created and recorded in the attribute
//! meta file:
//!
//! - [`PlainOffsets`]: `doc_count + 1` little-endian u32 or u64 entries
//! - [`CompressedOffsets`]: slots of equal-or-delta packed entries with a
//!   bounded slice area for in-place growth
//!
//! [`OffsetTable`] is the closed set of both encodings; it dispatches with
//! a `match` so the hot `get_offset` path has no virtual call.
//!
//! ## Invariants
//!
//! - A freshly encoded table is non-decreasing and its last entry equals
//!   the blob length
//! - Updates never free memory a concurrent reader may still be reading

mod compressed;
mod plain;
mod reader;
mod slice;

pub use compressed::{CompressedOffsets, COMPRESSED_MAGIC};
pub use plain::PlainOffsets;
pub use reader::{AttributeOffsetReader, OffsetSessionReader};
pub use slice::SliceArea;

use crate::error::{CoreError, CoreResult};
use crate::types::DocId;
use std::fmt;

/// Per-id failure reported by batch lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetLookupError {
    /// The doc id is outside `[0, doc_count)`.
    DocIdOutOfRange {
        /// The requested doc id.
        doc_id: DocId,
        /// The table's doc count.
        doc_count: u32,
    },
}

impl fmt::Display for OffsetLookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DocIdOutOfRange { doc_id, doc_count } => {
                write!(f, "doc id {doc_id} out of range (doc count {doc_count})")
            }
        }
    }
}

impl std::error::Error for OffsetLookupError {}

/// How a successful `set_offset` was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The entry was overwritten where it lives.
    InPlace,
    /// The entry's slot was re-encoded into the slice area.
    Expanded {
        /// Bytes of the previous block that are now unreachable.
        abandoned_bytes: u64,
        /// Slice bytes consumed by the new block.
        slice_bytes: u64,
    },
}

/// Stored format flags of an offset table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OffsetFormat {
    /// Compressed encoding.
    pub compress: bool,
    /// 64-bit offsets.
    pub wide: bool,
}

/// Translation between a local doc id and a byte offset.
///
/// Entry `doc_count` (one past the last doc) holds the blob length.
pub trait OffsetCodec {
    /// Number of documents covered by the table.
    fn doc_count(&self) -> u32;

    /// Returns the offset of `doc_id`'s value.
    ///
    /// # Panics
    ///
    /// Panics if `doc_id > doc_count`. Passing an out-of-range id is a
    /// programming error; use [`OffsetCodec::get_offsets`] for untrusted ids.
    fn get_offset(&self, doc_id: DocId) -> u64;

    /// Overwrites the offset of `doc_id`.
    ///
    /// Only one thread may call this per table at a time.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` when the new value cannot be stored
    /// without a full rewrite, and `InvalidArgument` for an out-of-range id.
    fn set_offset(&self, doc_id: DocId, offset: u64) -> CoreResult<UpdateOutcome>;

    /// True if entries are 64 bits wide.
    fn is_wide_offset(&self) -> bool;

    /// Serializes the table to its on-disk bytes.
    fn encode(&self) -> Vec<u8>;

    /// Bytes of memory held by the table.
    fn memory_use(&self) -> usize;

    /// Looks up several ids at once, preserving input order.
    ///
    /// A bad id produces an error in its own slot and does not affect
    /// its siblings.
    fn get_offsets(&self, doc_ids: &[DocId]) -> Vec<Result<u64, OffsetLookupError>> {
        let doc_count = self.doc_count();
        doc_ids
            .iter()
            .map(|&doc_id| {
                if doc_id < doc_count {
                    Ok(self.get_offset(doc_id))
                } else {
                    Err(OffsetLookupError::DocIdOutOfRange { doc_id, doc_count })
                }
            })
            .collect()
    }
}

/// An offset table in either encoding.
#[derive(Debug)]
pub enum OffsetTable {
    /// Uncompressed array of offsets.
    Plain(PlainOffsets),
    /// Slot-compressed offsets.
    Compressed(CompressedOffsets),
}

impl OffsetTable {
    /// Parses a table from its stored bytes.
    ///
    /// `slice_bytes` is the persisted slice area of a compressed table and
    /// is ignored for plain tables. `slice_capacity_bytes` sizes the slice
    /// area when none was persisted (zero disables growth) and caps the
    /// capacity of a persisted one.
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` if the bytes are too short for
    /// `doc_count + 1` entries or are otherwise malformed.
    pub fn init(
        format: OffsetFormat,
        doc_count: u32,
        bytes: &[u8],
        slice_bytes: Option<&[u8]>,
        slice_capacity_bytes: u64,
    ) -> CoreResult<Self> {
        if format.compress {
            let slice = match slice_bytes {
                Some(raw) => SliceArea::decode(raw, slice_capacity_bytes)?,
                None => SliceArea::with_capacity_bytes(slice_capacity_bytes),
            };
            Ok(Self::Compressed(CompressedOffsets::init(
                doc_count,
                bytes,
                slice,
                format.wide,
            )?))
        } else {
            Ok(Self::Plain(PlainOffsets::init(doc_count, bytes, format.wide)?))
        }
    }

    /// Returns the stored format of this table.
    #[must_use]
    pub fn format(&self) -> OffsetFormat {
        OffsetFormat {
            compress: matches!(self, Self::Compressed(_)),
            wide: self.is_wide_offset(),
        }
    }

    /// Returns the persisted slice area for compressed tables.
    #[must_use]
    pub fn encode_slice(&self) -> Option<Vec<u8>> {
        match self {
            Self::Plain(_) => None,
            Self::Compressed(table) => Some(table.slice().encode()),
        }
    }
}

impl OffsetCodec for OffsetTable {
    #[inline]
    fn doc_count(&self) -> u32 {
        match self {
            Self::Plain(t) => t.doc_count(),
            Self::Compressed(t) => t.doc_count(),
        }
    }

    #[inline]
    fn get_offset(&self, doc_id: DocId) -> u64 {
        match self {
            Self::Plain(t) => t.get_offset(doc_id),
            Self::Compressed(t) => t.get_offset(doc_id),
        }
    }

    fn set_offset(&self, doc_id: DocId, offset: u64) -> CoreResult<UpdateOutcome> {
        match self {
            Self::Plain(t) => t.set_offset(doc_id, offset),
            Self::Compressed(t) => t.set_offset(doc_id, offset),
        }
    }

    fn is_wide_offset(&self) -> bool {
        match self {
            Self::Plain(t) => t.is_wide_offset(),
            Self::Compressed(t) => t.is_wide_offset(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            Self::Plain(t) => t.encode(),
            Self::Compressed(t) => t.encode(),
        }
    }

    fn memory_use(&self) -> usize {
        match self {
            Self::Plain(t) => t.memory_use(),
            Self::Compressed(t) => t.memory_use(),
        }
    }
}

/// Returns true if a blob of up to `max_blob_len` bytes needs 64-bit offsets.
#[must_use]
pub fn needs_wide_offset(max_blob_len: u64, offset_threshold: u64) -> bool {
    max_blob_len > offset_threshold
}

pub(crate) fn check_update_target(doc_id: DocId, doc_count: u32) -> CoreResult<()> {
    if doc_id >= doc_count {
        return Err(CoreError::invalid_argument(format!(
            "doc id {doc_id} out of range for offset table of {doc_count} docs"
        )));
    }
    Ok(())
}

pub(crate) fn le_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

pub(crate) fn le_u32(data: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[at..at + 4]);
    u32::from_le_bytes(buf)
}

pub(crate) fn le_u64(data: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets_of(lens: &[u64]) -> Vec<u64> {
        let mut offsets = Vec::with_capacity(lens.len() + 1);
        let mut cursor = 0;
        offsets.push(0);
        for len in lens {
            cursor += len;
            offsets.push(cursor);
        }
        offsets
    }

    #[test]
    fn table_dispatches_both_encodings() {
        let offsets = offsets_of(&[3, 0, 5, 5, 1]);
        let plain = OffsetTable::Plain(PlainOffsets::from_offsets(&offsets, false).unwrap());
        let compressed =
            OffsetTable::Compressed(CompressedOffsets::from_offsets(&offsets, 2, 0, false).unwrap());

        for table in [&plain, &compressed] {
            assert_eq!(table.doc_count(), 5);
            for (i, &expected) in offsets.iter().enumerate() {
                assert_eq!(table.get_offset(i as DocId), expected);
            }
        }
        assert!(!plain.format().compress);
        assert!(compressed.format().compress);
    }

    #[test]
    fn init_selects_encoding_from_format() {
        let offsets = offsets_of(&[1, 2, 3]);
        let compressed = CompressedOffsets::from_offsets(&offsets, 1, 0, false).unwrap();
        let bytes = compressed.encode();

        let table = OffsetTable::init(
            OffsetFormat {
                compress: true,
                wide: false,
            },
            3,
            &bytes,
            None,
            1024,
        )
        .unwrap();
        assert!(matches!(table, OffsetTable::Compressed(_)));
        assert_eq!(table.get_offset(3), 6);
    }

    #[test]
    fn batch_lookup_keeps_order_and_isolates_errors() {
        let offsets = offsets_of(&[2, 2, 2]);
        let table = OffsetTable::Plain(PlainOffsets::from_offsets(&offsets, false).unwrap());

        let results = table.get_offsets(&[2, 7, 0, 3]);
        assert_eq!(results[0], Ok(4));
        assert_eq!(
            results[1],
            Err(OffsetLookupError::DocIdOutOfRange {
                doc_id: 7,
                doc_count: 3
            })
        );
        assert_eq!(results[2], Ok(0));
        assert!(results[3].is_err());
    }

    #[test]
    fn wide_threshold() {
        assert!(!needs_wide_offset(100, u64::from(u32::MAX)));
        assert!(needs_wide_offset(u64::from(u32::MAX) + 1, u64::from(u32::MAX)));
        assert!(needs_wide_offset(11, 10));
    }
}
