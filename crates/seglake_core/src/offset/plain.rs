//! Uncompressed offset array.

use super::{check_update_target, le_u32, le_u64, OffsetCodec, UpdateOutcome};
use crate::error::{CoreError, CoreResult};
use crate::types::DocId;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// `doc_count + 1` offsets stored as fixed-width little-endian integers.
///
/// Entries are atomics so an update is immediately visible to every
/// session reader sharing the table, without tearing.
#[derive(Debug)]
pub enum PlainOffsets {
    /// 32-bit entries.
    Narrow(Box<[AtomicU32]>),
    /// 64-bit entries.
    Wide(Box<[AtomicU64]>),
}

impl PlainOffsets {
    /// Builds a table from in-memory offsets.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `offsets` is empty, or
    /// `CapacityExceeded` if a narrow table is asked to hold a value above
    /// `u32::MAX`.
    pub fn from_offsets(offsets: &[u64], wide: bool) -> CoreResult<Self> {
        if offsets.is_empty() {
            return Err(CoreError::invalid_argument(
                "offset table needs at least one entry",
            ));
        }
        if wide {
            return Ok(Self::Wide(offsets.iter().map(|&o| AtomicU64::new(o)).collect()));
        }
        let narrow = offsets
            .iter()
            .map(|&o| {
                u32::try_from(o).map(AtomicU32::new).map_err(|_| {
                    CoreError::capacity_exceeded(format!("offset {o} does not fit 32 bits"))
                })
            })
            .collect::<CoreResult<Box<[AtomicU32]>>>()?;
        Ok(Self::Narrow(narrow))
    }

    /// Parses a table of `doc_count + 1` entries.
    ///
    /// Trailing bytes beyond the last entry are ignored.
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` if `bytes` is shorter than required.
    pub fn init(doc_count: u32, bytes: &[u8], wide: bool) -> CoreResult<Self> {
        let entries = doc_count as usize + 1;
        let width = if wide { 8 } else { 4 };
        let needed = entries * width;
        if bytes.len() < needed {
            return Err(CoreError::corrupt_format(format!(
                "offset file has {} bytes, need {needed} for {doc_count} docs",
                bytes.len()
            )));
        }
        if wide {
            Ok(Self::Wide(
                (0..entries)
                    .map(|i| AtomicU64::new(le_u64(bytes, i * 8)))
                    .collect(),
            ))
        } else {
            Ok(Self::Narrow(
                (0..entries)
                    .map(|i| AtomicU32::new(le_u32(bytes, i * 4)))
                    .collect(),
            ))
        }
    }

    fn entry_count(&self) -> usize {
        match self {
            Self::Narrow(v) => v.len(),
            Self::Wide(v) => v.len(),
        }
    }
}

impl OffsetCodec for PlainOffsets {
    fn doc_count(&self) -> u32 {
        (self.entry_count() - 1) as u32
    }

    #[inline]
    fn get_offset(&self, doc_id: DocId) -> u64 {
        let idx = doc_id as usize;
        assert!(
            idx < self.entry_count(),
            "doc id {doc_id} out of range for offset table of {} docs",
            self.entry_count() - 1
        );
        match self {
            Self::Narrow(v) => u64::from(v[idx].load(Ordering::Acquire)),
            Self::Wide(v) => v[idx].load(Ordering::Acquire),
        }
    }

    fn set_offset(&self, doc_id: DocId, offset: u64) -> CoreResult<UpdateOutcome> {
        check_update_target(doc_id, self.doc_count())?;
        let idx = doc_id as usize;
        match self {
            Self::Narrow(v) => {
                let narrow = u32::try_from(offset).map_err(|_| {
                    CoreError::capacity_exceeded(format!(
                        "offset {offset} does not fit a 32-bit offset table"
                    ))
                })?;
                v[idx].store(narrow, Ordering::Release);
            }
            Self::Wide(v) => v[idx].store(offset, Ordering::Release),
        }
        Ok(UpdateOutcome::InPlace)
    }

    fn is_wide_offset(&self) -> bool {
        matches!(self, Self::Wide(_))
    }

    fn encode(&self) -> Vec<u8> {
        match self {
            Self::Narrow(v) => {
                let mut buf = Vec::with_capacity(v.len() * 4);
                for entry in v.iter() {
                    buf.extend_from_slice(&entry.load(Ordering::Acquire).to_le_bytes());
                }
                buf
            }
            Self::Wide(v) => {
                let mut buf = Vec::with_capacity(v.len() * 8);
                for entry in v.iter() {
                    buf.extend_from_slice(&entry.load(Ordering::Acquire).to_le_bytes());
                }
                buf
            }
        }
    }

    fn memory_use(&self) -> usize {
        match self {
            Self::Narrow(v) => v.len() * 4,
            Self::Wide(v) => v.len() * 8,
        }
    }
}
