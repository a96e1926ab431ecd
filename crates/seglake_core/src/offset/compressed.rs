//! Slot-compressed ("equivalent compress") offset table.
//!
//! Entries are grouped into slots of `2^slot_shift` items. Each slot has a
//! 64-bit descriptor:
//!
//! ```text
//! bit 63      equal flag: every item in the slot has the value in bits 0..63
//! bit 62      block lives in the slice area instead of the base block area
//! bits 48..55 delta width in bits (1, 2, 4, 8, 16, 32 or 64)
//! bits 0..48  word index of the block
//! ```
//!
//! A block is one `base` word followed by the slot's deltas from `base`,
//! bit-packed into 64-bit words. Widths divide 64, so a delta never spans
//! two words and every entry can be rewritten with one atomic store.
//!
//! ## File Format
//!
//! ```text
//! | magic (4) | version (2) | slot_shift (1) | flags (1) | item_count (8) |
//! | slot_count (4) | reserved (4) | block_words (8) |
//! | slot descriptors (slot_count * 8) | block words (block_words * 8) |
//! ```
//!
//! Flags: `0x01` = wide (64-bit) offsets.

use super::slice::SliceArea;
use super::{check_update_target, le_u16, le_u32, le_u64, OffsetCodec, UpdateOutcome};
use crate::error::{CoreError, CoreResult};
use crate::types::DocId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Magic bytes identifying a compressed offset file.
pub const COMPRESSED_MAGIC: [u8; 4] = *b"EQCO";

/// Current compressed offset format version.
pub const COMPRESSED_VERSION: u16 = 1;

const HEADER_LEN: usize = 32;
const FLAG_WIDE: u8 = 0x01;
const MAX_SLOT_SHIFT: u8 = 16;

const EQUAL_FLAG: u64 = 1 << 63;
const SLICE_FLAG: u64 = 1 << 62;
const VALUE_MASK: u64 = !EQUAL_FLAG;
const WIDTH_SHIFT: u32 = 48;
const WIDTH_MASK: u64 = 0x7F;
const INDEX_MASK: u64 = (1 << 48) - 1;

const WIDTHS: [u32; 7] = [1, 2, 4, 8, 16, 32, 64];

fn width_for(max_delta: u64) -> u32 {
    WIDTHS
        .iter()
        .copied()
        .find(|&w| w == 64 || max_delta < (1u64 << w))
        .unwrap_or(64)
}

fn delta_words(len: usize, width: u32) -> usize {
    (len * width as usize).div_ceil(64)
}

fn fits(delta: u64, width: u32) -> bool {
    width == 64 || delta < (1u64 << width)
}

fn block_descriptor(start: usize, width: u32, in_slice: bool) -> u64 {
    let mut desc = (start as u64 & INDEX_MASK) | (u64::from(width) << WIDTH_SHIFT);
    if in_slice {
        desc |= SLICE_FLAG;
    }
    desc
}

fn descriptor_width(desc: u64) -> u32 {
    ((desc >> WIDTH_SHIFT) & WIDTH_MASK) as u32
}

fn descriptor_start(desc: u64) -> usize {
    (desc & INDEX_MASK) as usize
}

/// Location of a delta inside a block: word offset after `base` and shift.
fn delta_position(pos: usize, width: u32) -> (usize, u32) {
    if width == 64 {
        return (pos, 0);
    }
    let per_word = (64 / width) as usize;
    (pos / per_word, (pos % per_word) as u32 * width)
}

enum SlotEncoding {
    Equal(u64),
    Block { width: u32, words: Vec<u64> },
}

fn encode_slot(values: &[u64]) -> SlotEncoding {
    let min = values.iter().copied().min().unwrap_or(0);
    let max = values.iter().copied().max().unwrap_or(0);
    if min == max && min <= VALUE_MASK {
        return SlotEncoding::Equal(min | EQUAL_FLAG);
    }
    let width = width_for(max - min);
    let mut words = vec![0u64; 1 + delta_words(values.len(), width)];
    words[0] = min;
    for (pos, &value) in values.iter().enumerate() {
        let (word, shift) = delta_position(pos, width);
        words[1 + word] |= (value - min) << shift;
    }
    SlotEncoding::Block { width, words }
}

/// Compressed offset table with bounded in-place growth.
#[derive(Debug)]
pub struct CompressedOffsets {
    item_count: usize,
    slot_shift: u8,
    wide: bool,
    slots: Box<[AtomicU64]>,
    blocks: Box<[AtomicU64]>,
    slice: SliceArea,
}

impl CompressedOffsets {
    /// Compresses in-memory offsets.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty input or a slot shift above 16.
    pub fn from_offsets(
        offsets: &[u64],
        slot_shift: u8,
        slice_capacity_bytes: u64,
        wide: bool,
    ) -> CoreResult<Self> {
        if offsets.is_empty() {
            return Err(CoreError::invalid_argument(
                "offset table needs at least one entry",
            ));
        }
        if slot_shift > MAX_SLOT_SHIFT {
            return Err(CoreError::invalid_argument(format!(
                "slot shift {slot_shift} exceeds {MAX_SLOT_SHIFT}"
            )));
        }

        let slot_items = 1usize << slot_shift;
        let mut slots = Vec::with_capacity(offsets.len().div_ceil(slot_items));
        let mut blocks = Vec::new();
        for chunk in offsets.chunks(slot_items) {
            match encode_slot(chunk) {
                SlotEncoding::Equal(desc) => slots.push(desc),
                SlotEncoding::Block { width, words } => {
                    slots.push(block_descriptor(blocks.len(), width, false));
                    blocks.extend(words);
                }
            }
        }

        Ok(Self {
            item_count: offsets.len(),
            slot_shift,
            wide,
            slots: slots.into_iter().map(AtomicU64::new).collect(),
            blocks: blocks.into_iter().map(AtomicU64::new).collect(),
            slice: SliceArea::with_capacity_bytes(slice_capacity_bytes),
        })
    }

    /// Parses a stored table covering `doc_count + 1` entries.
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` on a bad header, a truncated body, an item
    /// count that doesn't match `doc_count`, a wide flag that disagrees with
    /// `wide`, or a descriptor pointing outside its area.
    pub fn init(doc_count: u32, bytes: &[u8], slice: SliceArea, wide: bool) -> CoreResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(CoreError::corrupt_format(format!(
                "compressed offset file has {} bytes, header needs {HEADER_LEN}",
                bytes.len()
            )));
        }
        if bytes[0..4] != COMPRESSED_MAGIC {
            return Err(CoreError::corrupt_format("invalid compressed offset magic"));
        }
        let version = le_u16(bytes, 4);
        if version > COMPRESSED_VERSION {
            return Err(CoreError::corrupt_format(format!(
                "unsupported compressed offset version: {version}"
            )));
        }
        let slot_shift = bytes[6];
        if slot_shift > MAX_SLOT_SHIFT {
            return Err(CoreError::corrupt_format(format!(
                "slot shift {slot_shift} out of range"
            )));
        }
        let stored_wide = bytes[7] & FLAG_WIDE != 0;
        if stored_wide != wide {
            return Err(CoreError::corrupt_format(
                "offset width flag disagrees with attribute meta",
            ));
        }
        let item_count = le_u64(bytes, 8) as usize;
        if item_count != doc_count as usize + 1 {
            return Err(CoreError::corrupt_format(format!(
                "compressed offsets hold {item_count} entries, need {}",
                doc_count as usize + 1
            )));
        }
        let slot_count = le_u32(bytes, 16) as usize;
        if slot_count != item_count.div_ceil(1 << slot_shift) {
            return Err(CoreError::corrupt_format(format!(
                "slot count {slot_count} does not cover {item_count} entries"
            )));
        }
        let block_words = usize::try_from(le_u64(bytes, 24)).map_err(|_| {
            CoreError::corrupt_format("compressed offset block word count out of range")
        })?;
        let needed = slot_count
            .checked_add(block_words)
            .and_then(|words| words.checked_mul(8))
            .and_then(|body| body.checked_add(HEADER_LEN))
            .ok_or_else(|| {
                CoreError::corrupt_format(format!(
                    "compressed offset header claims {block_words} block words"
                ))
            })?;
        if bytes.len() < needed {
            return Err(CoreError::corrupt_format(format!(
                "compressed offset file has {} bytes, need {needed}",
                bytes.len()
            )));
        }

        let slots: Box<[AtomicU64]> = (0..slot_count)
            .map(|i| AtomicU64::new(le_u64(bytes, HEADER_LEN + i * 8)))
            .collect();
        let block_base = HEADER_LEN + slot_count * 8;
        let blocks: Box<[AtomicU64]> = (0..block_words)
            .map(|i| AtomicU64::new(le_u64(bytes, block_base + i * 8)))
            .collect();

        let table = Self {
            item_count,
            slot_shift,
            wide,
            slots,
            blocks,
            slice,
        };
        table.validate_descriptors()?;
        Ok(table)
    }

    fn validate_descriptors(&self) -> CoreResult<()> {
        for slot in 0..self.slots.len() {
            let desc = self.slots[slot].load(Ordering::Acquire);
            if desc & EQUAL_FLAG != 0 {
                continue;
            }
            let width = descriptor_width(desc);
            if !WIDTHS.contains(&width) {
                return Err(CoreError::corrupt_format(format!(
                    "slot {slot} has invalid delta width {width}"
                )));
            }
            let limit = if desc & SLICE_FLAG != 0 {
                self.slice.used_words()
            } else {
                self.blocks.len()
            };
            let end = descriptor_start(desc) + 1 + delta_words(self.slot_len(slot), width);
            if end > limit {
                return Err(CoreError::corrupt_format(format!(
                    "slot {slot} block ends at word {end}, area holds {limit}"
                )));
            }
        }
        Ok(())
    }

    /// Items per slot.
    #[must_use]
    pub fn slot_item_count(&self) -> usize {
        1 << self.slot_shift
    }

    /// The slice (growth) area.
    #[must_use]
    pub fn slice(&self) -> &SliceArea {
        &self.slice
    }

    fn slot_len(&self, slot: usize) -> usize {
        let items = self.slot_item_count();
        items.min(self.item_count - slot * items)
    }

    fn area(&self, desc: u64) -> &[AtomicU64] {
        if desc & SLICE_FLAG != 0 {
            self.slice.words()
        } else {
            &self.blocks
        }
    }

    #[inline]
    fn value_at(&self, desc: u64, pos: usize) -> u64 {
        if desc & EQUAL_FLAG != 0 {
            return desc & VALUE_MASK;
        }
        let words = self.area(desc);
        let start = descriptor_start(desc);
        let width = descriptor_width(desc);
        let base = words[start].load(Ordering::Acquire);
        let (word, shift) = delta_position(pos, width);
        let raw = words[start + 1 + word].load(Ordering::Acquire);
        if width == 64 {
            base + raw
        } else {
            base + ((raw >> shift) & ((1u64 << width) - 1))
        }
    }

    fn slot_values(&self, slot: usize, desc: u64) -> Vec<u64> {
        (0..self.slot_len(slot))
            .map(|pos| self.value_at(desc, pos))
            .collect()
    }

    fn block_bytes(&self, slot: usize, desc: u64) -> u64 {
        if desc & EQUAL_FLAG != 0 {
            return 0;
        }
        ((1 + delta_words(self.slot_len(slot), descriptor_width(desc))) * 8) as u64
    }

    fn expand(&self, slot: usize, pos: usize, offset: u64, old_desc: u64) -> CoreResult<UpdateOutcome> {
        let mut values = self.slot_values(slot, old_desc);
        values[pos] = offset;
        let abandoned_bytes = self.block_bytes(slot, old_desc);

        match encode_slot(&values) {
            SlotEncoding::Equal(desc) => {
                self.slots[slot].store(desc, Ordering::Release);
                Ok(UpdateOutcome::Expanded {
                    abandoned_bytes,
                    slice_bytes: 0,
                })
            }
            SlotEncoding::Block { width, words } => {
                let start = self.slice.allocate(words.len()).ok_or_else(|| {
                    CoreError::capacity_exceeded(format!(
                        "slice area full: need {} words, {} of {} used",
                        words.len(),
                        self.slice.used_words(),
                        self.slice.capacity_words()
                    ))
                })?;
                let target = self.slice.words();
                for (i, word) in words.iter().enumerate() {
                    target[start + i].store(*word, Ordering::Release);
                }
                // Publish only after the block is fully written.
                self.slots[slot].store(block_descriptor(start, width, true), Ordering::Release);
                Ok(UpdateOutcome::Expanded {
                    abandoned_bytes,
                    slice_bytes: (words.len() * 8) as u64,
                })
            }
        }
    }
}

impl OffsetCodec for CompressedOffsets {
    fn doc_count(&self) -> u32 {
        (self.item_count - 1) as u32
    }

    #[inline]
    fn get_offset(&self, doc_id: DocId) -> u64 {
        let idx = doc_id as usize;
        assert!(
            idx < self.item_count,
            "doc id {doc_id} out of range for offset table of {} docs",
            self.item_count - 1
        );
        let slot = idx >> self.slot_shift;
        let desc = self.slots[slot].load(Ordering::Acquire);
        self.value_at(desc, idx & (self.slot_item_count() - 1))
    }

    fn set_offset(&self, doc_id: DocId, offset: u64) -> CoreResult<UpdateOutcome> {
        check_update_target(doc_id, self.doc_count())?;
        if !self.wide && offset > u64::from(u32::MAX) {
            return Err(CoreError::capacity_exceeded(format!(
                "offset {offset} does not fit a 32-bit offset table"
            )));
        }
        let idx = doc_id as usize;
        let slot = idx >> self.slot_shift;
        let pos = idx & (self.slot_item_count() - 1);
        let desc = self.slots[slot].load(Ordering::Acquire);

        if desc & EQUAL_FLAG != 0 {
            if desc & VALUE_MASK == offset {
                return Ok(UpdateOutcome::InPlace);
            }
            return self.expand(slot, pos, offset, desc);
        }

        let words = self.area(desc);
        let start = descriptor_start(desc);
        let width = descriptor_width(desc);
        let base = words[start].load(Ordering::Acquire);
        if offset < base || !fits(offset - base, width) {
            return self.expand(slot, pos, offset, desc);
        }

        let delta = offset - base;
        let (word, shift) = delta_position(pos, width);
        let cell = &words[start + 1 + word];
        if width == 64 {
            cell.store(delta, Ordering::Release);
        } else {
            let mask = ((1u64 << width) - 1) << shift;
            let old = cell.load(Ordering::Acquire);
            cell.store((old & !mask) | (delta << shift), Ordering::Release);
        }
        Ok(UpdateOutcome::InPlace)
    }

    fn is_wide_offset(&self) -> bool {
        self.wide
    }

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + (self.slots.len() + self.blocks.len()) * 8);
        buf.extend_from_slice(&COMPRESSED_MAGIC);
        buf.extend_from_slice(&COMPRESSED_VERSION.to_le_bytes());
        buf.push(self.slot_shift);
        buf.push(if self.wide { FLAG_WIDE } else { 0 });
        buf.extend_from_slice(&(self.item_count as u64).to_le_bytes());
        buf.extend_from_slice(&(self.slots.len() as u32).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&(self.blocks.len() as u64).to_le_bytes());
        for slot in self.slots.iter() {
            buf.extend_from_slice(&slot.load(Ordering::Acquire).to_le_bytes());
        }
        for word in self.blocks.iter() {
            buf.extend_from_slice(&word.load(Ordering::Acquire).to_le_bytes());
        }
        buf
    }

    fn memory_use(&self) -> usize {
        (self.slots.len() + self.blocks.len() + self.slice.capacity_words()) * 8
    }
}
