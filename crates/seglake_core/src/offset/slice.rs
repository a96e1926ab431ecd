//! Append-only growth area for compressed offset blocks.

use super::le_u64;
use crate::error::{CoreError, CoreResult};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

/// Fixed-capacity, append-only array of 64-bit words.
///
/// Blocks that outgrow their encoding are rewritten here. Words are never
/// reclaimed, so a reader that loaded a block location before an update
/// keeps reading valid (if stale) data.
///
/// ## Format
///
/// ```text
/// | used_words (8) | capacity_words (8) | words (used_words * 8) |
/// ```
#[derive(Debug)]
pub struct SliceArea {
    words: Box<[AtomicU64]>,
    used: AtomicUsize,
}

impl SliceArea {
    /// Creates an empty area able to hold `capacity_bytes` (rounded down to
    /// whole words).
    #[must_use]
    pub fn with_capacity_bytes(capacity_bytes: u64) -> Self {
        let words = (capacity_bytes / 8) as usize;
        Self {
            words: (0..words).map(|_| AtomicU64::new(0)).collect(),
            used: AtomicUsize::new(0),
        }
    }

    /// Parses a persisted area, keeping room for at most
    /// `max_capacity_bytes` of words (never fewer than the words in use).
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` if the header is truncated, `used` exceeds
    /// `capacity`, or fewer than `used` words follow.
    pub fn decode(data: &[u8], max_capacity_bytes: u64) -> CoreResult<Self> {
        if data.len() < 16 {
            return Err(CoreError::corrupt_format("slice file too short"));
        }
        let used = le_u64(data, 0);
        let stored_capacity = le_u64(data, 8);
        if used > stored_capacity {
            return Err(CoreError::corrupt_format(format!(
                "slice uses {used} words but holds {stored_capacity}"
            )));
        }
        let needed = usize::try_from(used)
            .ok()
            .and_then(|words| words.checked_mul(8))
            .and_then(|bytes| bytes.checked_add(16));
        let used = match needed {
            Some(needed) if data.len() >= needed => (needed - 16) / 8,
            _ => {
                return Err(CoreError::corrupt_format(format!(
                    "slice file truncated: {} bytes for {used} words",
                    data.len()
                )));
            }
        };
        let budget = usize::try_from(max_capacity_bytes / 8).unwrap_or(usize::MAX);
        let capacity = usize::try_from(stored_capacity)
            .unwrap_or(usize::MAX)
            .min(budget.max(used));
        if (capacity as u64) < stored_capacity {
            debug!(
                stored = stored_capacity,
                capacity,
                used,
                "clamped slice capacity"
            );
        }
        let words = (0..capacity)
            .map(|i| {
                let value = if i < used { le_u64(data, 16 + i * 8) } else { 0 };
                AtomicU64::new(value)
            })
            .collect();
        Ok(Self {
            words,
            used: AtomicUsize::new(used),
        })
    }

    /// Serializes the used part of the area.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let used = self.used_words();
        let mut buf = Vec::with_capacity(16 + used * 8);
        buf.extend_from_slice(&(used as u64).to_le_bytes());
        buf.extend_from_slice(&(self.words.len() as u64).to_le_bytes());
        for word in &self.words[..used] {
            buf.extend_from_slice(&word.load(Ordering::Acquire).to_le_bytes());
        }
        buf
    }

    /// Reserves `count` words and returns the index of the first one, or
    /// `None` if the area is exhausted.
    ///
    /// Single writer only.
    pub fn allocate(&self, count: usize) -> Option<usize> {
        let start = self.used.load(Ordering::Acquire);
        let end = start.checked_add(count)?;
        if end > self.words.len() {
            return None;
        }
        self.used.store(end, Ordering::Release);
        Some(start)
    }

    /// The word storage.
    #[must_use]
    pub fn words(&self) -> &[AtomicU64] {
        &self.words
    }

    /// Words handed out so far.
    #[must_use]
    pub fn used_words(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Total words available.
    #[must_use]
    pub fn capacity_words(&self) -> usize {
        self.words.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_until_exhausted() {
        let area = SliceArea::with_capacity_bytes(40);
        assert_eq!(area.capacity_words(), 5);
        assert_eq!(area.allocate(3), Some(0));
        assert_eq!(area.allocate(2), Some(3));
        assert_eq!(area.allocate(1), None);
        assert_eq!(area.used_words(), 5);
    }

    #[test]
    fn encode_decode_keeps_used_words() {
        let area = SliceArea::with_capacity_bytes(32);
        let start = area.allocate(2).unwrap();
        area.words()[start].store(7, Ordering::Release);
        area.words()[start + 1].store(9, Ordering::Release);

        let decoded = SliceArea::decode(&area.encode(), 32).unwrap();
        assert_eq!(decoded.used_words(), 2);
        assert_eq!(decoded.capacity_words(), 4);
        assert_eq!(decoded.words()[1].load(Ordering::Acquire), 9);
        assert_eq!(decoded.allocate(2), Some(2));
    }

    #[test]
    fn decode_rejects_bad_headers() {
        assert!(SliceArea::decode(&[0u8; 8], 64).is_err());

        let mut buf = Vec::new();
        buf.extend_from_slice(&5u64.to_le_bytes());
        buf.extend_from_slice(&2u64.to_le_bytes());
        assert!(SliceArea::decode(&buf, 64).is_err());

        let mut buf = Vec::new();
        buf.extend_from_slice(&2u64.to_le_bytes());
        buf.extend_from_slice(&4u64.to_le_bytes());
        buf.extend_from_slice(&1u64.to_le_bytes());
        assert!(SliceArea::decode(&buf, 64).is_err());
    }

    fn header(used: u64, capacity: u64) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&used.to_le_bytes());
        buf.extend_from_slice(&capacity.to_le_bytes());
        buf
    }

    #[test]
    fn oversized_used_count_is_corrupt() {
        for used in [1u64 << 61, u64::MAX, 1 << 40] {
            let err = SliceArea::decode(&header(used, used), 1024).unwrap_err();
            assert!(matches!(err, CoreError::CorruptFormat { .. }), "used {used}");
        }
    }

    #[test]
    fn stored_capacity_is_clamped_to_budget() {
        let area = SliceArea::decode(&header(0, 1 << 40), 64).unwrap();
        assert_eq!(area.capacity_words(), 8);
        assert_eq!(area.used_words(), 0);

        // words in use are always kept
        let mut buf = header(3, 1 << 40);
        for word in [4u64, 5, 6] {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        let area = SliceArea::decode(&buf, 0).unwrap();
        assert_eq!(area.capacity_words(), 3);
        assert_eq!(area.words()[2].load(Ordering::Acquire), 6);
        assert_eq!(area.allocate(1), None);

        // a smaller stored capacity wins over the budget
        assert_eq!(SliceArea::decode(&header(0, 2), 1024).unwrap().capacity_words(), 2);
    }

    #[test]
    fn zero_capacity_never_allocates() {
        let area = SliceArea::with_capacity_bytes(0);
        assert_eq!(area.allocate(1), None);
        assert_eq!(area.allocate(0), Some(0));
    }
}
