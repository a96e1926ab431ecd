//! Offset table metrics.
//!
//! Counters describing how well a compressed offset table absorbs
//! in-place updates. They are cheap atomics so session readers and the
//! writer can share one instance.

use crate::offset::UpdateOutcome;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for one attribute offset table.
///
/// All counters are atomic and can be read while updates are in progress.
#[derive(Debug, Default)]
pub struct OffsetMetrics {
    /// Updates satisfied by overwriting the entry where it lives.
    inplace_updates: AtomicU64,
    /// Updates that re-encoded a slot into the slice area.
    expand_updates: AtomicU64,
    /// Updates refused because the slice area was exhausted.
    failed_updates: AtomicU64,
    /// Bytes of abandoned blocks.
    wasted_bytes: AtomicU64,
    /// Slice bytes handed out so far.
    slice_bytes_used: AtomicU64,
    /// Bytes held by the table.
    memory_use: AtomicU64,
}

impl OffsetMetrics {
    /// Creates zeroed metrics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of a successful update.
    pub(crate) fn record_update(&self, outcome: UpdateOutcome) {
        match outcome {
            UpdateOutcome::InPlace => {
                self.inplace_updates.fetch_add(1, Ordering::Relaxed);
            }
            UpdateOutcome::Expanded {
                abandoned_bytes,
                slice_bytes,
            } => {
                self.expand_updates.fetch_add(1, Ordering::Relaxed);
                self.wasted_bytes
                    .fetch_add(abandoned_bytes, Ordering::Relaxed);
                self.slice_bytes_used
                    .fetch_add(slice_bytes, Ordering::Relaxed);
            }
        }
    }

    /// Records an update refused for lack of capacity.
    pub(crate) fn record_failed_update(&self) {
        self.failed_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Sets the slice usage, e.g. after loading a persisted slice area.
    pub(crate) fn set_slice_bytes_used(&self, bytes: u64) {
        self.slice_bytes_used.store(bytes, Ordering::Relaxed);
    }

    /// Sets the memory gauge.
    pub(crate) fn set_memory_use(&self, bytes: u64) {
        self.memory_use.store(bytes, Ordering::Relaxed);
    }

    /// Returns the number of in-place updates.
    pub fn inplace_updates(&self) -> u64 {
        self.inplace_updates.load(Ordering::Relaxed)
    }

    /// Returns the number of updates that expanded a slot.
    pub fn expand_updates(&self) -> u64 {
        self.expand_updates.load(Ordering::Relaxed)
    }

    /// Returns the number of updates refused with `CapacityExceeded`.
    pub fn failed_updates(&self) -> u64 {
        self.failed_updates.load(Ordering::Relaxed)
    }

    /// Returns bytes of blocks made unreachable by expansions.
    pub fn wasted_bytes(&self) -> u64 {
        self.wasted_bytes.load(Ordering::Relaxed)
    }

    /// Returns slice bytes in use.
    pub fn slice_bytes_used(&self) -> u64 {
        self.slice_bytes_used.load(Ordering::Relaxed)
    }

    /// Returns the memory held by the table.
    pub fn memory_use(&self) -> u64 {
        self.memory_use.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> OffsetMetricsSnapshot {
        OffsetMetricsSnapshot {
            inplace_updates: self.inplace_updates(),
            expand_updates: self.expand_updates(),
            failed_updates: self.failed_updates(),
            wasted_bytes: self.wasted_bytes(),
            slice_bytes_used: self.slice_bytes_used(),
            memory_use: self.memory_use(),
        }
    }
}

/// A point-in-time copy of [`OffsetMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OffsetMetricsSnapshot {
    /// In-place updates.
    pub inplace_updates: u64,
    /// Expanding updates.
    pub expand_updates: u64,
    /// Refused updates.
    pub failed_updates: u64,
    /// Abandoned block bytes.
    pub wasted_bytes: u64,
    /// Slice bytes in use.
    pub slice_bytes_used: u64,
    /// Table memory.
    pub memory_use: u64,
}
