//! Engine configuration.

use crate::types::VersionId;

/// Offset table options for one variable-length attribute.
///
/// Chosen once when the attribute is created; the choice is persisted in
/// the attribute meta file and never re-evaluated on open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetConfig {
    /// Use the compressed ("equivalent compress") encoding.
    pub compress: bool,

    /// Allow in-place offset updates after the segment is built.
    pub updatable: bool,

    /// Largest blob size that still fits 32-bit offsets.
    pub offset_threshold: u64,

    /// Items per compressed slot. Must be a power of two.
    pub slot_item_count: u32,

    /// Capacity of the slice (growth) area used by compressed updates.
    pub slice_capacity_bytes: u64,
}

impl Default for OffsetConfig {
    fn default() -> Self {
        Self {
            compress: false,
            updatable: false,
            offset_threshold: u64::from(u32::MAX),
            slot_item_count: 64,
            slice_capacity_bytes: 1024 * 1024, // 1 MiB
        }
    }
}

impl OffsetConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether offsets are compressed.
    #[must_use]
    pub const fn compress(mut self, value: bool) -> Self {
        self.compress = value;
        self
    }

    /// Sets whether offsets may be updated in place.
    #[must_use]
    pub const fn updatable(mut self, value: bool) -> Self {
        self.updatable = value;
        self
    }

    /// Sets the 32-bit offset threshold.
    #[must_use]
    pub const fn offset_threshold(mut self, value: u64) -> Self {
        self.offset_threshold = value;
        self
    }

    /// Sets the number of items per compressed slot.
    #[must_use]
    pub const fn slot_item_count(mut self, value: u32) -> Self {
        self.slot_item_count = value;
        self
    }

    /// Sets the slice area capacity in bytes.
    #[must_use]
    pub const fn slice_capacity_bytes(mut self, value: u64) -> Self {
        self.slice_capacity_bytes = value;
        self
    }

    /// Returns `log2(slot_item_count)`, or `None` if it isn't a power of two
    /// in `1..=2^16`.
    #[must_use]
    pub fn slot_shift(&self) -> Option<u8> {
        let n = self.slot_item_count;
        (n.is_power_of_two() && n <= 1 << 16).then(|| n.trailing_zeros() as u8)
    }
}

/// Merge options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeConfig {
    /// Allow several instances to merge disjoint parts of one output segment.
    pub enable_multi_output_segment_parallel: bool,

    /// Upper bound on parallel instances per merge.
    pub max_parallel_instances: u32,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enable_multi_output_segment_parallel: true,
            max_parallel_instances: 8,
        }
    }
}

impl MergeConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether parallel merging of one output segment is allowed.
    #[must_use]
    pub const fn enable_multi_output_segment_parallel(mut self, value: bool) -> Self {
        self.enable_multi_output_segment_parallel = value;
        self
    }

    /// Sets the maximum number of parallel instances.
    #[must_use]
    pub const fn max_parallel_instances(mut self, value: u32) -> Self {
        self.max_parallel_instances = value;
        self
    }
}

/// Version retention options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Number of newest versions to keep.
    pub keep_version_count: usize,

    /// Versions kept regardless of age (e.g. pinned by online readers).
    pub reserved_versions: Vec<VersionId>,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_version_count: 2,
            reserved_versions: Vec::new(),
        }
    }
}

impl RetentionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of newest versions to keep.
    #[must_use]
    pub const fn keep_version_count(mut self, value: usize) -> Self {
        self.keep_version_count = value;
        self
    }

    /// Adds a reserved version.
    #[must_use]
    pub fn reserve(mut self, version: VersionId) -> Self {
        self.reserved_versions.push(version);
        self
    }
}
