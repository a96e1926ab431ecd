//! Segment merging.
//!
//! A merge combines N built source segments into M output segments. The
//! [`ReclaimMap`] decides where every surviving document goes; each data
//! kind (attribute, summary) runs the shared [`Merger`] lifecycle through
//! a small [`MergeStrategy`]. Outputs may be written by several threads at
//! once and reconciled afterwards. Update patches of merged sources that
//! target segments outside the merge move into the last output only.

mod coordinator;
mod heap;
mod merger;
mod reclaim;
mod strategy;

pub use coordinator::{MergeCoordinator, MergeOutcome, MergePlan};
pub use heap::{SortMergeItem, SortMergeItemHeap};
pub use merger::{MergeResource, Merger, ParallelMergeItem, SegmentMerger};
pub use reclaim::{NewDocId, OldDocId, OutputSplit, ReclaimMap, SegmentMergeInfo};
pub use strategy::{AttributeMergeStrategy, MergeStrategy, SummaryMergeStrategy};

/// Merger of one attribute.
pub type AttributeMerger = SegmentMerger<AttributeMergeStrategy>;

/// Merger of stored summaries.
pub type SummaryMerger = SegmentMerger<SummaryMergeStrategy>;
