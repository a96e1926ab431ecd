//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use proptest::prelude::*;
use seglake_core::{DocId, OffsetConfig, SegmentId, SegmentMergeInfo};
use std::collections::BTreeSet;

/// Strategy for attribute values (arbitrary bytes, often empty).
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        1 => Just(Vec::new()),
        4 => prop::collection::vec(any::<u8>(), 1..64),
    ]
}

/// Strategy for the values of one segment.
pub fn segment_values_strategy(max_docs: usize) -> impl Strategy<Value = Vec<Vec<u8>>> {
    prop::collection::vec(value_strategy(), 1..=max_docs)
}

/// Strategy for value lengths, skewed towards runs of equal lengths so
/// compressed slots hit both the equal and the delta encoding.
pub fn value_lengths_strategy(max_docs: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(
        prop_oneof![
            3 => Just(8u64),
            1 => 0u64..4096,
        ],
        0..=max_docs,
    )
}

/// Strategy for a valid offset table: `doc_count + 1` non-decreasing
/// entries starting at zero, the last one being the blob length.
pub fn offsets_strategy(max_docs: usize) -> impl Strategy<Value = Vec<u64>> {
    value_lengths_strategy(max_docs).prop_map(|lengths| {
        let mut offsets = Vec::with_capacity(lengths.len() + 1);
        let mut end = 0u64;
        offsets.push(end);
        for len in lengths {
            end += len;
            offsets.push(end);
        }
        offsets
    })
}

/// Strategy for offset table options.
pub fn offset_config_strategy() -> impl Strategy<Value = OffsetConfig> {
    (any::<bool>(), any::<bool>(), prop::sample::select(vec![1u32, 4, 16, 64]))
        .prop_map(|(compress, updatable, slot_item_count)| {
            OffsetConfig::new()
                .compress(compress)
                .updatable(updatable)
                .slot_item_count(slot_item_count)
                .slice_capacity_bytes(64 * 1024)
        })
}

/// Strategy for deleted local doc ids of a segment with `doc_count` docs.
pub fn deletions_strategy(doc_count: u32) -> impl Strategy<Value = BTreeSet<DocId>> {
    prop::collection::vec(prop::bool::weighted(0.3), doc_count as usize).prop_map(|flags| {
        flags
            .into_iter()
            .zip(0..)
            .filter_map(|(deleted, doc)| deleted.then_some(doc))
            .collect()
    })
}

/// Strategy for merge sources: ascending segments laid out back to back,
/// each with a random deletion set.
pub fn merge_sources_strategy(max_segments: usize) -> impl Strategy<Value = Vec<SegmentMergeInfo>> {
    prop::collection::vec(1u32..40, 1..=max_segments)
        .prop_flat_map(|counts| {
            let deletions: Vec<_> = counts.iter().map(|&c| deletions_strategy(c)).collect();
            (Just(counts), deletions)
        })
        .prop_map(|(counts, deletions)| {
            let mut base = 0;
            counts
                .into_iter()
                .zip(deletions)
                .enumerate()
                .map(|(i, (count, deleted))| {
                    let info = SegmentMergeInfo::new(SegmentId::new(i as u32), base, count)
                        .with_deleted(deleted);
                    base += count;
                    info
                })
                .collect()
        })
}
