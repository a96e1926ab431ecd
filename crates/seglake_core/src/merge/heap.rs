//! Bounded heap for weight-ordered merges.

use crate::types::DocId;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Next doc of one source, keyed by its destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortMergeItem {
    /// Destination position across all outputs.
    pub new_doc_id: DocId,
    /// Source index.
    pub source: usize,
    /// Local doc id in the source.
    pub local: DocId,
}

/// Min-heap over the head doc of every source.
///
/// Each source feeds its surviving docs in destination order, so the heap
/// never holds more than one entry per source and pops docs in global
/// destination order.
#[derive(Debug)]
pub struct SortMergeItemHeap {
    heap: BinaryHeap<Reverse<SortMergeItem>>,
    cursors: Vec<std::vec::IntoIter<(DocId, DocId)>>,
}

impl SortMergeItemHeap {
    /// Creates a heap over per-source `(local, destination)` lists, each
    /// sorted by destination.
    #[must_use]
    pub fn new(sources: Vec<Vec<(DocId, DocId)>>) -> Self {
        let mut heap = BinaryHeap::with_capacity(sources.len());
        let mut cursors: Vec<_> = sources.into_iter().map(Vec::into_iter).collect();
        for (source, cursor) in cursors.iter_mut().enumerate() {
            if let Some((local, new_doc_id)) = cursor.next() {
                heap.push(Reverse(SortMergeItem {
                    new_doc_id,
                    source,
                    local,
                }));
            }
        }
        Self { heap, cursors }
    }

    /// Entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether every source is drained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Iterator for SortMergeItemHeap {
    type Item = SortMergeItem;

    fn next(&mut self) -> Option<SortMergeItem> {
        let Reverse(item) = self.heap.pop()?;
        if let Some((local, new_doc_id)) = self.cursors[item.source].next() {
            self.heap.push(Reverse(SortMergeItem {
                new_doc_id,
                source: item.source,
                local,
            }));
        }
        Some(item)
    }
}
