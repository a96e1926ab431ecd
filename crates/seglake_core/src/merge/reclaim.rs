//! Doc id remapping for merges.

use crate::error::{CoreError, CoreResult};
use crate::types::{DocId, SegmentId};
use std::collections::BTreeSet;

/// A source segment as seen by the merge planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMergeInfo {
    /// Segment id.
    pub segment_id: SegmentId,
    /// First global doc id of the segment in the partition view.
    pub base_doc_id: DocId,
    /// Documents in the segment, deleted ones included.
    pub doc_count: u32,
    /// Local ids of deleted documents.
    pub deleted: BTreeSet<DocId>,
}

impl SegmentMergeInfo {
    /// Creates an info with no deletions.
    #[must_use]
    pub fn new(segment_id: SegmentId, base_doc_id: DocId, doc_count: u32) -> Self {
        Self {
            segment_id,
            base_doc_id,
            doc_count,
            deleted: BTreeSet::new(),
        }
    }

    /// Marks local docs as deleted.
    #[must_use]
    pub fn with_deleted(mut self, deleted: impl IntoIterator<Item = DocId>) -> Self {
        self.deleted.extend(deleted);
        self
    }

    /// Number of deleted documents.
    #[must_use]
    pub fn deleted_count(&self) -> u32 {
        self.deleted.len() as u32
    }

    /// Documents surviving the merge.
    #[must_use]
    pub fn surviving_count(&self) -> u32 {
        self.doc_count - self.deleted_count()
    }
}

/// How surviving documents are split across output segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSplit {
    /// `n` outputs of near-equal size; earlier outputs take the remainder.
    Even(usize),
    /// Explicit output sizes; must sum to the surviving doc count.
    Sizes(Vec<u32>),
}

impl OutputSplit {
    /// Resolves the split for `total` surviving docs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for zero outputs or sizes that don't sum
    /// to `total`.
    pub fn sizes(&self, total: u32) -> CoreResult<Vec<u32>> {
        match self {
            Self::Even(0) => Err(CoreError::invalid_argument("merge needs at least one output")),
            Self::Even(n) => {
                let n32 = u32::try_from(*n)
                    .map_err(|_| CoreError::invalid_argument(format!("{n} outputs")))?;
                let (base, rem) = (total / n32, total % n32);
                Ok((0..n32).map(|i| base + u32::from(i < rem)).collect())
            }
            Self::Sizes(sizes) if sizes.is_empty() => {
                Err(CoreError::invalid_argument("merge needs at least one output"))
            }
            Self::Sizes(sizes) => {
                let sum: u64 = sizes.iter().map(|s| u64::from(*s)).sum();
                if sum != u64::from(total) {
                    return Err(CoreError::invalid_argument(format!(
                        "output sizes sum to {sum}, {total} docs survive"
                    )));
                }
                Ok(sizes.clone())
            }
        }
    }
}

/// Destination of a surviving document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewDocId {
    /// Output segment index.
    pub output: usize,
    /// Local id in that output.
    pub local: DocId,
}

/// Origin of an output document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OldDocId {
    /// Source segment id.
    pub segment: SegmentId,
    /// Index of the source in the merge.
    pub source: usize,
    /// Local id in that source.
    pub local: DocId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReclaimSource {
    segment_id: SegmentId,
    doc_count: u32,
    old_base: DocId,
}

/// Maps every document of the merge sources to its output position, or to
/// nothing if it is dropped.
///
/// Old positions number the sources' docs back to back in source order;
/// new positions number the surviving docs back to back in output order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimMap {
    sources: Vec<ReclaimSource>,
    old_to_new: Vec<Option<DocId>>,
    new_to_old: Vec<DocId>,
    output_doc_counts: Vec<u32>,
    output_bases: Vec<DocId>,
    natural_order: bool,
}

impl ReclaimMap {
    fn sources_of(infos: &[SegmentMergeInfo]) -> CoreResult<Vec<ReclaimSource>> {
        if infos.windows(2).any(|w| w[0].segment_id >= w[1].segment_id) {
            return Err(CoreError::invalid_segment_set(
                "merge sources must be strictly ascending by segment id",
            ));
        }
        let mut old_base: DocId = 0;
        let mut sources = Vec::with_capacity(infos.len());
        for info in infos {
            if let Some(bad) = info.deleted.iter().find(|d| **d >= info.doc_count) {
                return Err(CoreError::invalid_argument(format!(
                    "deleted doc {bad} out of range for {} ({} docs)",
                    info.segment_id, info.doc_count
                )));
            }
            sources.push(ReclaimSource {
                segment_id: info.segment_id,
                doc_count: info.doc_count,
                old_base,
            });
            old_base = old_base.checked_add(info.doc_count).ok_or_else(|| {
                CoreError::invalid_segment_set("merge sources exceed the doc id space")
            })?;
        }
        Ok(sources)
    }

    fn assemble(
        sources: Vec<ReclaimSource>,
        old_to_new: Vec<Option<DocId>>,
        new_to_old: Vec<DocId>,
        split: &OutputSplit,
    ) -> CoreResult<Self> {
        let output_doc_counts = split.sizes(new_to_old.len() as u32)?;
        let output_bases = output_doc_counts
            .iter()
            .scan(0, |base, count| {
                let this = *base;
                *base += count;
                Some(this)
            })
            .collect();
        let natural_order = new_to_old.windows(2).all(|w| w[0] < w[1]);
        Ok(Self {
            sources,
            old_to_new,
            new_to_old,
            output_doc_counts,
            output_bases,
            natural_order,
        })
    }

    /// Builds a map keeping surviving docs in source order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSegmentSet` for unordered sources, and
    /// `InvalidArgument` for bad deletions or a bad split.
    pub fn build(infos: &[SegmentMergeInfo], split: &OutputSplit) -> CoreResult<Self> {
        let sources = Self::sources_of(infos)?;
        let mut old_to_new = Vec::new();
        let mut new_to_old = Vec::new();
        for (info, source) in infos.iter().zip(&sources) {
            for local in 0..info.doc_count {
                if info.deleted.contains(&local) {
                    old_to_new.push(None);
                } else {
                    old_to_new.push(Some(new_to_old.len() as DocId));
                    new_to_old.push(source.old_base + local);
                }
            }
        }
        Self::assemble(sources, old_to_new, new_to_old, split)
    }

    /// Builds a map whose output order is `order`: the surviving docs as
    /// `(segment, local id)`, heaviest first.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` unless `order` lists every surviving doc
    /// exactly once and nothing else.
    pub fn by_weight(
        infos: &[SegmentMergeInfo],
        order: &[(SegmentId, DocId)],
        split: &OutputSplit,
    ) -> CoreResult<Self> {
        let sources = Self::sources_of(infos)?;
        let total: usize = infos.iter().map(|i| i.doc_count as usize).sum();
        let surviving: usize = infos.iter().map(|i| i.surviving_count() as usize).sum();
        if order.len() != surviving {
            return Err(CoreError::invalid_argument(format!(
                "weight order lists {} docs, {surviving} survive",
                order.len()
            )));
        }
        let mut old_to_new = vec![None; total];
        let mut new_to_old = Vec::with_capacity(order.len());
        for (new_id, (segment, local)) in order.iter().enumerate() {
            let index = sources
                .binary_search_by_key(segment, |s| s.segment_id)
                .map_err(|_| {
                    CoreError::invalid_argument(format!("{segment} is not a merge source"))
                })?;
            let info = &infos[index];
            if *local >= info.doc_count || info.deleted.contains(local) {
                return Err(CoreError::invalid_argument(format!(
                    "doc {local} of {segment} does not survive the merge"
                )));
            }
            let old = sources[index].old_base + local;
            let slot = &mut old_to_new[old as usize];
            if slot.is_some() {
                return Err(CoreError::invalid_argument(format!(
                    "doc {local} of {segment} is ordered twice"
                )));
            }
            *slot = Some(new_id as DocId);
            new_to_old.push(old);
        }
        Self::assemble(sources, old_to_new, new_to_old, split)
    }

    fn source_of_old(&self, old: DocId) -> usize {
        self.sources.partition_point(|s| s.old_base <= old) - 1
    }

    fn output_of_new(&self, new: DocId) -> usize {
        self.output_bases.partition_point(|b| *b <= new) - 1
    }

    /// Number of sources.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Source segment ids in merge order.
    pub fn source_segments(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.sources.iter().map(|s| s.segment_id)
    }

    /// Doc count of source `source`.
    #[must_use]
    pub fn source_doc_count(&self, source: usize) -> u32 {
        self.sources.get(source).map_or(0, |s| s.doc_count)
    }

    /// Number of output segments.
    #[must_use]
    pub fn output_count(&self) -> usize {
        self.output_doc_counts.len()
    }

    /// Doc count of each output segment.
    #[must_use]
    pub fn output_doc_counts(&self) -> &[u32] {
        &self.output_doc_counts
    }

    /// Surviving documents across all outputs.
    #[must_use]
    pub fn new_doc_count(&self) -> u32 {
        self.new_to_old.len() as u32
    }

    /// Documents dropped by the merge.
    #[must_use]
    pub fn deleted_doc_count(&self) -> u32 {
        (self.old_to_new.len() - self.new_to_old.len()) as u32
    }

    /// Whether outputs take docs in source order, so a single forward pass
    /// over each source appends to every output in order.
    #[must_use]
    pub fn is_natural_order(&self) -> bool {
        self.natural_order
    }

    /// Destination of doc `local` of source index `source`.
    #[must_use]
    pub fn get_new_id_at(&self, source: usize, local: DocId) -> Option<NewDocId> {
        let src = self.sources.get(source)?;
        if local >= src.doc_count {
            return None;
        }
        let new = self.old_to_new[(src.old_base + local) as usize]?;
        let output = self.output_of_new(new);
        Some(NewDocId {
            output,
            local: new - self.output_bases[output],
        })
    }

    /// Destination of doc `local` of `segment`; `None` for dropped docs
    /// and docs outside the merge.
    #[must_use]
    pub fn get_new_id(&self, segment: SegmentId, local: DocId) -> Option<NewDocId> {
        let source = self
            .sources
            .binary_search_by_key(&segment, |s| s.segment_id)
            .ok()?;
        self.get_new_id_at(source, local)
    }

    /// Origin of doc `local` of output `output`.
    #[must_use]
    pub fn reverse(&self, output: usize, local: DocId) -> Option<OldDocId> {
        if local >= *self.output_doc_counts.get(output)? {
            return None;
        }
        let old = self.new_to_old[(self.output_bases[output] + local) as usize];
        let source = self.source_of_old(old);
        let src = &self.sources[source];
        Some(OldDocId {
            segment: src.segment_id,
            source,
            local: old - src.old_base,
        })
    }

    /// Surviving docs of source `source` as `(local, destination)`, in
    /// destination order.
    #[must_use]
    pub fn source_docs_by_destination(&self, source: usize) -> Vec<(DocId, DocId)> {
        let Some(src) = self.sources.get(source) else {
            return Vec::new();
        };
        let mut docs: Vec<(DocId, DocId)> = (0..src.doc_count)
            .filter_map(|local| {
                self.old_to_new[(src.old_base + local) as usize].map(|new| (local, new))
            })
            .collect();
        docs.sort_unstable_by_key(|(_, new)| *new);
        docs
    }

    /// Derives the map of the sub doc space.
    ///
    /// `joins[i]` holds, per main doc of source `i`, the end of its sub doc
    /// range. Sub docs follow their main doc: they are dropped with it and
    /// land in its output, in main doc order. Returns the sub map and the
    /// join column of each output.
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` for a join column of the wrong length or
    /// with decreasing ends.
    pub fn sub_map(&self, joins: &[Vec<u32>]) -> CoreResult<(ReclaimMap, Vec<Vec<u32>>)> {
        if joins.len() != self.sources.len() {
            return Err(CoreError::corrupt_format(format!(
                "{} join columns for {} sources",
                joins.len(),
                self.sources.len()
            )));
        }
        let mut sub_infos = Vec::with_capacity(joins.len());
        for (source, join) in self.sources.iter().zip(joins) {
            if join.len() != source.doc_count as usize || join.windows(2).any(|w| w[0] > w[1]) {
                return Err(CoreError::corrupt_format(format!(
                    "bad join column for {}",
                    source.segment_id
                )));
            }
            let mut info =
                SegmentMergeInfo::new(source.segment_id, 0, join.last().copied().unwrap_or(0));
            for local in 0..source.doc_count {
                if self.old_to_new[(source.old_base + local) as usize].is_none() {
                    info.deleted.extend(sub_range(join, local));
                }
            }
            sub_infos.push(info);
        }

        let mut order = Vec::new();
        let mut sub_sizes = Vec::with_capacity(self.output_count());
        let mut out_joins = Vec::with_capacity(self.output_count());
        for (output, count) in self.output_doc_counts.iter().enumerate() {
            let mut ends = Vec::with_capacity(*count as usize);
            let start = order.len();
            for local in 0..*count {
                let old = self
                    .reverse(output, local)
                    .ok_or_else(|| CoreError::invariant_violated("reclaim map lost a doc"))?;
                let range = sub_range(&joins[old.source], old.local);
                order.extend(range.map(|sub| (old.segment, sub)));
                ends.push((order.len() - start) as u32);
            }
            sub_sizes.push((order.len() - start) as u32);
            out_joins.push(ends);
        }
        let map = Self::by_weight(&sub_infos, &order, &OutputSplit::Sizes(sub_sizes))?;
        Ok((map, out_joins))
    }
}

fn sub_range(join: &[u32], local: DocId) -> std::ops::Range<DocId> {
    let end = join[local as usize];
    let begin = if local == 0 { 0 } else { join[local as usize - 1] };
    begin..end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(id: u32) -> SegmentId {
        SegmentId::new(id)
    }

    fn infos() -> Vec<SegmentMergeInfo> {
        vec![
            SegmentMergeInfo::new(seg(1), 0, 4).with_deleted([1]),
            SegmentMergeInfo::new(seg(2), 4, 3).with_deleted([0, 2]),
            SegmentMergeInfo::new(seg(4), 7, 2),
        ]
    }

    #[test]
    fn split_sizes() {
        assert_eq!(OutputSplit::Even(3).sizes(7).unwrap(), vec![3, 2, 2]);
        assert_eq!(OutputSplit::Even(2).sizes(0).unwrap(), vec![0, 0]);
        assert!(OutputSplit::Even(0).sizes(7).is_err());
        assert!(OutputSplit::Sizes(vec![3, 3]).sizes(7).is_err());
        assert_eq!(OutputSplit::Sizes(vec![0, 7]).sizes(7).unwrap(), vec![0, 7]);
    }

    #[test]
    fn natural_map() {
        let map = ReclaimMap::build(&infos(), &OutputSplit::Even(2)).unwrap();
        assert_eq!(map.new_doc_count(), 6);
        assert_eq!(map.deleted_doc_count(), 3);
        assert_eq!(map.output_doc_counts(), &[3, 3]);
        assert!(map.is_natural_order());

        assert_eq!(map.get_new_id(seg(1), 1), None);
        assert_eq!(map.get_new_id(seg(1), 3), Some(NewDocId { output: 0, local: 2 }));
        assert_eq!(map.get_new_id(seg(2), 1), Some(NewDocId { output: 1, local: 0 }));
        assert_eq!(map.get_new_id(seg(4), 1), Some(NewDocId { output: 1, local: 2 }));
        assert_eq!(map.get_new_id(seg(3), 0), None);
        assert_eq!(map.get_new_id(seg(4), 2), None);

        for output in 0..2 {
            for local in 0..3 {
                let old = map.reverse(output, local).unwrap();
                assert_eq!(
                    map.get_new_id(old.segment, old.local),
                    Some(NewDocId { output, local })
                );
            }
        }
        assert_eq!(map.reverse(2, 0), None);
    }

    #[test]
    fn empty_outputs_and_sources() {
        let infos = vec![
            SegmentMergeInfo::new(seg(0), 0, 0),
            SegmentMergeInfo::new(seg(1), 0, 2),
        ];
        let map = ReclaimMap::build(&infos, &OutputSplit::Sizes(vec![1, 0, 1])).unwrap();
        assert_eq!(map.get_new_id(seg(1), 1), Some(NewDocId { output: 2, local: 0 }));
        assert_eq!(map.reverse(2, 0).unwrap().segment, seg(1));
        assert_eq!(map.reverse(1, 0), None);
    }

    #[test]
    fn rejects_bad_sources() {
        let unordered = vec![
            SegmentMergeInfo::new(seg(2), 0, 1),
            SegmentMergeInfo::new(seg(1), 1, 1),
        ];
        assert!(matches!(
            ReclaimMap::build(&unordered, &OutputSplit::Even(1)),
            Err(CoreError::InvalidSegmentSet { .. })
        ));
        let bad_delete = vec![SegmentMergeInfo::new(seg(0), 0, 1).with_deleted([1])];
        assert!(ReclaimMap::build(&bad_delete, &OutputSplit::Even(1)).is_err());
    }

    #[test]
    fn weight_order() {
        let order = [(seg(4), 1), (seg(1), 0), (seg(2), 1), (seg(4), 0), (seg(1), 3), (seg(1), 2)];
        let map = ReclaimMap::by_weight(&infos(), &order, &OutputSplit::Even(1)).unwrap();
        assert!(!map.is_natural_order());
        assert_eq!(map.get_new_id(seg(4), 1), Some(NewDocId { output: 0, local: 0 }));
        assert_eq!(map.reverse(0, 4).unwrap().local, 3);
        assert_eq!(map.source_docs_by_destination(0), vec![(0, 1), (3, 4), (2, 5)]);

        assert!(ReclaimMap::by_weight(&infos(), &order[..5], &OutputSplit::Even(1)).is_err());
        let mut dup = order;
        dup[5] = (seg(1), 0);
        assert!(ReclaimMap::by_weight(&infos(), &dup, &OutputSplit::Even(1)).is_err());
        let mut deleted = order;
        deleted[5] = (seg(1), 1);
        assert!(ReclaimMap::by_weight(&infos(), &deleted, &OutputSplit::Even(1)).is_err());
    }

    #[test]
    fn sub_docs_follow_main_docs() {
        // seg 1: main docs own sub docs [0,2) [2,2) [2,3) [3,5); doc 1 deleted
        // seg 2: [0,1) [1,3) [3,3); docs 0 and 2 deleted
        // seg 4: [0,0) [0,1)
        let joins = vec![vec![2, 2, 3, 5], vec![1, 3, 3], vec![0, 1]];
        let map = ReclaimMap::build(&infos(), &OutputSplit::Even(2)).unwrap();
        let (sub, out_joins) = map.sub_map(&joins).unwrap();

        assert_eq!(out_joins, vec![vec![2, 3, 5], vec![2, 2, 3]]);
        assert_eq!(sub.output_doc_counts(), &[5, 3]);
        assert_eq!(sub.deleted_doc_count(), 1);
        assert!(sub.is_natural_order());
        assert_eq!(sub.get_new_id(seg(2), 0), None);
        assert_eq!(sub.get_new_id(seg(2), 2), Some(NewDocId { output: 1, local: 1 }));
        assert_eq!(sub.get_new_id(seg(4), 0), Some(NewDocId { output: 1, local: 2 }));

        assert!(map.sub_map(&joins[..2]).is_err());
        assert!(map.sub_map(&[vec![2, 1, 3, 5], vec![1, 3, 3], vec![0, 1]]).is_err());
    }
}
