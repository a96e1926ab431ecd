//! Cross-crate integration test helpers.
//!
//! Provides a harness that builds, merges and cleans a catalog partition
//! while tracking the titles every segment should hold.

use crate::fixtures::scenarios::{catalog_doc, catalog_schema};
use crate::fixtures::PartitionFixture;
use seglake_core::{
    CleanReport, DocId, MergeCoordinator, MergePlan, OutputSplit, SegmentId, Version,
    VersionCommitter, VersionId,
};
use seglake_storage::Directory;
use std::collections::{BTreeMap, BTreeSet};

/// A test harness for integration testing.
pub struct PartitionHarness {
    /// The partition under test.
    pub partition: PartitionFixture,
    /// Titles each built segment is expected to hold, in doc id order.
    expected: BTreeMap<SegmentId, Vec<String>>,
}

impl PartitionHarness {
    /// Creates a harness over an in-memory catalog partition.
    pub fn new() -> Self {
        Self::with_partition(PartitionFixture::memory(catalog_schema()))
    }

    /// Creates a harness over a catalog partition rooted at `dir`.
    pub fn over(dir: Box<dyn Directory>) -> Self {
        Self::with_partition(PartitionFixture::over(dir, catalog_schema()))
    }

    /// Creates a harness over an existing partition.
    pub fn with_partition(partition: PartitionFixture) -> Self {
        Self {
            partition,
            expected: BTreeMap::new(),
        }
    }

    /// Builds a segment holding `titles` and tracks it.
    pub fn add_segment(&mut self, titles: &[&str]) -> SegmentId {
        let docs: Vec<_> = titles
            .iter()
            .enumerate()
            .map(|(i, title)| catalog_doc(title, i as u32))
            .collect();
        let segment = self.partition.build_segment(&docs);
        self.expected
            .insert(segment.id, titles.iter().map(|t| t.to_string()).collect());
        segment.id
    }

    /// Commits a version over `segments`.
    pub fn commit(&mut self, segments: &[SegmentId]) -> Version {
        self.partition.commit(segments)
    }

    /// Merges `segments` of the newest version, drops `deletions` and
    /// commits the result.
    pub fn merge(
        &mut self,
        segments: &[SegmentId],
        deletions: &BTreeMap<SegmentId, BTreeSet<DocId>>,
        split: &OutputSplit,
        parallel: Option<u32>,
    ) -> Version {
        let version = self.partition.latest();
        let view = self.partition.view(&version);
        let plan = MergePlan::from_view(&view, segments, deletions, split)
            .expect("Failed to plan merge");
        let schema = self.partition.schema().clone();
        let coordinator = MergeCoordinator::new(self.partition.dir.as_ref(), &schema)
            .with_offset_config(self.partition.offset_config().clone());
        let ids = &mut self.partition.ids;
        let outcome = match parallel {
            Some(n) => coordinator.run_parallel(&version, &plan, ids, n),
            None => coordinator.run(&version, &plan, ids),
        }
        .expect("Failed to merge");
        let next = coordinator
            .commit(&version, &plan, &outcome, ids)
            .expect("Failed to commit merge");

        let mut survivors = Vec::new();
        for source in plan.sources() {
            let titles = self
                .expected
                .remove(&source.segment_id)
                .expect("Merged an untracked segment");
            survivors.extend(
                titles
                    .into_iter()
                    .zip(0..)
                    .filter(|(_, doc)| !source.deleted.contains(doc))
                    .map(|(title, _)| title),
            );
        }
        let mut survivors = survivors.into_iter();
        for output in &outcome.outputs {
            let titles = survivors.by_ref().take(output.doc_count as usize).collect();
            self.expected.insert(output.id, titles);
        }
        assert_eq!(survivors.next(), None, "Merge lost documents");
        next
    }

    /// Runs a clean pass.
    pub fn clean(&self, keep_version_count: usize, reserved: &[VersionId]) -> CleanReport {
        VersionCommitter::new(self.partition.dir())
            .clean(keep_version_count, reserved)
            .expect("Failed to clean")
    }

    /// Verifies every segment of the newest version holds its tracked
    /// titles.
    pub fn verify_latest(&self) {
        let version = self.partition.latest();
        for &segment in version.segments() {
            let expected = self
                .expected
                .get(&segment)
                .unwrap_or_else(|| panic!("Untracked segment {segment}"));
            assert_eq!(
                &self.partition.read_text(segment, "title"),
                expected,
                "Title mismatch in {segment}"
            );
        }
        let total: usize = version
            .segments()
            .iter()
            .map(|s| self.expected[s].len())
            .sum();
        assert_eq!(
            self.partition.view(&version).total_doc_count() as usize,
            total
        );
    }

    /// Returns the count of tracked segments.
    pub fn tracked_count(&self) -> usize {
        self.expected.len()
    }
}

impl Default for PartitionHarness {
    fn default() -> Self {
        Self::new()
    }
}
