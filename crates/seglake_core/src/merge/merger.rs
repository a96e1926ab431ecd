//! Shared merge lifecycle.

use super::heap::SortMergeItemHeap;
use super::reclaim::ReclaimMap;
use super::strategy::MergeStrategy;
use crate::attribute::{list_patch_files, AttributePatch, AttributeReader, AttributeWriter};
use crate::dir::{
    parallel_dir_name, segment_path, DATA_FILE, MERGE_DONE_FILE, OFFSET_FILE, PARTIAL_META_FILE,
};
use crate::error::{CoreError, CoreResult};
use crate::types::{DocId, SegmentId};
use crate::version::Version;
use seglake_storage::path::join;
use seglake_storage::Directory;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use tracing::{debug, warn};

/// Inputs shared by every merger of one merge.
#[derive(Clone, Copy)]
pub struct MergeResource<'a> {
    /// Partition root.
    pub dir: &'a dyn Directory,
    /// Version the sources are taken from.
    pub version: &'a Version,
    /// Doc id remapping of the merge.
    pub reclaim: &'a ReclaimMap,
}

impl std::fmt::Debug for MergeResource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeResource")
            .field("version", &self.version.version_id())
            .field("sources", &self.reclaim.source_count())
            .field("outputs", &self.reclaim.output_count())
            .finish_non_exhaustive()
    }
}

/// One unit of a parallel merge: for every output, the range of output
/// doc ids this instance writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelMergeItem {
    /// Instance index.
    pub id: u32,
    /// Number of instances.
    pub total: u32,
    /// Output doc id range per output.
    pub ranges: Vec<Range<DocId>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct PartialMeta {
    instance: u32,
    total: u32,
    output: usize,
    begin: DocId,
    end: DocId,
}

/// Lifecycle every mergeable data kind goes through.
pub trait Merger: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Prepares the merge: validates the sources and loads update patches.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSegmentSet` for sources outside the version, and
    /// storage errors.
    fn begin_merge(&mut self, resource: &MergeResource<'_>) -> CoreResult<()>;

    /// Single forward pass over each source, appending survivors to their
    /// outputs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a reclaim map not in natural order.
    fn merge(&self, resource: &MergeResource<'_>, outputs: &[SegmentId]) -> CoreResult<()>;

    /// Merge driven by the destination order of the reclaim map.
    ///
    /// # Errors
    ///
    /// Returns read and write errors.
    fn sort_by_weight_merge(
        &self,
        resource: &MergeResource<'_>,
        outputs: &[SegmentId],
    ) -> CoreResult<()>;

    /// Upper bound of the bytes the merge holds in memory.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    fn estimate_memory_use(&self, resource: &MergeResource<'_>) -> CoreResult<u64>;

    /// Whether outputs may be split across instances.
    fn enable_multi_output_segment_parallel(&self) -> bool;

    /// Splits the merge into independent items.
    fn create_parallel_merge_items(
        &self,
        resource: &MergeResource<'_>,
        instance_count: u32,
    ) -> Vec<ParallelMergeItem>;

    /// Writes the partial outputs of one item.
    ///
    /// # Errors
    ///
    /// Returns read and write errors.
    fn merge_parallel_item(
        &self,
        resource: &MergeResource<'_>,
        outputs: &[SegmentId],
        item: &ParallelMergeItem,
    ) -> CoreResult<()>;

    /// Reconciles the partial outputs into final outputs. Safe to repeat.
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` for missing or inconsistent partials.
    fn end_parallel_merge(
        &self,
        resource: &MergeResource<'_>,
        outputs: &[SegmentId],
        total_parallel_count: u32,
    ) -> CoreResult<()>;
}

#[derive(Debug, Default)]
struct MergeState {
    overlays: BTreeMap<SegmentId, AttributePatch>,
    carried: BTreeMap<SegmentId, AttributePatch>,
}

struct PatchedSource<'p> {
    reader: AttributeReader,
    patch: Option<&'p AttributePatch>,
}

impl PatchedSource<'_> {
    fn read(&self, local: DocId) -> CoreResult<Vec<u8>> {
        match self.patch.and_then(|p| p.get(local)) {
            Some(value) => Ok(value.to_vec()),
            None => self.reader.read(local),
        }
    }
}

/// [`Merger`] over a [`MergeStrategy`].
#[derive(Debug)]
pub struct SegmentMerger<S> {
    strategy: S,
    max_parallel_instances: u32,
    state: Option<MergeState>,
}

impl<S: MergeStrategy> SegmentMerger<S> {
    /// Creates a merger allowing up to `max_parallel_instances` items.
    #[must_use]
    pub fn new(strategy: S, max_parallel_instances: u32) -> Self {
        Self {
            strategy,
            max_parallel_instances: max_parallel_instances.max(1),
            state: None,
        }
    }

    /// The strategy.
    #[must_use]
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    fn state(&self) -> CoreResult<&MergeState> {
        self.state.as_ref().ok_or_else(|| {
            CoreError::invariant_violated(format!(
                "{} merger used before begin_merge",
                self.strategy.name()
            ))
        })
    }

    fn output_path(&self, output: SegmentId) -> String {
        self.strategy.data_path(&segment_path(output))
    }

    fn check_outputs(resource: &MergeResource<'_>, outputs: &[SegmentId]) -> CoreResult<()> {
        if outputs.len() != resource.reclaim.output_count() {
            return Err(CoreError::invalid_argument(format!(
                "{} outputs given, reclaim map has {}",
                outputs.len(),
                resource.reclaim.output_count()
            )));
        }
        Ok(())
    }

    fn open_source_at<'p>(
        &self,
        resource: &MergeResource<'_>,
        state: &'p MergeState,
        source: usize,
        segment: SegmentId,
    ) -> CoreResult<PatchedSource<'p>> {
        let reader = self.strategy.open_source(
            resource.dir,
            &self.output_path(segment),
            resource.reclaim.source_doc_count(source),
        )?;
        Ok(PatchedSource {
            reader,
            patch: state.overlays.get(&segment),
        })
    }

    fn source_ids(resource: &MergeResource<'_>) -> Vec<SegmentId> {
        resource.reclaim.source_segments().collect()
    }

    fn append(writer: &mut AttributeWriter, local: DocId, value: &[u8]) -> CoreResult<()> {
        if writer.doc_count() != local {
            return Err(CoreError::invariant_violated(format!(
                "output doc {local} written out of order, {} written so far",
                writer.doc_count()
            )));
        }
        writer.add_value(value)?;
        Ok(())
    }

    fn finish_outputs(
        &self,
        resource: &MergeResource<'_>,
        state: &MergeState,
        outputs: &[SegmentId],
        writers: Vec<AttributeWriter>,
    ) -> CoreResult<()> {
        for (index, (output, writer)) in outputs.iter().zip(writers).enumerate() {
            writer.dump(resource.dir, &self.output_path(*output))?;
            self.merge_patches_into(resource, state, outputs, index)?;
            debug!(
                merger = self.strategy.name(),
                output = %output,
                doc_count = writer.doc_count(),
                "wrote merge output"
            );
        }
        Ok(())
    }

    /// Moves the patches of merged sources against segments outside the
    /// merge into output `target_index`, if it is the last output. Returns
    /// the number of patch files written.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolated` before [`Merger::begin_merge`], and
    /// storage errors.
    pub fn do_merge_patches(
        &self,
        resource: &MergeResource<'_>,
        outputs: &[SegmentId],
        target_index: usize,
    ) -> CoreResult<usize> {
        self.merge_patches_into(resource, self.state()?, outputs, target_index)
    }

    fn merge_patches_into(
        &self,
        resource: &MergeResource<'_>,
        state: &MergeState,
        outputs: &[SegmentId],
        target_index: usize,
    ) -> CoreResult<usize> {
        if target_index + 1 != outputs.len() || state.carried.is_empty() {
            return Ok(0);
        }
        let output = outputs[target_index];
        let path = self.output_path(output);
        for (target, patch) in &state.carried {
            patch.store(resource.dir, &path, output, *target)?;
        }
        debug!(
            merger = self.strategy.name(),
            output = %output,
            patches = state.carried.len(),
            "moved patches into last merge output"
        );
        Ok(state.carried.len())
    }
}

impl<S: MergeStrategy> Merger for SegmentMerger<S> {
    fn name(&self) -> &str {
        self.strategy.name()
    }

    fn begin_merge(&mut self, resource: &MergeResource<'_>) -> CoreResult<()> {
        let sources: BTreeSet<SegmentId> = resource.reclaim.source_segments().collect();
        if let Some(missing) = sources.iter().find(|id| !resource.version.contains(**id)) {
            return Err(CoreError::invalid_segment_set(format!(
                "merge source {missing} is not in {}",
                resource.version.version_id()
            )));
        }

        let mut state = MergeState::default();
        if self.strategy.supports_patches() {
            // ascending segment order, so newer patch sources fold in last
            for segment in resource.version.segments() {
                let files = list_patch_files(resource.dir, &self.output_path(*segment))?;
                for file in files {
                    let into = if sources.contains(&file.target) {
                        &mut state.overlays
                    } else if sources.contains(&file.source)
                        && resource.version.contains(file.target)
                    {
                        &mut state.carried
                    } else {
                        continue;
                    };
                    let patch = AttributePatch::load(resource.dir, &file.path)?;
                    into.entry(file.target).or_default().merge_newer(&patch);
                }
            }
        }
        debug!(
            merger = self.strategy.name(),
            sources = sources.len(),
            patched_sources = state.overlays.len(),
            carried_patches = state.carried.len(),
            "began merge"
        );
        self.state = Some(state);
        Ok(())
    }

    fn merge(&self, resource: &MergeResource<'_>, outputs: &[SegmentId]) -> CoreResult<()> {
        let state = self.state()?;
        Self::check_outputs(resource, outputs)?;
        let reclaim = resource.reclaim;
        if !reclaim.is_natural_order() {
            return Err(CoreError::invalid_argument(
                "reclaim map reorders docs; use sort_by_weight_merge",
            ));
        }
        let mut writers: Vec<AttributeWriter> =
            outputs.iter().map(|_| self.strategy.new_writer()).collect();
        for (source, segment) in Self::source_ids(resource).into_iter().enumerate() {
            let reader = self.open_source_at(resource, state, source, segment)?;
            for local in 0..reclaim.source_doc_count(source) {
                let Some(dest) = reclaim.get_new_id_at(source, local) else {
                    continue;
                };
                let value = reader.read(local)?;
                Self::append(&mut writers[dest.output], dest.local, &value)?;
            }
        }
        self.finish_outputs(resource, state, outputs, writers)
    }

    fn sort_by_weight_merge(
        &self,
        resource: &MergeResource<'_>,
        outputs: &[SegmentId],
    ) -> CoreResult<()> {
        let state = self.state()?;
        Self::check_outputs(resource, outputs)?;
        let reclaim = resource.reclaim;
        let readers = Self::source_ids(resource)
            .into_iter()
            .enumerate()
            .map(|(source, segment)| self.open_source_at(resource, state, source, segment))
            .collect::<CoreResult<Vec<_>>>()?;
        let heap = SortMergeItemHeap::new(
            (0..reclaim.source_count())
                .map(|source| reclaim.source_docs_by_destination(source))
                .collect(),
        );
        let mut writers: Vec<AttributeWriter> =
            outputs.iter().map(|_| self.strategy.new_writer()).collect();
        for item in heap {
            let dest = reclaim
                .get_new_id_at(item.source, item.local)
                .ok_or_else(|| CoreError::invariant_violated("heap yielded a dropped doc"))?;
            let value = readers[item.source].read(item.local)?;
            Self::append(&mut writers[dest.output], dest.local, &value)?;
        }
        self.finish_outputs(resource, state, outputs, writers)
    }

    fn estimate_memory_use(&self, resource: &MergeResource<'_>) -> CoreResult<u64> {
        let dir = resource.dir;
        let sources: BTreeSet<SegmentId> = resource.reclaim.source_segments().collect();
        let mut data_bytes = 0u64;
        for segment in &sources {
            let path = self.output_path(*segment);
            data_bytes += dir.file_len(&join(&path, DATA_FILE))?;
            let offset = join(&path, OFFSET_FILE);
            if dir.exists(&offset)? {
                data_bytes += dir.file_len(&offset)?;
            }
        }
        let mut patch_bytes = 0u64;
        if self.strategy.supports_patches() {
            for segment in resource.version.segments() {
                for file in list_patch_files(dir, &self.output_path(*segment))? {
                    if sources.contains(&file.target) || sources.contains(&file.source) {
                        patch_bytes += dir.file_len(&file.path)?;
                    }
                }
            }
        }
        let offset_bytes = (u64::from(resource.reclaim.new_doc_count())
            + resource.reclaim.output_count() as u64)
            * 8;
        // sources and outputs may be resident together
        Ok(2 * data_bytes + patch_bytes + offset_bytes)
    }

    fn enable_multi_output_segment_parallel(&self) -> bool {
        self.strategy.enable_multi_output_segment_parallel()
    }

    fn create_parallel_merge_items(
        &self,
        resource: &MergeResource<'_>,
        instance_count: u32,
    ) -> Vec<ParallelMergeItem> {
        let total = if self.enable_multi_output_segment_parallel() {
            instance_count.clamp(1, self.max_parallel_instances)
        } else {
            1
        };
        let counts = resource.reclaim.output_doc_counts();
        (0..total)
            .map(|id| ParallelMergeItem {
                id,
                total,
                ranges: counts
                    .iter()
                    .map(|count| {
                        let at = |i: u32| (u64::from(*count) * u64::from(i) / u64::from(total)) as DocId;
                        at(id)..at(id + 1)
                    })
                    .collect(),
            })
            .collect()
    }

    fn merge_parallel_item(
        &self,
        resource: &MergeResource<'_>,
        outputs: &[SegmentId],
        item: &ParallelMergeItem,
    ) -> CoreResult<()> {
        let state = self.state()?;
        Self::check_outputs(resource, outputs)?;
        if item.ranges.len() != outputs.len() {
            return Err(CoreError::invalid_argument(format!(
                "parallel item covers {} outputs, merge has {}",
                item.ranges.len(),
                outputs.len()
            )));
        }
        let mut readers: BTreeMap<usize, PatchedSource<'_>> = BTreeMap::new();
        for (index, (output, range)) in outputs.iter().zip(&item.ranges).enumerate() {
            let mut writer = self.strategy.new_writer();
            for local in range.clone() {
                let old = resource.reclaim.reverse(index, local).ok_or_else(|| {
                    CoreError::invalid_argument(format!(
                        "output doc {local} of output {index} is out of range"
                    ))
                })?;
                let reader = match readers.entry(old.source) {
                    Entry::Occupied(e) => e.into_mut(),
                    Entry::Vacant(e) => {
                        e.insert(self.open_source_at(resource, state, old.source, old.segment)?)
                    }
                };
                writer.add_value(&reader.read(old.local)?)?;
            }
            let partial = join(
                &self.output_path(*output),
                &parallel_dir_name(item.id, item.total),
            );
            writer.dump(resource.dir, &partial)?;
            let meta = PartialMeta {
                instance: item.id,
                total: item.total,
                output: index,
                begin: range.start,
                end: range.end,
            };
            resource
                .dir
                .write(&join(&partial, PARTIAL_META_FILE), &serde_json::to_vec(&meta)?)?;
        }
        debug!(
            merger = self.strategy.name(),
            instance = item.id,
            total = item.total,
            "wrote parallel merge item"
        );
        Ok(())
    }

    fn end_parallel_merge(
        &self,
        resource: &MergeResource<'_>,
        outputs: &[SegmentId],
        total_parallel_count: u32,
    ) -> CoreResult<()> {
        let state = self.state()?;
        Self::check_outputs(resource, outputs)?;
        let dir = resource.dir;
        for (index, output) in outputs.iter().enumerate() {
            let path = self.output_path(*output);
            let done = join(&path, MERGE_DONE_FILE);
            if dir.exists(&done)? {
                debug!(merger = self.strategy.name(), output = %output, "merge output already reconciled");
            } else {
                let mut writer = self.strategy.new_writer();
                for instance in 0..total_parallel_count {
                    let partial = join(&path, &parallel_dir_name(instance, total_parallel_count));
                    let meta_path = join(&partial, PARTIAL_META_FILE);
                    let meta: PartialMeta = match dir.read(&meta_path) {
                        Ok(bytes) => serde_json::from_slice(&bytes)?,
                        Err(e) if e.is_not_found() => {
                            return Err(CoreError::corrupt_format(format!(
                                "parallel merge partial {partial} is missing"
                            )));
                        }
                        Err(e) => return Err(e.into()),
                    };
                    let expected_begin = writer.doc_count();
                    if meta.instance != instance
                        || meta.total != total_parallel_count
                        || meta.output != index
                        || meta.begin != expected_begin
                        || meta.end < meta.begin
                    {
                        return Err(CoreError::corrupt_format(format!(
                            "parallel merge partial {partial} does not continue at doc {expected_begin}"
                        )));
                    }
                    let reader = self.strategy.open_source(dir, &partial, meta.end - meta.begin)?;
                    for local in 0..reader.doc_count() {
                        writer.add_value(&reader.read(local)?)?;
                    }
                }
                let expected = resource.reclaim.output_doc_counts()[index];
                if writer.doc_count() != expected {
                    return Err(CoreError::corrupt_format(format!(
                        "parallel merge of {output} produced {} docs, expected {expected}",
                        writer.doc_count()
                    )));
                }
                writer.dump(dir, &path)?;
                self.merge_patches_into(resource, state, outputs, index)?;
                dir.write(&done, &[])?;
            }
            for instance in 0..total_parallel_count {
                let partial = join(&path, &parallel_dir_name(instance, total_parallel_count));
                match dir.remove_dir_all(&partial) {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => {
                        warn!(path = %partial, error = %e, "failed to remove parallel merge partial");
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MergeConfig, OffsetConfig};
    use crate::merge::{AttributeMergeStrategy, AttributeMerger, OutputSplit, SegmentMergeInfo};
    use crate::schema::{AttributeConfig, Schema};
    use crate::segment::{BuildingSegment, Document};
    use crate::types::{SchemaVersionId, VersionId};
    use seglake_storage::InMemoryDirectory;

    fn title() -> AttributeConfig {
        AttributeConfig::var_len("title").compress_offset(true)
    }

    fn schema() -> Schema {
        Schema::new("docs", SchemaVersionId::new(0)).with_attribute(title())
    }

    fn build(dir: &dyn Directory, id: u32, titles: &[&str]) -> BuildingSegment {
        let mut segment =
            BuildingSegment::new(SegmentId::new(id), &schema(), &OffsetConfig::default()).unwrap();
        for t in titles {
            segment
                .add_document(&Document::new().with_attribute("title", *t))
                .unwrap();
        }
        segment.dump(dir).unwrap();
        segment
    }

    fn merger() -> AttributeMerger {
        SegmentMerger::new(
            AttributeMergeStrategy::new(title(), &OffsetConfig::default(), &MergeConfig::default()),
            4,
        )
    }

    fn read_all(dir: &dyn Directory, segment: u32, doc_count: u32) -> Vec<String> {
        let reader = AttributeReader::open(
            dir,
            &format!("segment_{segment}/attribute/title"),
            &title(),
            doc_count,
            &OffsetConfig::default(),
        )
        .unwrap();
        (0..doc_count)
            .map(|d| String::from_utf8(reader.read(d).unwrap()).unwrap())
            .collect()
    }

    fn snapshot(dir: &InMemoryDirectory) -> Vec<(String, Vec<u8>)> {
        dir.file_paths()
            .into_iter()
            .map(|p| {
                let bytes = dir.read(&p).unwrap();
                (p, bytes)
            })
            .collect()
    }

    fn outputs(ids: &[u32]) -> Vec<SegmentId> {
        ids.iter().copied().map(SegmentId::new).collect()
    }

    fn two_sources(dir: &dyn Directory) -> (Version, Vec<SegmentMergeInfo>) {
        build(dir, 0, &["a0", "a1", "a2", "a3", "a4"]);
        build(dir, 1, &["b0", "b1", "b2"]);
        let version = Version::new(VersionId::new(1), SchemaVersionId::new(0), outputs(&[0, 1]));
        let infos = vec![
            SegmentMergeInfo::new(SegmentId::new(0), 0, 5),
            SegmentMergeInfo::new(SegmentId::new(1), 5, 3).with_deleted([1]),
        ];
        (version, infos)
    }

    #[test]
    fn natural_merge_conserves_docs() {
        let dir = InMemoryDirectory::new();
        let (version, infos) = two_sources(&dir);
        let reclaim = ReclaimMap::build(&infos, &OutputSplit::Even(2)).unwrap();
        let resource = MergeResource { dir: &dir, version: &version, reclaim: &reclaim };

        let mut merger = merger();
        let out = outputs(&[7, 8]);
        assert!(merger.merge(&resource, &out).unwrap_err().is_fatal());
        merger.begin_merge(&resource).unwrap();
        merger.merge(&resource, &out).unwrap();

        assert_eq!(read_all(&dir, 7, 4), vec!["a0", "a1", "a2", "a3"]);
        assert_eq!(read_all(&dir, 8, 3), vec!["a4", "b0", "b2"]);
        assert!(merger.merge(&resource, &out[..1]).is_err());
    }

    #[test]
    fn weight_order_needs_sort_merge() {
        let dir = InMemoryDirectory::new();
        let (version, infos) = two_sources(&dir);
        let order: Vec<(SegmentId, DocId)> = [(1, 2), (0, 4), (0, 0), (1, 0), (0, 3), (0, 1), (0, 2)]
            .into_iter()
            .map(|(s, d)| (SegmentId::new(s), d))
            .collect();
        let reclaim = ReclaimMap::by_weight(&infos, &order, &OutputSplit::Sizes(vec![3, 4])).unwrap();
        let resource = MergeResource { dir: &dir, version: &version, reclaim: &reclaim };
        let mut merger = merger();
        merger.begin_merge(&resource).unwrap();
        let out = outputs(&[7, 8]);

        assert!(matches!(
            merger.merge(&resource, &out),
            Err(CoreError::InvalidArgument { .. })
        ));
        merger.sort_by_weight_merge(&resource, &out).unwrap();
        assert_eq!(read_all(&dir, 7, 3), vec!["b2", "a4", "a0"]);
        assert_eq!(read_all(&dir, 8, 4), vec!["b0", "a3", "a1", "a2"]);
    }

    #[test]
    fn sources_must_belong_to_version() {
        let dir = InMemoryDirectory::new();
        let (_, infos) = two_sources(&dir);
        let version = Version::new(VersionId::new(1), SchemaVersionId::new(0), outputs(&[0]));
        let reclaim = ReclaimMap::build(&infos, &OutputSplit::Even(1)).unwrap();
        let resource = MergeResource { dir: &dir, version: &version, reclaim: &reclaim };
        assert!(matches!(
            merger().begin_merge(&resource),
            Err(CoreError::InvalidSegmentSet { .. })
        ));
    }

    #[test]
    fn patches_apply_to_sources_and_move_to_last_output() {
        let dir = InMemoryDirectory::new();
        build(&dir, 0, &["a0", "a1"]);
        build(&dir, 1, &["b0", "b1"]);
        let mut newest = BuildingSegment::new(SegmentId::new(2), &schema(), &OffsetConfig::default())
            .unwrap();
        newest
            .add_document(&Document::new().with_attribute("title", "c0"))
            .unwrap();
        newest
            .update_built(SegmentId::new(1), "title", 0, b"b0-new".to_vec())
            .unwrap();
        newest
            .update_built(SegmentId::new(0), "title", 1, b"a1-new".to_vec())
            .unwrap();
        newest.dump(&dir).unwrap();

        let version = Version::new(VersionId::new(3), SchemaVersionId::new(0), outputs(&[0, 1, 2]));
        let infos = vec![
            SegmentMergeInfo::new(SegmentId::new(1), 2, 2),
            SegmentMergeInfo::new(SegmentId::new(2), 4, 1),
        ];
        let reclaim = ReclaimMap::build(&infos, &OutputSplit::Even(2)).unwrap();
        let resource = MergeResource { dir: &dir, version: &version, reclaim: &reclaim };
        let mut merger = merger();
        merger.begin_merge(&resource).unwrap();
        let out = outputs(&[10, 11]);
        merger.merge(&resource, &out).unwrap();

        assert_eq!(read_all(&dir, 10, 2), vec!["b0-new", "b1"]);
        assert_eq!(read_all(&dir, 11, 1), vec!["c0"]);
        assert!(list_patch_files(&dir, "segment_10/attribute/title").unwrap().is_empty());
        let moved = list_patch_files(&dir, "segment_11/attribute/title").unwrap();
        assert_eq!(moved.len(), 1);
        assert_eq!((moved[0].source, moved[0].target), (SegmentId::new(11), SegmentId::new(0)));
        let patch = AttributePatch::load(&dir, &moved[0].path).unwrap();
        assert_eq!(patch.get(1), Some(&b"a1-new"[..]));

        assert_eq!(merger.do_merge_patches(&resource, &out, 0).unwrap(), 0);
        assert_eq!(merger.do_merge_patches(&resource, &out, 1).unwrap(), 1);
    }

    #[test]
    fn parallel_merge_reconciles_idempotently() {
        let dir = InMemoryDirectory::new();
        let (version, infos) = two_sources(&dir);
        let reclaim = ReclaimMap::build(&infos, &OutputSplit::Even(2)).unwrap();
        let resource = MergeResource { dir: &dir, version: &version, reclaim: &reclaim };
        let mut merger = merger();
        merger.begin_merge(&resource).unwrap();
        let out = outputs(&[7, 8]);

        let items = merger.create_parallel_merge_items(&resource, 3);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].ranges, vec![0..1, 0..1]);
        assert_eq!(items[2].ranges, vec![2..4, 2..3]);
        for item in &items {
            merger.merge_parallel_item(&resource, &out, item).unwrap();
        }
        assert!(dir.exists("segment_7/attribute/title/parallel_1_3/partial.meta").unwrap());

        merger.end_parallel_merge(&resource, &out, 3).unwrap();
        let first = snapshot(&dir);
        merger.end_parallel_merge(&resource, &out, 3).unwrap();
        assert_eq!(snapshot(&dir), first);

        assert!(!dir.exists("segment_7/attribute/title/parallel_1_3").unwrap());
        assert!(dir.exists("segment_8/attribute/title/merge.done").unwrap());
        assert_eq!(read_all(&dir, 7, 4), vec!["a0", "a1", "a2", "a3"]);
        assert_eq!(read_all(&dir, 8, 3), vec!["a4", "b0", "b2"]);
    }

    #[test]
    fn missing_partial_is_corrupt() {
        let dir = InMemoryDirectory::new();
        let (version, infos) = two_sources(&dir);
        let reclaim = ReclaimMap::build(&infos, &OutputSplit::Even(1)).unwrap();
        let resource = MergeResource { dir: &dir, version: &version, reclaim: &reclaim };
        let mut merger = merger();
        merger.begin_merge(&resource).unwrap();
        let out = outputs(&[9]);
        let items = merger.create_parallel_merge_items(&resource, 2);
        merger.merge_parallel_item(&resource, &out, &items[0]).unwrap();
        assert!(matches!(
            merger.end_parallel_merge(&resource, &out, 2),
            Err(CoreError::CorruptFormat { .. })
        ));
    }

    #[test]
    fn parallel_items_respect_config() {
        let dir = InMemoryDirectory::new();
        let (version, infos) = two_sources(&dir);
        let reclaim = ReclaimMap::build(&infos, &OutputSplit::Even(1)).unwrap();
        let resource = MergeResource { dir: &dir, version: &version, reclaim: &reclaim };

        let serial = SegmentMerger::new(
            AttributeMergeStrategy::new(
                title(),
                &OffsetConfig::default(),
                &MergeConfig::default().enable_multi_output_segment_parallel(false),
            ),
            4,
        );
        let items = serial.create_parallel_merge_items(&resource, 3);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].ranges, vec![0..7]);
        assert_eq!(merger().create_parallel_merge_items(&resource, 16).len(), 4);
    }

    #[test]
    fn memory_estimate_covers_source_data() {
        let dir = InMemoryDirectory::new();
        let (version, infos) = two_sources(&dir);
        let reclaim = ReclaimMap::build(&infos, &OutputSplit::Even(1)).unwrap();
        let resource = MergeResource { dir: &dir, version: &version, reclaim: &reclaim };
        let data = dir.file_len("segment_0/attribute/title/data").unwrap()
            + dir.file_len("segment_1/attribute/title/data").unwrap();
        assert!(merger().estimate_memory_use(&resource).unwrap() >= 2 * data);
    }
}
