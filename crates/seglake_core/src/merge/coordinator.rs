//! Runs every merger of a schema over one merge plan and commits the
//! result.

use super::merger::{MergeResource, Merger, SegmentMerger};
use super::reclaim::{OutputSplit, ReclaimMap, SegmentMergeInfo};
use super::strategy::{AttributeMergeStrategy, SummaryMergeStrategy};
use crate::attribute::{FixedLenAttributeReader, FixedLenAttributeWriter};
use crate::config::{MergeConfig, OffsetConfig};
use crate::dir::{parse_segment_dir_name, segment_path};
use crate::error::{CoreError, CoreResult};
use crate::schema::Schema;
use crate::segment::{PartitionView, SegmentData, SegmentInfo, SegmentKind, SUB_JOIN_DIR};
use crate::types::{DocId, IdAllocator, SegmentId};
use crate::version::{list_versions, Version, VersionCommitter};
use seglake_storage::path::join;
use seglake_storage::Directory;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Which segments to merge and where their docs go.
#[derive(Debug, Clone)]
pub struct MergePlan {
    sources: Vec<SegmentMergeInfo>,
    reclaim: ReclaimMap,
}

impl MergePlan {
    /// Plan keeping surviving docs in source order.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`ReclaimMap::build`].
    pub fn new(sources: Vec<SegmentMergeInfo>, split: &OutputSplit) -> CoreResult<Self> {
        let reclaim = ReclaimMap::build(&sources, split)?;
        Ok(Self { sources, reclaim })
    }

    /// Plan ordering outputs by weight.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`ReclaimMap::by_weight`].
    pub fn by_weight(
        sources: Vec<SegmentMergeInfo>,
        order: &[(SegmentId, DocId)],
        split: &OutputSplit,
    ) -> CoreResult<Self> {
        let reclaim = ReclaimMap::by_weight(&sources, order, split)?;
        Ok(Self { sources, reclaim })
    }

    /// Plan over built segments `segments` of `view`, dropping the local
    /// docs listed in `deletions`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSegmentSet` if a segment isn't a built segment of
    /// the view.
    pub fn from_view(
        view: &PartitionView,
        segments: &[SegmentId],
        deletions: &BTreeMap<SegmentId, BTreeSet<DocId>>,
        split: &OutputSplit,
    ) -> CoreResult<Self> {
        let mut ids = segments.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let sources = ids
            .into_iter()
            .map(|id| match view.segment(id) {
                Some(segment) if segment.kind == SegmentKind::Built => {
                    let info = SegmentMergeInfo::new(id, segment.base_doc_id, segment.doc_count);
                    Ok(match deletions.get(&id) {
                        Some(deleted) => info.with_deleted(deleted.iter().copied()),
                        None => info,
                    })
                }
                _ => Err(CoreError::invalid_segment_set(format!(
                    "{id} is not a built segment of {}",
                    view.version().version_id()
                ))),
            })
            .collect::<CoreResult<Vec<_>>>()?;
        Self::new(sources, split)
    }

    /// Source segments.
    #[must_use]
    pub fn sources(&self) -> &[SegmentMergeInfo] {
        &self.sources
    }

    /// Source segment ids.
    #[must_use]
    pub fn source_segments(&self) -> Vec<SegmentId> {
        self.sources.iter().map(|s| s.segment_id).collect()
    }

    /// The reclaim map.
    #[must_use]
    pub fn reclaim(&self) -> &ReclaimMap {
        &self.reclaim
    }
}

/// Result of running a merge plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Output segments in output order.
    pub outputs: Vec<SegmentData>,
    /// Documents written to the outputs.
    pub merged_docs: u32,
    /// Documents dropped.
    pub dropped_docs: u32,
}

impl MergeOutcome {
    /// Output segment ids.
    #[must_use]
    pub fn output_ids(&self) -> Vec<SegmentId> {
        self.outputs.iter().map(|o| o.id).collect()
    }
}

/// Merges a plan with the mergers of a schema.
pub struct MergeCoordinator<'a> {
    dir: &'a dyn Directory,
    schema: &'a Schema,
    offset_config: OffsetConfig,
    merge_config: MergeConfig,
}

impl std::fmt::Debug for MergeCoordinator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeCoordinator")
            .field("schema", &self.schema.name)
            .field("offset_config", &self.offset_config)
            .field("merge_config", &self.merge_config)
            .finish_non_exhaustive()
    }
}

impl<'a> MergeCoordinator<'a> {
    /// Creates a coordinator with default options.
    #[must_use]
    pub fn new(dir: &'a dyn Directory, schema: &'a Schema) -> Self {
        Self {
            dir,
            schema,
            offset_config: OffsetConfig::default(),
            merge_config: MergeConfig::default(),
        }
    }

    /// Sets the offset options of merged attributes.
    #[must_use]
    pub fn with_offset_config(mut self, config: OffsetConfig) -> Self {
        self.offset_config = config;
        self
    }

    /// Sets the merge options.
    #[must_use]
    pub fn with_merge_config(mut self, config: MergeConfig) -> Self {
        self.merge_config = config;
        self
    }

    fn mergers(&self, sub: bool) -> Vec<Box<dyn Merger>> {
        let schema = if sub {
            match self.schema.sub_schema.as_deref() {
                Some(s) => s,
                None => return Vec::new(),
            }
        } else {
            self.schema
        };
        let max = self.merge_config.max_parallel_instances;
        let mut mergers: Vec<Box<dyn Merger>> = schema
            .attributes
            .iter()
            .map(|a| {
                let strategy =
                    AttributeMergeStrategy::new(a.clone(), &self.offset_config, &self.merge_config);
                let strategy = if sub { strategy.for_sub_partition() } else { strategy };
                Box::new(SegmentMerger::new(strategy, max)) as Box<dyn Merger>
            })
            .collect();
        if !sub && schema.summary {
            mergers.push(Box::new(SegmentMerger::new(
                SummaryMergeStrategy::new(&self.offset_config, &self.merge_config),
                max,
            )));
        }
        mergers
    }

    fn check_sources(&self, version: &Version, plan: &MergePlan) -> CoreResult<Vec<SegmentInfo>> {
        plan.sources
            .iter()
            .map(|source| {
                if !version.contains(source.segment_id) {
                    return Err(CoreError::invalid_segment_set(format!(
                        "merge source {} is not in {}",
                        source.segment_id,
                        version.version_id()
                    )));
                }
                let info = SegmentInfo::load(self.dir, &segment_path(source.segment_id))?;
                if info.doc_count != source.doc_count {
                    return Err(CoreError::invalid_segment_set(format!(
                        "{} has {} docs, plan says {}",
                        source.segment_id, info.doc_count, source.doc_count
                    )));
                }
                Ok(info)
            })
            .collect()
    }

    fn allocate_outputs(
        &self,
        version: &Version,
        count: usize,
        allocator: &mut IdAllocator,
    ) -> CoreResult<Vec<SegmentId>> {
        for id in version.segments() {
            allocator.observe_segment(*id);
        }
        for name in self.dir.list("")? {
            if let Some(id) = parse_segment_dir_name(&name) {
                allocator.observe_segment(id);
            }
        }
        Ok((0..count).map(|_| allocator.allocate_segment()).collect())
    }

    fn load_join(&self, segment: SegmentId, doc_count: u32) -> CoreResult<Vec<u32>> {
        let reader = FixedLenAttributeReader::open(
            self.dir,
            &join(&segment_path(segment), SUB_JOIN_DIR),
            doc_count,
            false,
        )?;
        if reader.width() != 4 {
            return Err(CoreError::corrupt_format(format!(
                "join column of {segment} is {} bytes wide",
                reader.width()
            )));
        }
        (0..doc_count)
            .map(|doc| {
                let bytes = reader.read(doc)?;
                let mut end = [0u8; 4];
                end.copy_from_slice(&bytes);
                Ok(u32::from_le_bytes(end))
            })
            .collect()
    }

    fn load_joins(&self, plan: &MergePlan) -> CoreResult<Vec<Vec<u32>>> {
        plan.sources
            .iter()
            .map(|s| self.load_join(s.segment_id, s.doc_count))
            .collect()
    }

    fn merge_space(
        &self,
        resource: &MergeResource<'_>,
        outputs: &[SegmentId],
        mut mergers: Vec<Box<dyn Merger>>,
        instance_count: Option<u32>,
    ) -> CoreResult<()> {
        for merger in &mut mergers {
            merger.begin_merge(resource)?;
            match instance_count {
                Some(count) => Self::run_parallel_merger(&**merger, resource, outputs, count)?,
                None if resource.reclaim.is_natural_order() => merger.merge(resource, outputs)?,
                None => merger.sort_by_weight_merge(resource, outputs)?,
            }
        }
        Ok(())
    }

    fn run_parallel_merger(
        merger: &dyn Merger,
        resource: &MergeResource<'_>,
        outputs: &[SegmentId],
        instance_count: u32,
    ) -> CoreResult<()> {
        let items = merger.create_parallel_merge_items(resource, instance_count);
        let results: Vec<CoreResult<()>> = std::thread::scope(|scope| {
            let handles: Vec<_> = items
                .iter()
                .map(|item| scope.spawn(move || merger.merge_parallel_item(resource, outputs, item)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(CoreError::invariant_violated("parallel merge worker panicked"))
                    })
                })
                .collect()
        });
        results.into_iter().collect::<CoreResult<()>>()?;
        debug!(merger = merger.name(), instances = items.len(), "reconciling parallel merge");
        merger.end_parallel_merge(resource, outputs, items.len() as u32)
    }

    /// Upper bound of the memory the merge of `plan` needs, sub doc space
    /// included.
    ///
    /// # Errors
    ///
    /// Returns storage errors, and `CorruptFormat` for an unreadable join
    /// column when the schema has a sub schema.
    pub fn estimate_memory_use(&self, version: &Version, plan: &MergePlan) -> CoreResult<u64> {
        let resource = MergeResource {
            dir: self.dir,
            version,
            reclaim: &plan.reclaim,
        };
        let mut total = self
            .mergers(false)
            .iter()
            .map(|m| m.estimate_memory_use(&resource))
            .sum::<CoreResult<u64>>()?;
        if self.schema.has_sub_schema() {
            let (sub_reclaim, _) = plan.reclaim.sub_map(&self.load_joins(plan)?)?;
            let sub_resource = MergeResource {
                dir: self.dir,
                version,
                reclaim: &sub_reclaim,
            };
            total += self
                .mergers(true)
                .iter()
                .map(|m| m.estimate_memory_use(&sub_resource))
                .sum::<CoreResult<u64>>()?;
            // output join columns
            total += u64::from(plan.reclaim.new_doc_count()) * 4;
        }
        Ok(total)
    }

    /// Merges `plan` into freshly allocated output segments.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSegmentSet` for sources not in `version` and the
    /// errors of the mergers.
    pub fn run(
        &self,
        version: &Version,
        plan: &MergePlan,
        allocator: &mut IdAllocator,
    ) -> CoreResult<MergeOutcome> {
        self.execute(version, plan, allocator, None)
    }

    /// Like [`Self::run`], splitting every output across up to
    /// `instance_count` threads.
    ///
    /// # Errors
    ///
    /// Same as [`Self::run`].
    pub fn run_parallel(
        &self,
        version: &Version,
        plan: &MergePlan,
        allocator: &mut IdAllocator,
        instance_count: u32,
    ) -> CoreResult<MergeOutcome> {
        self.execute(version, plan, allocator, Some(instance_count))
    }

    fn execute(
        &self,
        version: &Version,
        plan: &MergePlan,
        allocator: &mut IdAllocator,
        instance_count: Option<u32>,
    ) -> CoreResult<MergeOutcome> {
        let infos = self.check_sources(version, plan)?;
        let outputs = self.allocate_outputs(version, plan.reclaim.output_count(), allocator)?;
        info!(
            target: "seglake::merge",
            version = %version.version_id(),
            sources = plan.sources.len(),
            outputs = outputs.len(),
            parallel = instance_count.unwrap_or(1),
            "merge started"
        );

        let resource = MergeResource {
            dir: self.dir,
            version,
            reclaim: &plan.reclaim,
        };
        self.merge_space(&resource, &outputs, self.mergers(false), instance_count)?;

        let mut sub_counts = vec![0u32; outputs.len()];
        if self.schema.has_sub_schema() {
            let joins = self.load_joins(plan)?;
            for ((source, info), join) in plan.sources.iter().zip(&infos).zip(&joins) {
                let sub_docs = join.last().copied().unwrap_or(0);
                if sub_docs != info.sub_doc_count {
                    return Err(CoreError::corrupt_format(format!(
                        "{} joins {sub_docs} sub docs, segment info says {}",
                        source.segment_id, info.sub_doc_count
                    )));
                }
            }
            let (sub_reclaim, out_joins) = plan.reclaim.sub_map(&joins)?;
            let sub_resource = MergeResource {
                dir: self.dir,
                version,
                reclaim: &sub_reclaim,
            };
            self.merge_space(&sub_resource, &outputs, self.mergers(true), instance_count)?;
            for ((output, ends), count) in outputs.iter().zip(&out_joins).zip(&mut sub_counts) {
                let mut writer = FixedLenAttributeWriter::new(4, false);
                for end in ends {
                    writer.add_value(&end.to_le_bytes())?;
                }
                writer.dump(self.dir, &join(&segment_path(*output), SUB_JOIN_DIR))?;
                *count = ends.last().copied().unwrap_or(0);
            }
        }

        let mut outcome = MergeOutcome {
            outputs: Vec::with_capacity(outputs.len()),
            merged_docs: plan.reclaim.new_doc_count(),
            dropped_docs: plan.reclaim.deleted_doc_count(),
        };
        for ((output, doc_count), sub_count) in outputs
            .iter()
            .zip(plan.reclaim.output_doc_counts())
            .zip(&sub_counts)
        {
            let info = SegmentInfo::new(*doc_count, *sub_count);
            info.store(self.dir, &segment_path(*output))?;
            outcome.outputs.push(SegmentData::built(*output, &info));
        }
        info!(
            target: "seglake::merge",
            version = %version.version_id(),
            outputs = ?outcome.output_ids(),
            merged_docs = outcome.merged_docs,
            dropped_docs = outcome.dropped_docs,
            "merge completed"
        );
        Ok(outcome)
    }

    /// Commits the version that replaces the sources of `plan` with the
    /// outputs of `outcome`.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolated` if the new version id is not fresh, and
    /// storage errors.
    pub fn commit(
        &self,
        version: &Version,
        plan: &MergePlan,
        outcome: &MergeOutcome,
        allocator: &mut IdAllocator,
    ) -> CoreResult<Version> {
        allocator.observe_version(version.version_id());
        for id in list_versions(self.dir)? {
            allocator.observe_version(id);
        }
        let next = version.successor(
            allocator.allocate_version(),
            &plan.source_segments(),
            &outcome.output_ids(),
        );
        VersionCommitter::new(self.dir).commit(&next, allocator)?;
        info!(
            target: "seglake::merge",
            from = %version.version_id(),
            to = %next.version_id(),
            segments = next.segment_count(),
            "merge committed"
        );
        Ok(next)
    }
}
