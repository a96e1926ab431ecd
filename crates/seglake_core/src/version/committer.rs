//! Version commit and retention.
//!
//! [`VersionCommitter::clean`] shrinks a partition to the versions a
//! retention contract asks for and deletes every segment, patch index
//! segment and schema that no retained version can still reach.
//!
//! Deletion order is versions first, then data, so a reader that lists
//! versions never finds one whose segments are already gone.

use super::{list_versions, Version};
use crate::config::RetentionConfig;
use crate::dir::{
    parse_patch_index_dir_name, parse_schema_file_name, parse_segment_dir_name,
    version_file_name, INDEX_SUMMARY_FILE,
};
use crate::error::{CoreError, CoreResult};
use crate::types::{now_micros, IdAllocator, SchemaVersionId, SegmentId, VersionId};
use seglake_storage::path::join;
use seglake_storage::Directory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// A delete that failed with something other than not-found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanFailure {
    /// Path that could not be removed.
    pub path: String,
    /// Error text.
    pub error: String,
}

/// What a clean pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    /// Versions still on disk afterwards.
    pub kept_versions: Vec<VersionId>,
    /// Version files removed.
    pub removed_versions: Vec<VersionId>,
    /// Segment directories removed.
    pub removed_segments: Vec<SegmentId>,
    /// Patch index segment directories removed.
    pub removed_patch_segments: Vec<(SchemaVersionId, SegmentId)>,
    /// Empty patch index directories removed.
    pub removed_patch_dirs: Vec<SchemaVersionId>,
    /// Schema files removed.
    pub removed_schemas: Vec<SchemaVersionId>,
    /// Deletes that found the path already gone.
    pub tolerated_missing: u32,
    /// Deletes that failed for another reason.
    pub failures: Vec<CleanFailure>,
}

impl CleanReport {
    /// True if every attempted delete succeeded or was already done.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Contents of `index_summary`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    /// Version ids on disk.
    pub versions: Vec<VersionId>,
    /// Segment ids on disk.
    pub segments: Vec<SegmentId>,
    /// Schema ids on disk.
    pub schemas: Vec<SchemaVersionId>,
    /// When the summary was written.
    pub timestamp: i64,
}

impl IndexSummary {
    /// Loads the summary from the partition root.
    ///
    /// # Errors
    ///
    /// Returns storage or parse errors.
    pub fn load(dir: &dyn Directory) -> CoreResult<Self> {
        Ok(serde_json::from_slice(&dir.read(INDEX_SUMMARY_FILE)?)?)
    }
}

/// Commits versions and garbage-collects old ones.
pub struct VersionCommitter<'a> {
    dir: &'a dyn Directory,
}

impl<'a> VersionCommitter<'a> {
    /// Creates a committer over a partition root.
    #[must_use]
    pub fn new(dir: &'a dyn Directory) -> Self {
        Self { dir }
    }

    /// Writes `version` as the newest committed version.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolated` if the id is not newer than every id the
    /// allocator or the disk has seen.
    pub fn commit(&self, version: &Version, allocator: &mut IdAllocator) -> CoreResult<()> {
        for id in list_versions(self.dir)? {
            allocator.observe_version(id);
        }
        allocator.ensure_version_fresh(version.version_id())?;
        if self.dir.exists(&version_file_name(version.version_id()))? {
            return Err(CoreError::invariant_violated(format!(
                "version {} is already committed",
                version.version_id()
            )));
        }
        version.store(self.dir)?;
        allocator.observe_version(version.version_id());
        for &segment in version.segments() {
            allocator.observe_segment(segment);
        }
        info!(
            target: "seglake::commit",
            version = %version.version_id(),
            segments = version.segment_count(),
            "version committed"
        );
        Ok(())
    }

    /// Runs [`Self::clean`] with a [`RetentionConfig`].
    ///
    /// # Errors
    ///
    /// See [`Self::clean`].
    pub fn clean_with(&self, config: &RetentionConfig) -> CoreResult<CleanReport> {
        self.clean(config.keep_version_count, &config.reserved_versions)
    }

    /// Keeps the `keep_version_count` newest versions plus `reserved` and
    /// deletes everything only older versions reference.
    ///
    /// Segments are deleted only below the largest segment id a retained
    /// version references, so a newer segment that no version lists yet
    /// (e.g. a merge output awaiting commit) survives.
    ///
    /// # Errors
    ///
    /// Returns `CannotCleanAll` if nothing would be retained, and storage
    /// or parse errors while listing the root or reading retained versions.
    /// Failed deletes are reported in [`CleanReport::failures`] instead.
    pub fn clean(&self, keep_version_count: usize, reserved: &[VersionId]) -> CoreResult<CleanReport> {
        info!(
            target: "seglake::clean",
            keep_version_count,
            reserved = reserved.len(),
            "version clean started"
        );
        let versions = list_versions(self.dir)?;
        let mut report = CleanReport::default();

        if versions.len() <= keep_version_count {
            debug!(
                target: "seglake::clean",
                versions = versions.len(),
                "nothing to clean"
            );
            report.kept_versions = versions;
            self.write_index_summary()?;
            return Ok(report);
        }

        let cutoff = versions.len() - keep_version_count;
        let reserved: BTreeSet<VersionId> = reserved.iter().copied().collect();
        let retained_ids: Vec<VersionId> = versions
            .iter()
            .enumerate()
            .filter(|(i, id)| *i >= cutoff || reserved.contains(id))
            .map(|(_, id)| *id)
            .collect();
        let Some(&newest) = versions.last() else {
            return Ok(report);
        };
        if retained_ids.is_empty() {
            return Err(CoreError::CannotCleanAll {
                version_id: newest.as_u32(),
            });
        }

        let retained = retained_ids
            .iter()
            .map(|&id| Version::load(self.dir, id))
            .collect::<CoreResult<Vec<_>>>()?;
        let need_keep_segment: BTreeSet<SegmentId> = retained
            .iter()
            .flat_map(|v| v.segments().iter().copied())
            .collect();
        let need_keep_schema: BTreeSet<SchemaVersionId> =
            retained.iter().map(Version::schema_version).collect();

        let segment_bound = match need_keep_segment.last() {
            Some(max) => max.as_u32(),
            None => self.fallback_segment_bound(&versions),
        };
        debug!(
            target: "seglake::clean",
            retained = retained_ids.len(),
            keep_segments = need_keep_segment.len(),
            segment_bound,
            "computed keep set"
        );

        for &id in &versions {
            if retained_ids.contains(&id) {
                continue;
            }
            if self.remove(&version_file_name(id), false, &mut report) {
                report.removed_versions.push(id);
            }
        }

        let keep_segment =
            |id: SegmentId| id.as_u32() >= segment_bound || need_keep_segment.contains(&id);
        let mut patch_dirs = Vec::new();
        let mut schema_files = Vec::new();
        for name in self.dir.list("")? {
            if let Some(id) = parse_segment_dir_name(&name) {
                if !keep_segment(id) && self.remove(&name, true, &mut report) {
                    report.removed_segments.push(id);
                }
            } else if let Some(schema) = parse_patch_index_dir_name(&name) {
                patch_dirs.push((schema, name));
            } else if let Some(schema) = parse_schema_file_name(&name) {
                schema_files.push((schema, name));
            }
        }

        for (schema, patch_dir) in patch_dirs {
            let names = match self.dir.list(&patch_dir) {
                Ok(names) => names,
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    warn!(target: "seglake::clean", path = %patch_dir, error = %e, "failed to list patch index");
                    report.failures.push(CleanFailure {
                        path: patch_dir,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            for name in &names {
                if let Some(id) = parse_segment_dir_name(name) {
                    if !keep_segment(id) && self.remove(&join(&patch_dir, name), true, &mut report) {
                        report.removed_patch_segments.push((schema, id));
                    }
                }
            }
            if self.dir.list(&patch_dir).map(|n| n.is_empty()).unwrap_or(false)
                && self.remove(&patch_dir, true, &mut report)
            {
                report.removed_patch_dirs.push(schema);
            }
        }

        if let Some(&max_schema) = need_keep_schema.last() {
            for (schema, name) in schema_files {
                if schema < max_schema
                    && !need_keep_schema.contains(&schema)
                    && self.remove(&name, false, &mut report)
                {
                    report.removed_schemas.push(schema);
                }
            }
        }

        report.kept_versions = list_versions(self.dir)?;
        self.write_index_summary()?;
        info!(
            target: "seglake::clean",
            removed_versions = report.removed_versions.len(),
            removed_segments = report.removed_segments.len(),
            removed_patch_segments = report.removed_patch_segments.len(),
            removed_schemas = report.removed_schemas.len(),
            tolerated_missing = report.tolerated_missing,
            failures = report.failures.len(),
            "version clean completed"
        );
        Ok(report)
    }

    /// Cleans every version up to and including `version_id`, except
    /// `reserved`.
    ///
    /// # Errors
    ///
    /// Returns `CannotCleanAll` if no version is newer than `version_id`,
    /// and the errors of [`Self::clean`].
    pub fn clean_version_and_before(
        &self,
        version_id: VersionId,
        reserved: &[VersionId],
    ) -> CoreResult<CleanReport> {
        let keep = list_versions(self.dir)?
            .iter()
            .filter(|&&id| id > version_id)
            .count();
        if keep == 0 {
            return Err(CoreError::CannotCleanAll {
                version_id: version_id.as_u32(),
            });
        }
        self.clean(keep, reserved)
    }

    /// Exclusive segment bound used when no retained version references a
    /// segment: one past the last segment of the newest version that has
    /// any. Unreadable versions are skipped, which only lowers the bound.
    fn fallback_segment_bound(&self, versions: &[VersionId]) -> u32 {
        for &id in versions.iter().rev() {
            match Version::load(self.dir, id) {
                Ok(version) => {
                    if let Some(last) = version.last_segment() {
                        return last.as_u32() + 1;
                    }
                }
                Err(e) => {
                    warn!(target: "seglake::clean", version = %id, error = %e, "skipping unreadable version");
                }
            }
        }
        0
    }

    /// Removes a file or directory, classifying failures into `report`.
    /// Returns true if this call removed it.
    fn remove(&self, path: &str, is_dir: bool, report: &mut CleanReport) -> bool {
        let result = if is_dir {
            self.dir.remove_dir_all(path)
        } else {
            self.dir.remove_file(path)
        };
        match result {
            Ok(()) => {
                debug!(target: "seglake::clean", path, "removed");
                true
            }
            Err(e) if e.is_not_found() => {
                warn!(target: "seglake::clean", path, "already removed");
                report.tolerated_missing += 1;
                false
            }
            Err(e) => {
                warn!(target: "seglake::clean", path, error = %e, "failed to remove");
                report.failures.push(CleanFailure {
                    path: path.to_string(),
                    error: e.to_string(),
                });
                false
            }
        }
    }

    fn write_index_summary(&self) -> CoreResult<()> {
        let mut summary = IndexSummary {
            timestamp: now_micros(),
            ..IndexSummary::default()
        };
        summary.versions = list_versions(self.dir)?;
        for name in self.dir.list("")? {
            if let Some(id) = parse_segment_dir_name(&name) {
                summary.segments.push(id);
            } else if let Some(id) = parse_schema_file_name(&name) {
                summary.schemas.push(id);
            }
        }
        summary.segments.sort_unstable();
        summary.schemas.sort_unstable();
        self.dir
            .write(INDEX_SUMMARY_FILE, &serde_json::to_vec_pretty(&summary)?)?;
        Ok(())
    }
}
