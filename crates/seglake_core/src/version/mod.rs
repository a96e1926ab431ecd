//! Committed versions.
//!
//! A version is an immutable snapshot: an ascending set of segment ids
//! plus the schema it was built with. Versions are stored as
//! `version.<id>` JSON files at the partition root and never rewritten.

mod committer;

pub use committer::{CleanFailure, CleanReport, IndexSummary, VersionCommitter};

use crate::dir::{parse_version_file_name, version_file_name};
use crate::error::{CoreError, CoreResult};
use crate::types::{now_micros, SchemaVersionId, SegmentId, VersionId};
use seglake_storage::Directory;
use serde::{Deserialize, Serialize};

/// One committed snapshot of a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    #[serde(rename = "versionid")]
    version_id: VersionId,
    schema_version: SchemaVersionId,
    timestamp: i64,
    segments: Vec<SegmentId>,
}

impl Version {
    /// Creates a version over `segments`, sorting and deduplicating them.
    #[must_use]
    pub fn new(
        version_id: VersionId,
        schema_version: SchemaVersionId,
        segments: impl IntoIterator<Item = SegmentId>,
    ) -> Self {
        let mut segments: Vec<SegmentId> = segments.into_iter().collect();
        segments.sort_unstable();
        segments.dedup();
        Self {
            version_id,
            schema_version,
            timestamp: now_micros(),
            segments,
        }
    }

    /// Sets the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The version id.
    #[must_use]
    pub fn version_id(&self) -> VersionId {
        self.version_id
    }

    /// The schema version id.
    #[must_use]
    pub fn schema_version(&self) -> SchemaVersionId {
        self.schema_version
    }

    /// Commit time in microseconds since the epoch.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Segment ids in ascending order.
    #[must_use]
    pub fn segments(&self) -> &[SegmentId] {
        &self.segments
    }

    /// Number of segments.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// True if the version references `id`.
    #[must_use]
    pub fn contains(&self, id: SegmentId) -> bool {
        self.segments.binary_search(&id).is_ok()
    }

    /// Largest referenced segment id.
    #[must_use]
    pub fn last_segment(&self) -> Option<SegmentId> {
        self.segments.last().copied()
    }

    /// Segments of `self` that `older` lacks, as a version with `self`'s
    /// ids.
    #[must_use]
    pub fn diff(&self, older: &Version) -> Version {
        Self {
            version_id: self.version_id,
            schema_version: self.schema_version,
            timestamp: self.timestamp,
            segments: self
                .segments
                .iter()
                .copied()
                .filter(|id| !older.contains(*id))
                .collect(),
        }
    }

    /// Builds the successor of `self` with `removed` dropped and `added`
    /// appended.
    #[must_use]
    pub fn successor(
        &self,
        version_id: VersionId,
        removed: &[SegmentId],
        added: &[SegmentId],
    ) -> Version {
        let kept = self
            .segments
            .iter()
            .copied()
            .filter(|id| !removed.contains(id));
        Version::new(version_id, self.schema_version, kept.chain(added.iter().copied()))
    }

    fn check(&self) -> CoreResult<()> {
        if self.segments.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CoreError::invalid_segment_set(format!(
                "version {} lists segments out of order or twice",
                self.version_id
            )));
        }
        Ok(())
    }

    /// Parses a version file.
    ///
    /// # Errors
    ///
    /// Returns `Json` for unparsable bytes and `InvalidSegmentSet` if the
    /// segment list isn't strictly ascending.
    pub fn from_json(bytes: &[u8]) -> CoreResult<Self> {
        let version: Self = serde_json::from_slice(bytes)?;
        version.check()?;
        Ok(version)
    }

    /// Serializes the version.
    ///
    /// # Errors
    ///
    /// Returns `Json` if serialization fails.
    pub fn to_json(&self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Loads `version.<id>` from the partition root.
    ///
    /// # Errors
    ///
    /// Returns storage errors, or parse errors from [`Self::from_json`],
    /// or `CorruptFormat` if the stored id disagrees with the file name.
    pub fn load(dir: &dyn Directory, id: VersionId) -> CoreResult<Self> {
        let version = Self::from_json(&dir.read(&version_file_name(id))?)?;
        if version.version_id != id {
            return Err(CoreError::corrupt_format(format!(
                "{} holds version {}",
                version_file_name(id),
                version.version_id
            )));
        }
        Ok(version)
    }

    /// Writes the version file.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn store(&self, dir: &dyn Directory) -> CoreResult<()> {
        dir.write(&version_file_name(self.version_id), &self.to_json()?)?;
        Ok(())
    }
}

/// Lists committed version ids at the partition root, ascending.
///
/// # Errors
///
/// Returns storage errors.
pub fn list_versions(dir: &dyn Directory) -> CoreResult<Vec<VersionId>> {
    let mut ids: Vec<VersionId> = dir
        .list("")?
        .iter()
        .filter_map(|name| parse_version_file_name(name))
        .collect();
    ids.sort_unstable();
    Ok(ids)
}

/// Loads the newest committed version, if any.
///
/// # Errors
///
/// Returns storage or parse errors.
pub fn load_latest(dir: &dyn Directory) -> CoreResult<Option<Version>> {
    match list_versions(dir)?.last() {
        Some(&id) => Version::load(dir, id).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seglake_storage::InMemoryDirectory;

    fn segs(ids: &[u32]) -> Vec<SegmentId> {
        ids.iter().copied().map(SegmentId::new).collect()
    }

    #[test]
    fn new_sorts_and_dedups() {
        let v = Version::new(VersionId::new(1), SchemaVersionId::new(0), segs(&[4, 1, 4, 2]));
        assert_eq!(v.segments(), segs(&[1, 2, 4]).as_slice());
        assert!(v.contains(SegmentId::new(2)));
        assert!(!v.contains(SegmentId::new(3)));
        assert_eq!(v.last_segment(), Some(SegmentId::new(4)));
    }

    #[test]
    fn diff_keeps_new_segments() {
        let old = Version::new(VersionId::new(1), SchemaVersionId::new(0), segs(&[0, 1, 2]));
        let new = Version::new(VersionId::new(2), SchemaVersionId::new(0), segs(&[0, 2, 3, 4]));
        let diff = new.diff(&old);
        assert_eq!(diff.segments(), segs(&[3, 4]).as_slice());
        assert_eq!(diff.version_id(), VersionId::new(2));
    }

    #[test]
    fn successor_replaces_merged_segments() {
        let v = Version::new(VersionId::new(3), SchemaVersionId::new(1), segs(&[0, 1, 2, 5]));
        let next = v.successor(VersionId::new(4), &segs(&[1, 2]), &segs(&[6]));
        assert_eq!(next.segments(), segs(&[0, 5, 6]).as_slice());
        assert_eq!(next.schema_version(), SchemaVersionId::new(1));
    }

    #[test]
    fn json_uses_stored_field_names() {
        let v = Version::new(VersionId::new(7), SchemaVersionId::new(2), segs(&[1]))
            .with_timestamp(42);
        let json: serde_json::Value = serde_json::from_slice(&v.to_json().unwrap()).unwrap();
        assert_eq!(json["versionid"], 7);
        assert_eq!(json["schema_version"], 2);
        assert_eq!(json["timestamp"], 42);
        assert_eq!(json["segments"], serde_json::json!([1]));
    }

    #[test]
    fn unordered_segments_are_rejected() {
        let bytes = br#"{"versionid":1,"schema_version":0,"timestamp":0,"segments":[2,1]}"#;
        let err = Version::from_json(bytes).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSegmentSet { .. }));
    }

    #[test]
    fn list_and_load_latest() {
        let dir = InMemoryDirectory::new();
        assert!(load_latest(&dir).unwrap().is_none());
        for id in [10u32, 2, 9] {
            Version::new(VersionId::new(id), SchemaVersionId::new(0), segs(&[id]))
                .store(&dir)
                .unwrap();
        }
        dir.write("version.tmp", b"{}").unwrap();

        let ids = list_versions(&dir).unwrap();
        assert_eq!(ids, vec![VersionId::new(2), VersionId::new(9), VersionId::new(10)]);
        let latest = load_latest(&dir).unwrap().unwrap();
        assert_eq!(latest.version_id(), VersionId::new(10));
    }

    #[test]
    fn load_rejects_mismatched_id() {
        let dir = InMemoryDirectory::new();
        let v = Version::new(VersionId::new(3), SchemaVersionId::new(0), segs(&[]));
        dir.write("version.4", &v.to_json().unwrap()).unwrap();
        assert!(Version::load(&dir, VersionId::new(4)).is_err());
    }
}
