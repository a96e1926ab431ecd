//! Version retention against a filesystem partition.

use seglake_core::dir::INDEX_SUMMARY_FILE;
use seglake_core::{
    list_versions, AttributeConfig, BuildingSegment, CoreError, Document, IdAllocator,
    IndexSummary, OffsetConfig, PartitionView, RetentionConfig, Schema, SchemaVersionId,
    SegmentId, Version, VersionCommitter, VersionId,
};
use seglake_storage::{Directory, FsDirectory};
use tempfile::TempDir;

fn schema() -> Schema {
    Schema::new("docs", SchemaVersionId::new(0)).with_attribute(AttributeConfig::var_len("title"))
}

fn open_partition() -> (TempDir, FsDirectory) {
    let temp = TempDir::new().unwrap();
    let dir = FsDirectory::open(&temp.path().join("partition"), true).unwrap();
    schema().store(&dir).unwrap();
    (temp, dir)
}

fn build_segments(dir: &FsDirectory, ids: &mut IdAllocator, count: u32) -> Vec<SegmentId> {
    let schema = schema();
    (0..count)
        .map(|i| {
            let mut segment =
                BuildingSegment::new(ids.allocate_segment(), &schema, &OffsetConfig::default())
                    .unwrap();
            segment
                .add_document(&Document::new().with_attribute("title", format!("doc {i}")))
                .unwrap();
            segment.dump(dir).unwrap().id
        })
        .collect()
}

fn commit(dir: &FsDirectory, ids: &mut IdAllocator, segments: &[u32]) -> Version {
    let version = Version::new(
        ids.allocate_version(),
        SchemaVersionId::new(0),
        segments.iter().copied().map(SegmentId::new),
    );
    VersionCommitter::new(dir).commit(&version, ids).unwrap();
    version
}

fn segment_dirs(dir: &FsDirectory) -> Vec<u32> {
    dir.list("")
        .unwrap()
        .iter()
        .filter_map(|n| seglake_core::dir::parse_segment_dir_name(n))
        .map(SegmentId::as_u32)
        .collect()
}

/// v0..v5 over segments 0..=7; segment 7 is not referenced by any version.
fn six_versions(dir: &FsDirectory) -> IdAllocator {
    let mut ids = IdAllocator::default();
    build_segments(dir, &mut ids, 8);
    for segments in [&[0, 1][..], &[1, 2], &[3], &[4], &[2, 5], &[5, 6]] {
        commit(dir, &mut ids, segments);
    }
    ids
}

#[test]
fn reserved_and_newest_versions_keep_their_segments() {
    let (_temp, dir) = open_partition();
    six_versions(&dir);

    let config = RetentionConfig::new()
        .keep_version_count(2)
        .reserve(VersionId::new(1));
    let report = VersionCommitter::new(&dir).clean_with(&config).unwrap();

    assert!(report.is_complete());
    assert_eq!(
        report.removed_versions,
        [0, 2, 3].map(VersionId::new).to_vec()
    );
    assert_eq!(
        report.kept_versions,
        [1, 4, 5].map(VersionId::new).to_vec()
    );
    assert_eq!(report.removed_segments, [0, 3, 4].map(SegmentId::new).to_vec());
    // 7 is above every retained segment and may be an uncommitted merge output
    assert_eq!(segment_dirs(&dir), vec![1, 2, 5, 6, 7]);

    for id in list_versions(&dir).unwrap() {
        let version = Version::load(&dir, id).unwrap();
        let view = PartitionView::open(&dir, version.clone(), Vec::new(), false).unwrap();
        assert_eq!(view.total_doc_count() as usize, version.segment_count());
    }

    let summary = IndexSummary::load(&dir).unwrap();
    assert_eq!(summary.versions, [1, 4, 5].map(VersionId::new).to_vec());
    assert_eq!(summary.segments, [1, 2, 5, 6, 7].map(SegmentId::new).to_vec());
    assert_eq!(summary.schemas, vec![SchemaVersionId::new(0)]);
}

#[test]
fn repeated_clean_is_a_noop() {
    let (_temp, dir) = open_partition();
    six_versions(&dir);
    let committer = VersionCommitter::new(&dir);
    committer.clean(2, &[VersionId::new(1)]).unwrap();
    let before = segment_dirs(&dir);

    let report = committer.clean(2, &[VersionId::new(1)]).unwrap();
    assert!(report.removed_versions.is_empty());
    assert!(report.removed_segments.is_empty());
    assert_eq!(segment_dirs(&dir), before);
    assert!(dir.exists(INDEX_SUMMARY_FILE).unwrap());
}

#[test]
fn clean_version_and_before_keeps_newer_versions() {
    let (_temp, dir) = open_partition();
    six_versions(&dir);
    let committer = VersionCommitter::new(&dir);

    let report = committer
        .clean_version_and_before(VersionId::new(4), &[])
        .unwrap();
    assert_eq!(report.kept_versions, vec![VersionId::new(5)]);
    assert_eq!(segment_dirs(&dir), vec![5, 6, 7]);

    assert!(matches!(
        committer.clean_version_and_before(VersionId::new(5), &[]),
        Err(CoreError::CannotCleanAll { version_id: 5 })
    ));
    assert_eq!(list_versions(&dir).unwrap(), vec![VersionId::new(5)]);
}

#[test]
fn commit_after_clean_never_reuses_ids() {
    let (_temp, dir) = open_partition();
    six_versions(&dir);
    VersionCommitter::new(&dir).clean(1, &[]).unwrap();

    // a fresh allocator learns the floor from disk
    let mut ids = IdAllocator::default();
    let stale = Version::new(VersionId::new(3), SchemaVersionId::new(0), [SegmentId::new(6)]);
    assert!(matches!(
        VersionCommitter::new(&dir).commit(&stale, &mut ids),
        Err(CoreError::InvariantViolated { .. })
    ));
    assert_eq!(ids.peek_version(), VersionId::new(6));

    let next = commit(&dir, &mut ids, &[6]);
    assert_eq!(next.version_id(), VersionId::new(6));
}
