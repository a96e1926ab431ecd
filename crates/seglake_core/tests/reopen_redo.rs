//! Redo classification across a version switch on a real partition.

use seglake_core::{
    AttributeConfig, BuildingSegment, CoreError, DocId, Document, IdAllocator, MergeCoordinator,
    MergePlan, OffsetConfig, Operation, OutputSplit, PartitionView, RedoHint, ReopenRedoStrategy,
    Schema, SchemaVersionId, SegmentId, Version, VersionCommitter,
};
use seglake_storage::InMemoryDirectory;
use std::collections::{BTreeMap, BTreeSet};

fn schema() -> Schema {
    Schema::new("docs", SchemaVersionId::new(0))
        .with_attribute(AttributeConfig::var_len("title").updatable(true))
}

fn building(ids: &mut IdAllocator, docs: u32) -> BuildingSegment {
    let mut segment =
        BuildingSegment::new(ids.allocate_segment(), &schema(), &OffsetConfig::default()).unwrap();
    for i in 0..docs {
        segment
            .add_document(&Document::new().with_attribute("title", format!("t{i}")))
            .unwrap();
    }
    segment
}

fn commit(dir: &InMemoryDirectory, ids: &mut IdAllocator, segments: &[SegmentId]) -> Version {
    let version = Version::new(
        ids.allocate_version(),
        SchemaVersionId::new(0),
        segments.iter().copied(),
    );
    VersionCommitter::new(dir).commit(&version, ids).unwrap();
    version
}

fn update(doc_id: DocId) -> Operation {
    Operation::UpdateField {
        timestamp: 10,
        doc_id,
        field: "title".into(),
        value: b"new".to_vec(),
    }
}

/// Replays `log` against `strategy` and returns the doc ids that must be
/// re-applied.
fn replayed_docs(strategy: &ReopenRedoStrategy, segment: SegmentId, log: &[Vec<u8>]) -> Vec<DocId> {
    let mut hint = RedoHint::new();
    log.iter()
        .filter_map(|bytes| {
            let operation = Operation::decode(bytes).unwrap();
            let doc = operation.doc_id()?;
            let redo = strategy.need_redo(segment, &operation, &mut hint).unwrap();
            (redo && hint.contains(doc)).then_some(doc)
        })
        .collect()
}

#[test]
fn new_built_segment_bounds_replayed_updates() {
    let dir = InMemoryDirectory::new();
    let mut ids = IdAllocator::default();
    let base: Vec<SegmentId> = (0..3)
        .map(|_| building(&mut ids, 100).dump(&dir).unwrap().id)
        .collect();
    let old = commit(&dir, &mut ids, &base);

    let s3 = building(&mut ids, 100).dump(&dir).unwrap().id;
    let realtime = building(&mut ids, 50);
    let mut segments = base.clone();
    segments.push(s3);
    let new = commit(&dir, &mut ids, &segments);

    let view = PartitionView::open(&dir, new, vec![realtime.segment_data()], false).unwrap();
    assert_eq!(view.segment_range(s3), Some(300..400));
    let mut strategy = ReopenRedoStrategy::new();
    strategy.init(&view, &old, &schema()).unwrap();
    assert_eq!(strategy.update_ranges().unwrap().0, &[300..400]);
    assert_eq!(strategy.delete_ranges().unwrap().0, &[0..400]);

    let log: Vec<Vec<u8>> = [
        update(50),
        update(350),
        update(399),
        update(420),
        Operation::DeleteDoc { timestamp: 11, doc_id: 120 },
        Operation::DeleteDoc { timestamp: 12, doc_id: 430 },
    ]
    .iter()
    .map(|op| op.encode().unwrap())
    .collect();
    // 420 and 430 live in the realtime segment, which no range covers
    assert_eq!(replayed_docs(&strategy, realtime.id(), &log), vec![350, 399, 120]);
}

#[test]
fn merge_output_is_a_new_segment_for_redo() {
    let dir = InMemoryDirectory::new();
    let mut ids = IdAllocator::default();
    let sources: Vec<SegmentId> = (0..4)
        .map(|_| building(&mut ids, 100).dump(&dir).unwrap().id)
        .collect();
    let old = commit(&dir, &mut ids, &sources);

    let schema = schema();
    let coordinator = MergeCoordinator::new(&dir, &schema);
    let view = PartitionView::open(&dir, old.clone(), Vec::new(), false).unwrap();
    let deletions = BTreeMap::from([(sources[0], (0..10).collect::<BTreeSet<DocId>>())]);
    let plan =
        MergePlan::from_view(&view, &sources[..2], &deletions, &OutputSplit::Even(1)).unwrap();
    let outcome = coordinator.run(&old, &plan, &mut ids).unwrap();
    let new = coordinator.commit(&old, &plan, &outcome, &mut ids).unwrap();
    let merged = outcome.output_ids()[0];
    assert_eq!(new.segments(), &[sources[2], sources[3], merged]);

    let new_view = PartitionView::open(&dir, new, Vec::new(), false).unwrap();
    let mut strategy = ReopenRedoStrategy::new();
    strategy.init(&new_view, &old, &schema).unwrap();
    assert_eq!(strategy.update_ranges().unwrap().0, &[200..390]);
    assert_eq!(strategy.delete_ranges().unwrap().0, &[0..390]);

    let log = vec![update(150).encode().unwrap(), update(250).encode().unwrap()];
    assert_eq!(replayed_docs(&strategy, SegmentId::new(99), &log), vec![250]);

    // a second reopen replaces the previous ranges
    strategy.init(&new_view, new_view.version(), &schema).unwrap();
    assert!(strategy.update_ranges().unwrap().0.is_empty());
}

#[test]
fn unclassifiable_operations_stop_the_reopen() {
    let dir = InMemoryDirectory::new();
    let mut ids = IdAllocator::default();
    let s0 = building(&mut ids, 5).dump(&dir).unwrap().id;
    let version = commit(&dir, &mut ids, &[s0]);
    let view = PartitionView::open(&dir, version.clone(), Vec::new(), false).unwrap();

    let mut strategy = ReopenRedoStrategy::new();
    let mut hint = RedoHint::new();
    let before_init = strategy.need_redo(s0, &update(1), &mut hint).unwrap_err();
    assert!(matches!(before_init, CoreError::InvariantViolated { .. }));

    strategy.init(&view, &version, &schema()).unwrap();
    let logged = Operation::AddDoc { timestamp: 1, doc_id: 5 }.encode().unwrap();
    let add = Operation::decode(&logged).unwrap();
    let err = strategy.need_redo(s0, &add, &mut hint).unwrap_err();
    assert!(err.is_fatal());

    // undecodable log entries are rejected before classification
    assert!(matches!(
        Operation::decode(&[0x7f, 0, 0]),
        Err(CoreError::UnknownOperationType { .. })
    ));
}
