//! Segment merge benchmarks.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use seglake_bench::utils::{bench_schema, build_partition};
use seglake_core::{DocId, MergeCoordinator, MergePlan, OutputSplit, PartitionView, SegmentId};
use seglake_storage::{FsDirectory, InMemoryDirectory};
use std::collections::{BTreeMap, BTreeSet};
use tempfile::TempDir;

const SEGMENTS: usize = 4;
const DOCS_PER_SEGMENT: u32 = 20_000;
const VALUE_SIZE: usize = 48;

/// Deletes every tenth document of every segment.
fn deletions(segments: &[SegmentId]) -> BTreeMap<SegmentId, BTreeSet<DocId>> {
    segments
        .iter()
        .map(|&id| (id, (0..DOCS_PER_SEGMENT).step_by(10).collect()))
        .collect()
}

/// Benchmark merging in memory, serial and split across instances.
fn bench_merge_in_memory(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_in_memory");
    group.sample_size(10);
    group.throughput(Throughput::Elements(SEGMENTS as u64 * u64::from(DOCS_PER_SEGMENT)));

    for compress in [false, true] {
        for instances in [1u32, 4] {
            let id = BenchmarkId::new(
                if compress { "compressed" } else { "plain" },
                format!("instances_{instances}"),
            );
            group.bench_function(id, |b| {
                b.iter_batched(
                    || {
                        let dir = InMemoryDirectory::new();
                        let schema = bench_schema(compress);
                        let (version, ids) =
                            build_partition(&dir, &schema, SEGMENTS, DOCS_PER_SEGMENT, VALUE_SIZE);
                        (dir, schema, version, ids)
                    },
                    |(dir, schema, version, mut ids)| {
                        let view = PartitionView::open(&dir, version.clone(), Vec::new(), false)
                            .unwrap();
                        let plan = MergePlan::from_view(
                            &view,
                            version.segments(),
                            &deletions(version.segments()),
                            &OutputSplit::Even(2),
                        )
                        .unwrap();
                        let coordinator = MergeCoordinator::new(&dir, &schema);
                        let outcome = if instances > 1 {
                            coordinator.run_parallel(&version, &plan, &mut ids, instances)
                        } else {
                            coordinator.run(&version, &plan, &mut ids)
                        };
                        outcome.unwrap()
                    },
                    BatchSize::LargeInput,
                );
            });
        }
    }

    group.finish();
}

/// Benchmark a full merge and commit on disk.
fn bench_merge_on_disk(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_on_disk");
    group.sample_size(10);

    group.bench_function("merge_and_commit", |b| {
        b.iter_batched(
            || {
                let temp_dir = TempDir::new().unwrap();
                let dir = FsDirectory::open(temp_dir.path(), false).unwrap();
                let schema = bench_schema(true);
                let (version, ids) =
                    build_partition(&dir, &schema, SEGMENTS, DOCS_PER_SEGMENT / 4, VALUE_SIZE);
                (temp_dir, dir, schema, version, ids)
            },
            |(_temp_dir, dir, schema, version, mut ids)| {
                let view = PartitionView::open(&dir, version.clone(), Vec::new(), false).unwrap();
                let plan = MergePlan::from_view(
                    &view,
                    version.segments(),
                    &BTreeMap::new(),
                    &OutputSplit::Even(1),
                )
                .unwrap();
                let coordinator = MergeCoordinator::new(&dir, &schema);
                let outcome = coordinator.run(&version, &plan, &mut ids).unwrap();
                coordinator.commit(&version, &plan, &outcome, &mut ids).unwrap()
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_merge_in_memory, bench_merge_on_disk);
criterion_main!(benches);
