//! Offset table benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use seglake_bench::utils::{offsets, random_doc_ids};
use seglake_core::offset::{CompressedOffsets, PlainOffsets};
use seglake_core::{OffsetCodec, OffsetTable};

const DOC_COUNT: usize = 1 << 20;
const LOOKUPS: usize = 4096;

fn tables(variance: u32) -> Vec<(&'static str, OffsetTable)> {
    let offsets = offsets(DOC_COUNT, 64, variance);
    vec![
        (
            "plain",
            OffsetTable::Plain(PlainOffsets::from_offsets(&offsets, false).unwrap()),
        ),
        (
            "compressed",
            OffsetTable::Compressed(
                CompressedOffsets::from_offsets(&offsets, 6, 1 << 20, false).unwrap(),
            ),
        ),
    ]
}

/// Benchmark random point lookups.
fn bench_get_offset(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_offset");
    group.throughput(Throughput::Elements(LOOKUPS as u64));
    let ids = random_doc_ids(LOOKUPS, DOC_COUNT as u32);

    for variance in [0u32, 16, 1] {
        for (name, table) in tables(variance) {
            group.bench_with_input(
                BenchmarkId::new(name, format!("variance_{variance}")),
                &table,
                |b, table| {
                    b.iter(|| {
                        for &id in &ids {
                            black_box(table.get_offset(black_box(id)));
                        }
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmark batch lookups with a share of out-of-range ids.
fn bench_get_offsets(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_offsets");
    group.throughput(Throughput::Elements(LOOKUPS as u64));
    let mut ids = random_doc_ids(LOOKUPS, DOC_COUNT as u32);
    for id in ids.iter_mut().step_by(64) {
        *id += DOC_COUNT as u32;
    }

    for (name, table) in tables(16) {
        group.bench_with_input(BenchmarkId::from_parameter(name), &table, |b, table| {
            b.iter(|| black_box(table.get_offsets(black_box(&ids))));
        });
    }

    group.finish();
}

/// Benchmark in-place updates that keep every offset unchanged.
fn bench_set_offset(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_offset_in_place");
    group.throughput(Throughput::Elements(LOOKUPS as u64));
    let ids = random_doc_ids(LOOKUPS, DOC_COUNT as u32);

    for (name, table) in tables(16) {
        group.bench_with_input(BenchmarkId::from_parameter(name), &table, |b, table| {
            b.iter(|| {
                for &id in &ids {
                    let offset = table.get_offset(id);
                    black_box(table.set_offset(id, offset).unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark encoding a full table.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    group.sample_size(20);

    for (name, table) in tables(16) {
        group.bench_with_input(BenchmarkId::from_parameter(name), &table, |b, table| {
            b.iter(|| black_box(table.encode()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_get_offset,
    bench_get_offsets,
    bench_set_offset,
    bench_encode
);
criterion_main!(benches);
