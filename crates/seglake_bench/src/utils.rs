//! Benchmark utilities.

use rand::Rng;
use seglake_core::{
    AttributeConfig, BuildingSegment, Document, IdAllocator, OffsetConfig, Schema, SchemaVersionId,
    Version, VersionCommitter,
};
use seglake_storage::Directory;

/// Generate random value data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Offsets of `count` values; every `1 / variance` value has a random
/// length, the others are `base_len` long.
///
/// Low variance lets most compressed slots collapse to a single entry.
pub fn offsets(count: usize, base_len: u64, variance: u32) -> Vec<u64> {
    let mut rng = rand::thread_rng();
    let mut offsets = Vec::with_capacity(count + 1);
    let mut end = 0u64;
    offsets.push(end);
    for _ in 0..count {
        end += if variance > 0 && rng.gen_ratio(1, variance) {
            rng.gen_range(0..base_len * 4)
        } else {
            base_len
        };
        offsets.push(end);
    }
    offsets
}

/// Random doc ids in `[0, doc_count)`.
pub fn random_doc_ids(count: usize, doc_count: u32) -> Vec<u32> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(0..doc_count)).collect()
}

/// Schema used by the merge benchmarks.
pub fn bench_schema(compress: bool) -> Schema {
    Schema::new("bench", SchemaVersionId::new(0))
        .with_attribute(AttributeConfig::var_len("body").compress_offset(compress))
        .with_attribute(AttributeConfig::fixed("score", 8))
}

/// Builds `segments` segments of `docs_per_segment` documents each and
/// commits them as one version.
pub fn build_partition(
    dir: &dyn Directory,
    schema: &Schema,
    segments: usize,
    docs_per_segment: u32,
    value_size: usize,
) -> (Version, IdAllocator) {
    schema.store(dir).expect("Failed to store schema");
    let mut ids = IdAllocator::default();
    let mut built = Vec::with_capacity(segments);
    for _ in 0..segments {
        let mut segment =
            BuildingSegment::new(ids.allocate_segment(), schema, &OffsetConfig::default())
                .expect("Failed to start segment");
        for doc in 0..docs_per_segment {
            let document = Document::new()
                .with_attribute("body", random_data(value_size))
                .with_attribute("score", u64::from(doc).to_le_bytes());
            segment.add_document(&document).expect("Failed to add document");
        }
        built.push(segment.dump(dir).expect("Failed to dump segment").id);
    }
    let version = Version::new(ids.allocate_version(), schema.schema_version_id, built);
    VersionCommitter::new(dir)
        .commit(&version, &mut ids)
        .expect("Failed to commit version");
    (version, ids)
}
