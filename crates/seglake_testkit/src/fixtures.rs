//! Test fixtures and partition helpers.
//!
//! Provides a partition root with an id allocator and a schema, plus
//! shortcuts for building segments, committing versions and reading
//! attribute values back.

use seglake_core::dir::{attribute_path, segment_path, sub_segment_path};
use seglake_core::{
    load_latest, AttributeConfig, AttributeReader, BuildingSegment, Document, IdAllocator,
    OffsetConfig, PartitionView, Schema, SchemaVersionId, SegmentData, SegmentId, SegmentInfo,
    Version, VersionCommitter,
};
use seglake_storage::{Directory, FsDirectory, InMemoryDirectory};
use std::path::PathBuf;
use tempfile::TempDir;

/// A test partition with automatic cleanup.
pub struct PartitionFixture {
    /// The partition root.
    pub dir: Box<dyn Directory>,
    /// Id allocator shared by every segment and version of the fixture.
    pub ids: IdAllocator,
    schema: Schema,
    offset_config: OffsetConfig,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl PartitionFixture {
    /// Creates a partition in memory.
    pub fn memory(schema: Schema) -> Self {
        Self::with_dir(Box::new(InMemoryDirectory::new()), schema, None)
    }

    /// Creates a partition in a temporary directory.
    pub fn file(schema: Schema) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let dir = FsDirectory::open(&temp_dir.path().join("partition"), true)
            .expect("Failed to open partition directory");
        Self::with_dir(Box::new(dir), schema, Some(temp_dir))
    }

    /// Creates a partition over an existing directory.
    pub fn over(dir: Box<dyn Directory>, schema: Schema) -> Self {
        Self::with_dir(dir, schema, None)
    }

    fn with_dir(dir: Box<dyn Directory>, schema: Schema, temp_dir: Option<TempDir>) -> Self {
        schema.store(dir.as_ref()).expect("Failed to store schema");
        Self {
            dir,
            ids: IdAllocator::default(),
            schema,
            offset_config: OffsetConfig::default(),
            _temp_dir: temp_dir,
        }
    }

    /// Uses `config` for every attribute written or read from now on.
    #[must_use]
    pub fn with_offset_config(mut self, config: OffsetConfig) -> Self {
        self.offset_config = config;
        self
    }

    /// Returns the partition root.
    pub fn dir(&self) -> &dyn Directory {
        self.dir.as_ref()
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the offset configuration.
    pub fn offset_config(&self) -> &OffsetConfig {
        &self.offset_config
    }

    /// Returns the partition path if file-based, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().join("partition"))
    }

    /// Starts a building segment with the next free id.
    pub fn start_segment(&mut self) -> BuildingSegment {
        BuildingSegment::new(self.ids.allocate_segment(), &self.schema, &self.offset_config)
            .expect("Failed to start building segment")
    }

    /// Dumps a building segment.
    pub fn finish_segment(&self, segment: &BuildingSegment) -> SegmentData {
        segment.dump(self.dir()).expect("Failed to dump segment")
    }

    /// Builds and dumps a segment holding `docs`.
    pub fn build_segment(&mut self, docs: &[Document]) -> SegmentData {
        let mut segment = self.start_segment();
        for doc in docs {
            segment.add_document(doc).expect("Failed to add document");
        }
        self.finish_segment(&segment)
    }

    /// Commits a version over `segments` with the next free version id.
    pub fn commit(&mut self, segments: &[SegmentId]) -> Version {
        let version = Version::new(
            self.ids.allocate_version(),
            self.schema.schema_version_id,
            segments.iter().copied(),
        );
        VersionCommitter::new(self.dir.as_ref())
            .commit(&version, &mut self.ids)
            .expect("Failed to commit version");
        version
    }

    /// Loads the newest committed version.
    pub fn latest(&self) -> Version {
        load_latest(self.dir())
            .expect("Failed to list versions")
            .expect("Partition has no version")
    }

    /// Opens a view over `version` with a sub view when the schema has one.
    pub fn view(&self, version: &Version) -> PartitionView {
        PartitionView::open(
            self.dir(),
            version.clone(),
            Vec::new(),
            self.schema.has_sub_schema(),
        )
        .expect("Failed to open partition view")
    }

    /// Reads every value of `field` in a built segment.
    pub fn read_values(&self, segment: SegmentId, field: &str) -> Vec<Vec<u8>> {
        let path = segment_path(segment);
        let info = SegmentInfo::load(self.dir(), &path).expect("Failed to load segment info");
        let attribute = self.schema.attribute(field).expect("Unknown field");
        read_all(
            self.dir(),
            &attribute_path(&path, field),
            attribute,
            info.doc_count,
            &self.offset_config,
        )
    }

    /// Reads every value of the sub schema field `field` in a built segment.
    pub fn read_sub_values(&self, segment: SegmentId, field: &str) -> Vec<Vec<u8>> {
        let path = segment_path(segment);
        let info = SegmentInfo::load(self.dir(), &path).expect("Failed to load segment info");
        let attribute = self
            .schema
            .sub_schema
            .as_ref()
            .expect("Schema has no sub schema")
            .attribute(field)
            .expect("Unknown sub field");
        read_all(
            self.dir(),
            &attribute_path(&sub_segment_path(&path), field),
            attribute,
            info.sub_doc_count,
            &self.offset_config,
        )
    }

    /// Reads every value of `field` as UTF-8 text.
    pub fn read_text(&self, segment: SegmentId, field: &str) -> Vec<String> {
        self.read_values(segment, field)
            .into_iter()
            .map(|v| String::from_utf8(v).expect("Value is not UTF-8"))
            .collect()
    }
}

fn read_all(
    dir: &dyn Directory,
    attr_path: &str,
    attribute: &AttributeConfig,
    doc_count: u32,
    base: &OffsetConfig,
) -> Vec<Vec<u8>> {
    let reader = AttributeReader::open(dir, attr_path, attribute, doc_count, base)
        .expect("Failed to open attribute");
    (0..doc_count)
        .map(|doc| reader.read(doc).expect("Failed to read value"))
        .collect()
}

impl std::ops::Deref for PartitionFixture {
    type Target = dyn Directory;

    fn deref(&self) -> &Self::Target {
        self.dir.as_ref()
    }
}

/// Runs a test with a temporary in-memory partition.
pub fn with_temp_partition<F, R>(schema: Schema, f: F) -> R
where
    F: FnOnce(&mut PartitionFixture) -> R,
{
    let mut partition = PartitionFixture::memory(schema);
    f(&mut partition)
}

/// Runs a test with a temporary file-based partition.
pub fn with_file_partition<F, R>(schema: Schema, f: F) -> R
where
    F: FnOnce(&mut PartitionFixture) -> R,
{
    let mut partition = PartitionFixture::file(schema);
    f(&mut partition)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Schema with an updatable var-len `title` and a fixed 4-byte `price`.
    pub fn catalog_schema() -> Schema {
        Schema::new("catalog", SchemaVersionId::new(0))
            .with_attribute(AttributeConfig::var_len("title").updatable(true))
            .with_attribute(AttributeConfig::fixed("price", 4).updatable(true))
            .with_summary()
    }

    /// [`catalog_schema`] with a sub space holding a var-len `color`.
    pub fn catalog_schema_with_variants() -> Schema {
        catalog_schema().with_sub_schema(
            Schema::new("variants", SchemaVersionId::new(0))
                .with_attribute(AttributeConfig::var_len("color")),
        )
    }

    /// A catalog document titled `title` priced `price`.
    pub fn catalog_doc(title: &str, price: u32) -> Document {
        Document::new()
            .with_attribute("title", title)
            .with_attribute("price", price.to_le_bytes())
            .with_summary(format!("summary of {title}"))
    }

    /// Documents `{prefix}{start}` to `{prefix}{end - 1}`, priced by index.
    pub fn numbered_docs(prefix: &str, range: std::ops::Range<u32>) -> Vec<Document> {
        range
            .map(|i| catalog_doc(&format!("{prefix}{i}"), i))
            .collect()
    }

    /// Partition with one segment per entry of `doc_counts`, all committed
    /// as version 0. Segment `i` holds titles `s{i}_0..`.
    pub fn populated_partition(doc_counts: &[u32]) -> (PartitionFixture, Version) {
        let mut partition = PartitionFixture::memory(catalog_schema());
        let ids: Vec<SegmentId> = doc_counts
            .iter()
            .enumerate()
            .map(|(i, &count)| {
                partition
                    .build_segment(&numbered_docs(&format!("s{i}_"), 0..count))
                    .id
            })
            .collect();
        let version = partition.commit(&ids);
        (partition, version)
    }

    /// Partition with a chain of versions `v0..v{count - 1}`; version `i`
    /// holds segments `i` and `i + 1`.
    pub fn version_chain(count: u32) -> PartitionFixture {
        let mut partition = PartitionFixture::memory(catalog_schema());
        let mut segments = vec![partition.build_segment(&numbered_docs("c0_", 0..2)).id];
        for i in 0..count {
            segments.push(
                partition
                    .build_segment(&numbered_docs(&format!("c{}_", i + 1), 0..2))
                    .id,
            );
            let version = &segments[segments.len() - 2..];
            partition.commit(version);
        }
        partition
    }
}
