//! In-memory building segment.

use super::{SegmentData, SegmentInfo, SegmentKind};
use crate::attribute::{AttributePatch, AttributeWriter, FixedLenAttributeWriter, VarLenAttributeWriter};
use crate::config::OffsetConfig;
use crate::dir::{attribute_path, segment_path, sub_segment_path, summary_path};
use crate::error::{CoreError, CoreResult};
use crate::schema::{AttributeKind, Schema};
use crate::types::{DocId, SegmentId};
use seglake_storage::path::join;
use seglake_storage::Directory;
use std::collections::BTreeMap;
use tracing::debug;

/// Directory (inside a segment) of the main-to-sub join column: one `u32`
/// per main doc holding the end of its sub doc range.
pub const SUB_JOIN_DIR: &str = "main_join";

/// A document to add to a building segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    attributes: BTreeMap<String, Vec<u8>>,
    summary: Option<Vec<u8>>,
    sub_docs: Vec<Document>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an attribute value.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Sets the stored summary.
    #[must_use]
    pub fn with_summary(mut self, summary: impl Into<Vec<u8>>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    /// Adds a sub document.
    #[must_use]
    pub fn with_sub_doc(mut self, sub: Document) -> Self {
        self.sub_docs.push(sub);
        self
    }

    /// The attribute value, if set.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&[u8]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    /// Sub documents.
    #[must_use]
    pub fn sub_docs(&self) -> &[Document] {
        &self.sub_docs
    }
}

/// A mutable segment that accepts documents until it is dumped.
#[derive(Debug)]
pub struct BuildingSegment {
    id: SegmentId,
    schema: Schema,
    writers: Vec<(String, AttributeWriter)>,
    summary: Option<VarLenAttributeWriter>,
    sub: Option<Box<BuildingSegment>>,
    join: FixedLenAttributeWriter,
    patches: BTreeMap<(String, SegmentId), AttributePatch>,
    doc_count: u32,
}

impl BuildingSegment {
    /// Creates an empty segment with id `id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid schema.
    pub fn new(id: SegmentId, schema: &Schema, offset_config: &OffsetConfig) -> CoreResult<Self> {
        schema.validate()?;
        let writers = schema
            .attributes
            .iter()
            .map(|a| (a.name.clone(), AttributeWriter::for_config(a, offset_config)))
            .collect();
        let summary = schema
            .summary
            .then(|| VarLenAttributeWriter::new(offset_config.clone().compress(false).updatable(false)));
        let sub = schema
            .sub_schema
            .as_deref()
            .map(|sub| Self::new(id, sub, offset_config).map(Box::new))
            .transpose()?;
        Ok(Self {
            id,
            schema: schema.clone(),
            writers,
            summary,
            sub,
            join: FixedLenAttributeWriter::new(4, false),
            patches: BTreeMap::new(),
            doc_count: 0,
        })
    }

    /// Segment id.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Documents added so far.
    #[must_use]
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Sub documents added so far.
    #[must_use]
    pub fn sub_doc_count(&self) -> u32 {
        self.sub.as_ref().map_or(0, |s| s.doc_count)
    }

    /// Description for a partition view.
    #[must_use]
    pub fn segment_data(&self) -> SegmentData {
        SegmentData {
            id: self.id,
            kind: SegmentKind::Building,
            doc_count: self.doc_count,
            sub_doc_count: self.sub_doc_count(),
        }
    }

    /// Bytes held in memory.
    #[must_use]
    pub fn memory_use(&self) -> usize {
        self.writers.iter().map(|(_, w)| w.memory_use()).sum::<usize>()
            + self.summary.as_ref().map_or(0, VarLenAttributeWriter::memory_use)
            + self.sub.as_ref().map_or(0, |s| s.memory_use())
            + self.join.memory_use()
    }

    fn values_for<'d>(&self, doc: &'d Document) -> CoreResult<Vec<std::borrow::Cow<'d, [u8]>>> {
        if let Some(unknown) = doc
            .attributes
            .keys()
            .find(|name| self.schema.attribute(name).is_err())
        {
            return Err(CoreError::field_not_found(unknown.clone()));
        }
        self.schema
            .attributes
            .iter()
            .map(|a| match (doc.attribute(&a.name), a.kind) {
                (Some(value), AttributeKind::Fixed { width }) if value.len() != width as usize => {
                    Err(CoreError::invalid_argument(format!(
                        "attribute {} expects {width} bytes, got {}",
                        a.name,
                        value.len()
                    )))
                }
                (Some(value), _) => Ok(std::borrow::Cow::Borrowed(value)),
                (None, AttributeKind::VarLen) => Ok(std::borrow::Cow::Borrowed(&[][..])),
                (None, AttributeKind::Fixed { width }) => {
                    Ok(std::borrow::Cow::Owned(vec![0; width as usize]))
                }
            })
            .collect()
    }

    /// Adds a document and returns its local doc id.
    ///
    /// Missing attributes get an empty (var-len) or zeroed (fixed) value.
    /// The document is checked in full before anything is written.
    ///
    /// # Errors
    ///
    /// Returns `FieldNotFound` for an attribute the schema lacks, and
    /// `InvalidArgument` for a wrongly sized fixed value or sub documents
    /// without a sub schema.
    pub fn add_document(&mut self, doc: &Document) -> CoreResult<DocId> {
        let values = self.values_for(doc)?;
        match &self.sub {
            Some(sub) => {
                for sub_doc in &doc.sub_docs {
                    if !sub_doc.sub_docs.is_empty() {
                        return Err(CoreError::invalid_argument("sub documents cannot nest"));
                    }
                    sub.values_for(sub_doc)?;
                }
            }
            None if !doc.sub_docs.is_empty() => {
                return Err(CoreError::invalid_argument(
                    "document has sub documents but the schema has no sub schema",
                ));
            }
            None => {}
        }

        for ((_, writer), value) in self.writers.iter_mut().zip(&values) {
            writer.add_value(value)?;
        }
        if let Some(summary) = &mut self.summary {
            summary.add_value(doc.summary.as_deref().unwrap_or_default())?;
        }
        if let Some(sub) = &mut self.sub {
            for sub_doc in &doc.sub_docs {
                sub.add_document(sub_doc)?;
            }
            let end = sub.doc_count;
            self.join.add_value(&end.to_le_bytes())?;
        }
        let doc_id = self.doc_count;
        self.doc_count += 1;
        Ok(doc_id)
    }

    /// Records an update to doc `doc_id` of the built segment `target`.
    /// Dumped as a patch file of this segment.
    ///
    /// # Errors
    ///
    /// Returns `FieldNotFound` for an unknown attribute and
    /// `InvalidArgument` if `target` is not older than this segment.
    pub fn update_built(
        &mut self,
        target: SegmentId,
        field: &str,
        doc_id: DocId,
        value: Vec<u8>,
    ) -> CoreResult<()> {
        self.schema.attribute(field)?;
        if target >= self.id {
            return Err(CoreError::invalid_argument(format!(
                "patch target {target} is not older than {}",
                self.id
            )));
        }
        self.patches
            .entry((field.to_string(), target))
            .or_default()
            .set(doc_id, value);
        Ok(())
    }

    fn dump_at(&self, dir: &dyn Directory, path: &str) -> CoreResult<SegmentInfo> {
        for (name, writer) in &self.writers {
            writer.dump(dir, &attribute_path(path, name))?;
        }
        if let Some(summary) = &self.summary {
            summary.dump(dir, &summary_path(path))?;
        }
        let sub_doc_count = match &self.sub {
            Some(sub) => {
                sub.dump_at(dir, &sub_segment_path(path))?;
                self.join.dump(dir, &join(path, SUB_JOIN_DIR))?;
                sub.doc_count
            }
            None => 0,
        };
        for ((field, target), patch) in &self.patches {
            patch.store(dir, &attribute_path(path, field), self.id, *target)?;
        }
        let info = SegmentInfo::new(self.doc_count, sub_doc_count);
        info.store(dir, path)?;
        Ok(info)
    }

    /// Writes the segment to `segment_<id>/` and returns its built
    /// description. `segment_info` is written last, so a segment without
    /// it is incomplete.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn dump(&self, dir: &dyn Directory) -> CoreResult<SegmentData> {
        let path = segment_path(self.id);
        let info = self.dump_at(dir, &path)?;
        debug!(
            segment = %self.id,
            doc_count = info.doc_count,
            sub_doc_count = info.sub_doc_count,
            patches = self.patches.len(),
            "dumped building segment"
        );
        Ok(SegmentData::built(self.id, &info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{list_patch_files, AttributeReader, FixedLenAttributeReader};
    use crate::schema::AttributeConfig;
    use crate::types::SchemaVersionId;
    use seglake_storage::InMemoryDirectory;

    fn schema() -> Schema {
        Schema::new("products", SchemaVersionId::new(0))
            .with_attribute(AttributeConfig::var_len("title"))
            .with_attribute(AttributeConfig::fixed("price", 4))
            .with_summary()
    }

    #[test]
    fn add_and_dump() {
        let dir = InMemoryDirectory::new();
        let config = OffsetConfig::default();
        let mut segment = BuildingSegment::new(SegmentId::new(3), &schema(), &config).unwrap();

        segment
            .add_document(
                &Document::new()
                    .with_attribute("title", "pen")
                    .with_attribute("price", 5u32.to_le_bytes())
                    .with_summary("{\"title\":\"pen\"}"),
            )
            .unwrap();
        let second = segment
            .add_document(&Document::new().with_attribute("title", "ink"))
            .unwrap();
        assert_eq!(second, 1);
        assert_eq!(segment.segment_data().kind, SegmentKind::Building);

        let data = segment.dump(&dir).unwrap();
        assert_eq!(data.kind, SegmentKind::Built);
        assert_eq!(data.doc_count, 2);

        let price = schema().attribute("price").unwrap().clone();
        let reader =
            AttributeReader::open(&dir, "segment_3/attribute/price", &price, 2, &config).unwrap();
        assert_eq!(reader.read(1).unwrap(), vec![0; 4]);
        assert_eq!(SegmentInfo::load(&dir, "segment_3").unwrap().doc_count, 2);
        assert!(dir.exists("segment_3/summary/data").unwrap());
    }

    #[test]
    fn invalid_documents_write_nothing() {
        let config = OffsetConfig::default();
        let mut segment = BuildingSegment::new(SegmentId::new(0), &schema(), &config).unwrap();

        let err = segment
            .add_document(&Document::new().with_attribute("color", "red"))
            .unwrap_err();
        assert!(matches!(err, CoreError::FieldNotFound { .. }));
        assert!(segment
            .add_document(&Document::new().with_attribute("price", "x"))
            .is_err());
        assert!(segment
            .add_document(&Document::new().with_sub_doc(Document::new()))
            .is_err());
        assert_eq!(segment.doc_count(), 0);
        assert!(segment.writers.iter().all(|(_, w)| w.doc_count() == 0));
    }

    #[test]
    fn sub_documents_and_join() {
        let dir = InMemoryDirectory::new();
        let config = OffsetConfig::default();
        let schema = schema().with_sub_schema(
            Schema::new("skus", SchemaVersionId::new(0))
                .with_attribute(AttributeConfig::var_len("color")),
        );
        let mut segment = BuildingSegment::new(SegmentId::new(1), &schema, &config).unwrap();
        segment
            .add_document(
                &Document::new()
                    .with_sub_doc(Document::new().with_attribute("color", "red"))
                    .with_sub_doc(Document::new().with_attribute("color", "blue")),
            )
            .unwrap();
        segment.add_document(&Document::new()).unwrap();
        segment
            .add_document(&Document::new().with_sub_doc(Document::new()))
            .unwrap();
        assert_eq!(segment.sub_doc_count(), 3);

        let data = segment.dump(&dir).unwrap();
        assert_eq!(data.sub_doc_count, 3);
        let join = FixedLenAttributeReader::open(&dir, "segment_1/main_join", 3, false).unwrap();
        let ends: Vec<u32> = (0..3)
            .map(|d| u32::from_le_bytes(join.read(d).unwrap().try_into().unwrap()))
            .collect();
        assert_eq!(ends, vec![2, 2, 3]);
        assert!(dir.exists("segment_1/sub_segment/attribute/color/data").unwrap());
    }

    #[test]
    fn patches_are_dumped_per_target() {
        let dir = InMemoryDirectory::new();
        let mut segment =
            BuildingSegment::new(SegmentId::new(5), &schema(), &OffsetConfig::default()).unwrap();
        segment
            .update_built(SegmentId::new(2), "title", 0, b"new".to_vec())
            .unwrap();
        segment
            .update_built(SegmentId::new(2), "title", 0, b"newer".to_vec())
            .unwrap();
        assert!(segment
            .update_built(SegmentId::new(6), "title", 0, Vec::new())
            .is_err());
        assert!(segment
            .update_built(SegmentId::new(2), "color", 0, Vec::new())
            .is_err());
        segment.dump(&dir).unwrap();

        let files = list_patch_files(&dir, "segment_5/attribute/title").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].target, SegmentId::new(2));
        let patch = AttributePatch::load(&dir, &files[0].path).unwrap();
        assert_eq!(patch.get(0), Some(&b"newer"[..]));
    }
}
