//! Attribute (columnar field) storage.
//!
//! An attribute stores one value per document of a segment. Var-len
//! attributes keep a value blob plus an offset table; fixed-width
//! attributes keep a flat array. Both kinds are written by a building
//! segment and read from built segments through [`AttributeReader`].

mod fixed_len;
mod meta;
mod patch;
mod var_len;

pub use fixed_len::{FixedLenAttributeReader, FixedLenAttributeWriter};
pub use meta::AttributeMeta;
pub use patch::{list_patch_files, AttributePatch, PatchFile, PATCH_MAGIC};
pub use var_len::{VarLenAttributeReader, VarLenAttributeWriter, VarLenSessionReader};

use crate::config::OffsetConfig;
use crate::error::{CoreError, CoreResult};
use crate::offset::UpdateOutcome;
use crate::schema::{AttributeConfig, AttributeKind};
use crate::types::DocId;
use seglake_storage::Directory;

/// Writer for either attribute kind.
#[derive(Debug, Clone)]
pub enum AttributeWriter {
    /// Var-len values.
    VarLen(VarLenAttributeWriter),
    /// Fixed-width values.
    Fixed(FixedLenAttributeWriter),
}

impl AttributeWriter {
    /// Creates the writer matching `attribute`.
    #[must_use]
    pub fn for_config(attribute: &AttributeConfig, base: &OffsetConfig) -> Self {
        match attribute.kind {
            AttributeKind::VarLen => {
                Self::VarLen(VarLenAttributeWriter::new(attribute.offset_config(base)))
            }
            AttributeKind::Fixed { width } => {
                Self::Fixed(FixedLenAttributeWriter::new(width, attribute.updatable))
            }
        }
    }

    /// Appends the value of the next doc.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a value the attribute cannot hold.
    pub fn add_value(&mut self, value: &[u8]) -> CoreResult<DocId> {
        match self {
            Self::VarLen(w) => w.add_value(value),
            Self::Fixed(w) => w.add_value(value),
        }
    }

    /// Number of values written.
    #[must_use]
    pub fn doc_count(&self) -> u32 {
        match self {
            Self::VarLen(w) => w.doc_count(),
            Self::Fixed(w) => w.doc_count(),
        }
    }

    /// Bytes held in memory.
    #[must_use]
    pub fn memory_use(&self) -> usize {
        match self {
            Self::VarLen(w) => w.memory_use(),
            Self::Fixed(w) => w.memory_use(),
        }
    }

    /// Writes the attribute files under `attr_path`.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn dump(&self, dir: &dyn Directory, attr_path: &str) -> CoreResult<AttributeMeta> {
        match self {
            Self::VarLen(w) => w.dump(dir, attr_path),
            Self::Fixed(w) => w.dump(dir, attr_path),
        }
    }
}

/// Reader for either attribute kind.
#[derive(Debug)]
pub enum AttributeReader {
    /// Var-len values.
    VarLen(VarLenAttributeReader),
    /// Fixed-width values.
    Fixed(FixedLenAttributeReader),
}

impl AttributeReader {
    /// Opens the attribute described by `attribute` at `attr_path`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` if the stored kind differs from the schema,
    /// and the open errors of the concrete readers.
    pub fn open(
        dir: &dyn Directory,
        attr_path: &str,
        attribute: &AttributeConfig,
        doc_count: u32,
        base: &OffsetConfig,
    ) -> CoreResult<Self> {
        match attribute.kind {
            AttributeKind::VarLen => Ok(Self::VarLen(VarLenAttributeReader::open(
                dir,
                attr_path,
                doc_count,
                &attribute.offset_config(base),
            )?)),
            AttributeKind::Fixed { width } => {
                let reader =
                    FixedLenAttributeReader::open(dir, attr_path, doc_count, attribute.updatable)?;
                if reader.width() != width {
                    return Err(CoreError::corrupt_format(format!(
                        "{attr_path} stores {}-byte values, schema says {width}",
                        reader.width()
                    )));
                }
                Ok(Self::Fixed(reader))
            }
        }
    }

    /// Number of documents.
    #[must_use]
    pub fn doc_count(&self) -> u32 {
        match self {
            Self::VarLen(r) => r.doc_count(),
            Self::Fixed(r) => r.doc_count(),
        }
    }

    /// Reads the value of `doc_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an out-of-range id.
    pub fn read(&self, doc_id: DocId) -> CoreResult<Vec<u8>> {
        match self {
            Self::VarLen(r) => r.read(doc_id),
            Self::Fixed(r) => r.read(doc_id),
        }
    }

    /// Replaces the value of `doc_id`.
    ///
    /// # Errors
    ///
    /// Returns `CapacityExceeded` when a var-len update needs a rewrite,
    /// and `InvalidArgument` for read-only attributes or bad values.
    pub fn update_field(&mut self, doc_id: DocId, value: &[u8]) -> CoreResult<UpdateOutcome> {
        match self {
            Self::VarLen(r) => r.update_field(doc_id, value),
            Self::Fixed(r) => r.update_field(doc_id, value).map(|()| UpdateOutcome::InPlace),
        }
    }

    /// Applies every entry of `patch`.
    ///
    /// # Errors
    ///
    /// Stops at the first failing update and returns its error.
    pub fn apply_patch(&mut self, patch: &AttributePatch) -> CoreResult<()> {
        for (doc_id, value) in patch.iter() {
            self.update_field(doc_id, value)?;
        }
        Ok(())
    }

    /// Writes the attribute back to `attr_path`.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn persist(&self, dir: &dyn Directory, attr_path: &str) -> CoreResult<()> {
        match self {
            Self::VarLen(r) => r.persist(dir, attr_path),
            Self::Fixed(r) => r.persist(dir, attr_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seglake_storage::InMemoryDirectory;

    #[test]
    fn writer_and_reader_follow_schema_kind() {
        let dir = InMemoryDirectory::new();
        let base = OffsetConfig::default();
        let title = AttributeConfig::var_len("title").compress_offset(true);
        let price = AttributeConfig::fixed("price", 2).updatable(true);

        let mut title_writer = AttributeWriter::for_config(&title, &base);
        let mut price_writer = AttributeWriter::for_config(&price, &base);
        for (t, p) in [(&b"pen"[..], [1u8, 0]), (b"ink", [2, 0])] {
            title_writer.add_value(t).unwrap();
            price_writer.add_value(&p).unwrap();
        }
        assert_eq!(title_writer.doc_count(), 2);
        title_writer.dump(&dir, "segment_0/attribute/title").unwrap();
        price_writer.dump(&dir, "segment_0/attribute/price").unwrap();

        let title_reader =
            AttributeReader::open(&dir, "segment_0/attribute/title", &title, 2, &base).unwrap();
        assert!(matches!(title_reader, AttributeReader::VarLen(_)));
        assert_eq!(title_reader.read(1).unwrap(), b"ink");

        let mut price_reader =
            AttributeReader::open(&dir, "segment_0/attribute/price", &price, 2, &base).unwrap();
        let mut patch = AttributePatch::new();
        patch.set(0, vec![9, 9]);
        price_reader.apply_patch(&patch).unwrap();
        assert_eq!(price_reader.read(0).unwrap(), vec![9, 9]);

        // schema says fixed, disk says var-len
        let wrong = AttributeConfig::fixed("title", 3);
        assert!(AttributeReader::open(&dir, "segment_0/attribute/title", &wrong, 2, &base).is_err());
    }
}
