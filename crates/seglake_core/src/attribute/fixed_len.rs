//! Fixed-width attribute storage: `doc_count * width` bytes, no offsets.

use super::AttributeMeta;
use crate::dir::DATA_FILE;
use crate::error::{CoreError, CoreResult};
use crate::types::DocId;
use parking_lot::RwLock;
use seglake_storage::path::join;
use seglake_storage::Directory;
use std::sync::Arc;

/// Accumulates fixed-width values of a building segment.
#[derive(Debug, Clone)]
pub struct FixedLenAttributeWriter {
    width: u32,
    updatable: bool,
    data: Vec<u8>,
}

impl FixedLenAttributeWriter {
    /// Creates an empty writer for `width`-byte values.
    #[must_use]
    pub fn new(width: u32, updatable: bool) -> Self {
        Self {
            width,
            updatable,
            data: Vec::new(),
        }
    }

    /// Appends the value of the next doc and returns its local id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the value isn't exactly `width` bytes.
    pub fn add_value(&mut self, value: &[u8]) -> CoreResult<DocId> {
        if value.len() != self.width as usize {
            return Err(CoreError::invalid_argument(format!(
                "value of {} bytes for a {}-byte attribute",
                value.len(),
                self.width
            )));
        }
        let doc_id = self.doc_count();
        self.data.extend_from_slice(value);
        Ok(doc_id)
    }

    /// Number of values written.
    #[must_use]
    pub fn doc_count(&self) -> u32 {
        self.data.len().checked_div(self.width as usize).unwrap_or(0) as u32
    }

    /// Bytes held in memory.
    #[must_use]
    pub fn memory_use(&self) -> usize {
        self.data.capacity()
    }

    /// Writes `data` and `attribute.meta` under `attr_path`.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn dump(&self, dir: &dyn Directory, attr_path: &str) -> CoreResult<AttributeMeta> {
        dir.write(&join(attr_path, DATA_FILE), &self.data)?;
        let meta = AttributeMeta {
            compress: false,
            wide: false,
            updatable: self.updatable,
            doc_count: self.doc_count(),
            fixed_width: Some(self.width),
        };
        meta.store(dir, attr_path)?;
        Ok(meta)
    }
}

/// Reader of one built fixed-width attribute.
///
/// Updates overwrite values in place under a lock shared with sessions.
#[derive(Debug, Clone)]
pub struct FixedLenAttributeReader {
    width: u32,
    doc_count: u32,
    updatable: bool,
    data: Arc<RwLock<Vec<u8>>>,
}

impl FixedLenAttributeReader {
    /// Opens the attribute at `attr_path`.
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` if the meta isn't fixed-width or the blob
    /// size disagrees with `doc_count`.
    pub fn open(
        dir: &dyn Directory,
        attr_path: &str,
        doc_count: u32,
        updatable: bool,
    ) -> CoreResult<Self> {
        let meta = AttributeMeta::load(dir, attr_path)?;
        meta.expect_doc_count(doc_count)?;
        let width = meta.fixed_width.ok_or_else(|| {
            CoreError::corrupt_format(format!("{attr_path} holds a var-len attribute"))
        })?;
        if updatable && !meta.updatable {
            return Err(CoreError::invalid_argument(format!(
                "attribute at {attr_path} was not built as updatable"
            )));
        }
        let data = dir.read(&join(attr_path, DATA_FILE))?;
        let expected = doc_count as usize * width as usize;
        if data.len() != expected {
            return Err(CoreError::corrupt_format(format!(
                "fixed attribute blob has {} bytes, expected {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            doc_count,
            updatable,
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// Number of documents.
    #[must_use]
    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    /// Value width in bytes.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    fn range(&self, doc_id: DocId) -> CoreResult<std::ops::Range<usize>> {
        if doc_id >= self.doc_count {
            return Err(CoreError::invalid_argument(format!(
                "doc id {doc_id} out of range for {} docs",
                self.doc_count
            )));
        }
        let start = doc_id as usize * self.width as usize;
        Ok(start..start + self.width as usize)
    }

    /// Reads the value of `doc_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an out-of-range id.
    pub fn read(&self, doc_id: DocId) -> CoreResult<Vec<u8>> {
        let range = self.range(doc_id)?;
        Ok(self.data.read()[range].to_vec())
    }

    /// Overwrites the value of `doc_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a read-only attribute, an out-of-range
    /// id or a value of the wrong width.
    pub fn update_field(&mut self, doc_id: DocId, value: &[u8]) -> CoreResult<()> {
        if !self.updatable {
            return Err(CoreError::invalid_argument("attribute is not updatable"));
        }
        if value.len() != self.width as usize {
            return Err(CoreError::invalid_argument(format!(
                "value of {} bytes for a {}-byte attribute",
                value.len(),
                self.width
            )));
        }
        let range = self.range(doc_id)?;
        self.data.write()[range].copy_from_slice(value);
        Ok(())
    }

    /// Returns a read handle sharing this attribute's data.
    #[must_use]
    pub fn session_reader(&self) -> Self {
        Self {
            updatable: false,
            ..self.clone()
        }
    }

    /// Writes the blob back.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn persist(&self, dir: &dyn Directory, attr_path: &str) -> CoreResult<()> {
        dir.write(&join(attr_path, DATA_FILE), &self.data.read())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seglake_storage::InMemoryDirectory;

    const ATTR: &str = "segment_0/attribute/price";

    fn dump(dir: &InMemoryDirectory, updatable: bool) {
        let mut writer = FixedLenAttributeWriter::new(4, updatable);
        for price in [10u32, 20, 30] {
            writer.add_value(&price.to_le_bytes()).unwrap();
        }
        assert!(writer.add_value(b"toolong").is_err());
        writer.dump(dir, ATTR).unwrap();
    }

    #[test]
    fn dump_and_read() {
        let dir = InMemoryDirectory::new();
        dump(&dir, false);
        let reader = FixedLenAttributeReader::open(&dir, ATTR, 3, false).unwrap();
        assert_eq!(reader.read(1).unwrap(), 20u32.to_le_bytes());
        assert!(reader.read(3).is_err());
        assert!(FixedLenAttributeReader::open(&dir, ATTR, 4, false).is_err());
    }

    #[test]
    fn update_in_place_is_shared() {
        let dir = InMemoryDirectory::new();
        dump(&dir, true);
        let mut reader = FixedLenAttributeReader::open(&dir, ATTR, 3, true).unwrap();
        let mut session = reader.session_reader();

        reader.update_field(2, &99u32.to_le_bytes()).unwrap();
        assert_eq!(session.read(2).unwrap(), 99u32.to_le_bytes());
        assert!(session.update_field(0, &1u32.to_le_bytes()).is_err());
        assert!(reader.update_field(0, b"xx").is_err());

        reader.persist(&dir, ATTR).unwrap();
        let reopened = FixedLenAttributeReader::open(&dir, ATTR, 3, false).unwrap();
        assert_eq!(reopened.read(2).unwrap(), 99u32.to_le_bytes());
    }

    #[test]
    fn read_only_open_of_updatable_needs_flag() {
        let dir = InMemoryDirectory::new();
        dump(&dir, false);
        assert!(FixedLenAttributeReader::open(&dir, ATTR, 3, true).is_err());
    }
}
