//! Variable-length attribute storage.
//!
//! Each value is written to the data blob as a `u32` little-endian length
//! followed by its bytes, and the offset table points at the length
//! prefix. A value can therefore be read from its offset alone, which lets
//! updates append the new value past the blob end and repoint the offset.

use super::AttributeMeta;
use crate::config::OffsetConfig;
use crate::dir::{DATA_FILE, OFFSET_FILE};
use crate::error::{CoreError, CoreResult};
use crate::offset::{
    needs_wide_offset, AttributeOffsetReader, CompressedOffsets, OffsetCodec, OffsetSessionReader,
    OffsetTable, PlainOffsets, UpdateOutcome,
};
use crate::types::DocId;
use parking_lot::RwLock;
use seglake_storage::path::join;
use seglake_storage::Directory;
use std::sync::Arc;

const LEN_PREFIX: usize = 4;

fn append_record(buf: &mut Vec<u8>, value: &[u8]) -> CoreResult<()> {
    let len = u32::try_from(value.len()).map_err(|_| {
        CoreError::invalid_argument(format!("value of {} bytes is too long", value.len()))
    })?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(value);
    Ok(())
}

fn decode_record(buf: &[u8], at: usize) -> CoreResult<Vec<u8>> {
    let header = buf
        .get(at..at + LEN_PREFIX)
        .ok_or_else(|| CoreError::corrupt_format(format!("value header at {at} out of bounds")))?;
    let mut len = [0u8; LEN_PREFIX];
    len.copy_from_slice(header);
    let len = u32::from_le_bytes(len) as usize;
    let start = at + LEN_PREFIX;
    buf.get(start..start + len)
        .map(<[u8]>::to_vec)
        .ok_or_else(|| CoreError::corrupt_format(format!("value at {at} runs past blob end")))
}

fn read_value(data: &[u8], extension: &RwLock<Vec<u8>>, offset: u64) -> CoreResult<Vec<u8>> {
    let offset = usize::try_from(offset)
        .map_err(|_| CoreError::corrupt_format(format!("offset {offset} out of range")))?;
    if offset < data.len() {
        decode_record(data, offset)
    } else {
        decode_record(&extension.read(), offset - data.len())
    }
}

fn check_doc(doc_id: DocId, doc_count: u32) -> CoreResult<()> {
    if doc_id >= doc_count {
        return Err(CoreError::invalid_argument(format!(
            "doc id {doc_id} out of range for {doc_count} docs"
        )));
    }
    Ok(())
}

/// Accumulates var-len values of a building segment.
#[derive(Debug, Clone)]
pub struct VarLenAttributeWriter {
    config: OffsetConfig,
    data: Vec<u8>,
    offsets: Vec<u64>,
}

impl VarLenAttributeWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new(config: OffsetConfig) -> Self {
        Self {
            config,
            data: Vec::new(),
            offsets: vec![0],
        }
    }

    /// Appends the value of the next doc and returns its local id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the value is longer than `u32::MAX`.
    pub fn add_value(&mut self, value: &[u8]) -> CoreResult<DocId> {
        let doc_id = self.doc_count();
        append_record(&mut self.data, value)?;
        self.offsets.push(self.data.len() as u64);
        Ok(doc_id)
    }

    /// Number of values written.
    #[must_use]
    pub fn doc_count(&self) -> u32 {
        (self.offsets.len() - 1) as u32
    }

    /// Bytes held in memory.
    #[must_use]
    pub fn memory_use(&self) -> usize {
        self.data.capacity() + self.offsets.capacity() * 8
    }

    /// Builds the offset table for the values written so far.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a bad slot size.
    pub fn build_offsets(&self) -> CoreResult<OffsetTable> {
        let wide = needs_wide_offset(self.data.len() as u64, self.config.offset_threshold);
        if self.config.compress {
            let shift = self.config.slot_shift().ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "slot item count {} is not a power of two",
                    self.config.slot_item_count
                ))
            })?;
            Ok(OffsetTable::Compressed(CompressedOffsets::from_offsets(
                &self.offsets,
                shift,
                0,
                wide,
            )?))
        } else {
            Ok(OffsetTable::Plain(PlainOffsets::from_offsets(
                &self.offsets,
                wide,
            )?))
        }
    }

    /// Writes `data`, `offset` and `attribute.meta` under `attr_path`.
    ///
    /// # Errors
    ///
    /// Returns storage errors, or the errors of [`Self::build_offsets`].
    pub fn dump(&self, dir: &dyn Directory, attr_path: &str) -> CoreResult<AttributeMeta> {
        let table = self.build_offsets()?;
        let format = table.format();
        dir.write(&join(attr_path, DATA_FILE), &self.data)?;
        dir.write(&join(attr_path, OFFSET_FILE), &table.encode())?;
        let meta = AttributeMeta {
            compress: format.compress,
            wide: format.wide,
            updatable: self.config.updatable,
            doc_count: self.doc_count(),
            fixed_width: None,
        };
        meta.store(dir, attr_path)?;
        Ok(meta)
    }
}

/// Reader of one built var-len attribute.
#[derive(Debug)]
pub struct VarLenAttributeReader {
    data: Arc<Vec<u8>>,
    extension: Arc<RwLock<Vec<u8>>>,
    offsets: AttributeOffsetReader,
}

impl VarLenAttributeReader {
    /// Opens the attribute at `attr_path`; `config.updatable` enables
    /// [`Self::update_field`].
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` if the meta describes a fixed attribute or
    /// the offsets don't cover the blob, and storage errors.
    pub fn open(
        dir: &dyn Directory,
        attr_path: &str,
        doc_count: u32,
        config: &OffsetConfig,
    ) -> CoreResult<Self> {
        let meta = AttributeMeta::load(dir, attr_path)?;
        if meta.fixed_width.is_some() {
            return Err(CoreError::corrupt_format(format!(
                "{attr_path} holds a fixed-width attribute"
            )));
        }
        let offsets =
            AttributeOffsetReader::open(dir, attr_path, doc_count, config.updatable, config)?;
        let data = dir.read(&join(attr_path, DATA_FILE))?;
        let end = offsets.get_offset(doc_count);
        if end > data.len() as u64 {
            return Err(CoreError::corrupt_format(format!(
                "offsets end at {end}, blob holds {} bytes",
                data.len()
            )));
        }
        Ok(Self {
            data: Arc::new(data),
            extension: Arc::new(RwLock::new(Vec::new())),
            offsets,
        })
    }

    /// Number of documents.
    #[must_use]
    pub fn doc_count(&self) -> u32 {
        self.offsets.doc_count()
    }

    /// Reads the value of `doc_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an out-of-range id and `CorruptFormat`
    /// if the stored record is damaged.
    pub fn read(&self, doc_id: DocId) -> CoreResult<Vec<u8>> {
        check_doc(doc_id, self.doc_count())?;
        read_value(&self.data, &self.extension, self.offsets.get_offset(doc_id))
    }

    /// Replaces the value of `doc_id`.
    ///
    /// The value is appended past the blob end and the doc's offset is
    /// repointed. On `CapacityExceeded` nothing changes and the caller has
    /// to rewrite the attribute.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an out-of-range id or a read-only
    /// attribute, and `CapacityExceeded` as above.
    pub fn update_field(&mut self, doc_id: DocId, value: &[u8]) -> CoreResult<UpdateOutcome> {
        check_doc(doc_id, self.doc_count())?;
        let (offset, rollback) = {
            let mut extension = self.extension.write();
            let rollback = extension.len();
            let offset = (self.data.len() + rollback) as u64;
            append_record(&mut extension, value)?;
            (offset, rollback)
        };
        match self.offsets.set_offset(doc_id, offset) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.extension.write().truncate(rollback);
                Err(e)
            }
        }
    }

    /// Returns a reader sharing this attribute's data.
    #[must_use]
    pub fn session_reader(&self) -> VarLenSessionReader {
        VarLenSessionReader {
            data: Arc::clone(&self.data),
            extension: Arc::clone(&self.extension),
            offsets: self.offsets.session_reader(),
        }
    }

    /// Writes the blob (with appended updates) and offsets back.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn persist(&self, dir: &dyn Directory, attr_path: &str) -> CoreResult<()> {
        let extension = self.extension.read();
        let mut blob = Vec::with_capacity(self.data.len() + extension.len());
        blob.extend_from_slice(&self.data);
        blob.extend_from_slice(&extension);
        dir.write(&join(attr_path, DATA_FILE), &blob)?;
        self.offsets.persist(dir, attr_path)
    }

    /// The offset reader.
    #[must_use]
    pub fn offsets(&self) -> &AttributeOffsetReader {
        &self.offsets
    }
}

/// Read-only handle on a var-len attribute for one query.
#[derive(Debug, Clone)]
pub struct VarLenSessionReader {
    data: Arc<Vec<u8>>,
    extension: Arc<RwLock<Vec<u8>>>,
    offsets: OffsetSessionReader,
}

impl VarLenSessionReader {
    /// Reads the value of `doc_id`.
    ///
    /// # Errors
    ///
    /// Same as [`VarLenAttributeReader::read`].
    pub fn read(&self, doc_id: DocId) -> CoreResult<Vec<u8>> {
        check_doc(doc_id, self.offsets.doc_count())?;
        read_value(&self.data, &self.extension, self.offsets.get_offset(doc_id))
    }
}
