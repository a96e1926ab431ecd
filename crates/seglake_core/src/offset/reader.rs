//! Per-attribute offset reader.

use super::{OffsetCodec, OffsetLookupError, OffsetTable, UpdateOutcome};
use crate::attribute::AttributeMeta;
use crate::config::OffsetConfig;
use crate::dir::{OFFSET_FILE, OFFSET_SLICE_FILE};
use crate::error::{CoreError, CoreResult};
use crate::stats::OffsetMetrics;
use crate::types::DocId;
use seglake_storage::path::join;
use seglake_storage::Directory;
use std::sync::Arc;
use tracing::{debug, warn};

/// Owner of one segment attribute's offset table.
///
/// The owner is the only writer. Concurrent reads go through
/// [`OffsetSessionReader`]s handed out by [`Self::session_reader`].
#[derive(Debug)]
pub struct AttributeOffsetReader {
    table: Arc<OffsetTable>,
    updatable: bool,
    metrics: Arc<OffsetMetrics>,
}

impl AttributeOffsetReader {
    /// Opens the offset table of the attribute at `attr_path`.
    ///
    /// The encoding comes from `attribute.meta`. A persisted slice area is
    /// always loaded for compressed tables; when none exists and `updatable`
    /// is set, a fresh one of `config.slice_capacity_bytes` is allocated.
    ///
    /// # Errors
    ///
    /// Returns `CorruptFormat` if the meta and the offset file disagree
    /// with `doc_count`, and storage errors for missing files.
    pub fn open(
        dir: &dyn Directory,
        attr_path: &str,
        doc_count: u32,
        updatable: bool,
        config: &OffsetConfig,
    ) -> CoreResult<Self> {
        let meta = AttributeMeta::load(dir, attr_path)?;
        meta.expect_doc_count(doc_count)?;
        if updatable && !meta.updatable {
            return Err(CoreError::invalid_argument(format!(
                "attribute at {attr_path} was not built as updatable"
            )));
        }

        let bytes = dir.read(&join(attr_path, OFFSET_FILE))?;
        let slice_path = join(attr_path, OFFSET_SLICE_FILE);
        let slice = if meta.compress && dir.exists(&slice_path)? {
            Some(dir.read(&slice_path)?)
        } else {
            None
        };
        let slice_capacity = if updatable {
            config.slice_capacity_bytes
        } else {
            0
        };

        let table = OffsetTable::init(
            meta.offset_format(),
            doc_count,
            &bytes,
            slice.as_deref(),
            slice_capacity,
        )?;
        debug!(
            path = %attr_path,
            doc_count,
            compress = meta.compress,
            wide = meta.wide,
            "opened offset table"
        );
        Ok(Self::from_table(table, updatable))
    }

    /// Wraps an in-memory table.
    #[must_use]
    pub fn from_table(table: OffsetTable, updatable: bool) -> Self {
        let metrics = Arc::new(OffsetMetrics::new());
        metrics.set_memory_use(table.memory_use() as u64);
        if let OffsetTable::Compressed(t) = &table {
            metrics.set_slice_bytes_used((t.slice().used_words() * 8) as u64);
        }
        Self {
            table: Arc::new(table),
            updatable,
            metrics,
        }
    }

    /// Returns the offset of `doc_id`. See [`OffsetCodec::get_offset`].
    #[inline]
    pub fn get_offset(&self, doc_id: DocId) -> u64 {
        self.table.get_offset(doc_id)
    }

    /// Looks up several ids, reporting failures per id.
    pub fn get_offsets(&self, doc_ids: &[DocId]) -> Vec<Result<u64, OffsetLookupError>> {
        self.table.get_offsets(doc_ids)
    }

    /// Overwrites the offset of `doc_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the attribute isn't updatable, and
    /// `CapacityExceeded` when the caller must rewrite the attribute.
    pub fn set_offset(&mut self, doc_id: DocId, offset: u64) -> CoreResult<UpdateOutcome> {
        if !self.updatable {
            return Err(CoreError::invalid_argument(
                "offset table is not updatable",
            ));
        }
        match self.table.set_offset(doc_id, offset) {
            Ok(outcome) => {
                if let UpdateOutcome::Expanded { slice_bytes, .. } = outcome {
                    debug!(doc_id, slice_bytes, "offset slot expanded");
                }
                self.metrics.record_update(outcome);
                Ok(outcome)
            }
            Err(e) => {
                if matches!(e, CoreError::CapacityExceeded { .. }) {
                    warn!(doc_id, error = %e, "offset update needs a rewrite");
                    self.metrics.record_failed_update();
                }
                Err(e)
            }
        }
    }

    /// Returns a cheap reader sharing this table.
    #[must_use]
    pub fn session_reader(&self) -> OffsetSessionReader {
        OffsetSessionReader {
            table: Arc::clone(&self.table),
        }
    }

    /// Writes the offset table (and slice area) back to `attr_path`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if a write fails.
    pub fn persist(&self, dir: &dyn Directory, attr_path: &str) -> CoreResult<()> {
        dir.write(&join(attr_path, OFFSET_FILE), &self.table.encode())?;
        if let Some(slice) = self.table.encode_slice() {
            dir.write(&join(attr_path, OFFSET_SLICE_FILE), &slice)?;
        }
        Ok(())
    }

    /// Number of documents covered.
    pub fn doc_count(&self) -> u32 {
        self.table.doc_count()
    }

    /// True if offsets are 64 bits wide.
    pub fn is_wide_offset(&self) -> bool {
        self.table.is_wide_offset()
    }

    /// True if in-place updates are enabled.
    pub fn is_updatable(&self) -> bool {
        self.updatable
    }

    /// The underlying table.
    pub fn table(&self) -> &OffsetTable {
        &self.table
    }

    /// Update and memory metrics.
    pub fn metrics(&self) -> &OffsetMetrics {
        &self.metrics
    }
}

/// Read-only view of an offset table for one query's lifetime.
///
/// Shares the table with its owner. Reads observe either the old or the
/// new value of an entry being updated, never freed memory.
#[derive(Debug, Clone)]
pub struct OffsetSessionReader {
    table: Arc<OffsetTable>,
}

impl OffsetSessionReader {
    /// Returns the offset of `doc_id`. See [`OffsetCodec::get_offset`].
    #[inline]
    pub fn get_offset(&self, doc_id: DocId) -> u64 {
        self.table.get_offset(doc_id)
    }

    /// Looks up several ids, reporting failures per id.
    pub fn get_offsets(&self, doc_ids: &[DocId]) -> Vec<Result<u64, OffsetLookupError>> {
        self.table.get_offsets(doc_ids)
    }

    /// Number of documents covered.
    pub fn doc_count(&self) -> u32 {
        self.table.doc_count()
    }

    /// True if offsets are 64 bits wide.
    pub fn is_wide_offset(&self) -> bool {
        self.table.is_wide_offset()
    }
}
