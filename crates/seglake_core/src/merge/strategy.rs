//! Per-kind record copy strategies.
//!
//! The merge lifecycle is the same for every columnar kind; a strategy
//! only says where the data of a segment lives and how to read and write
//! one record of it.

use crate::attribute::{AttributeReader, AttributeWriter};
use crate::config::{MergeConfig, OffsetConfig};
use crate::dir::{attribute_path, sub_segment_path, summary_path, SUMMARY_DIR};
use crate::error::CoreResult;
use crate::schema::AttributeConfig;
use seglake_storage::Directory;
use std::fmt;

/// Record copy step of one data kind.
pub trait MergeStrategy: Send + Sync + fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Data directory inside the segment at `segment_path`.
    fn data_path(&self, segment_path: &str) -> String;

    /// Whether several instances may fill one output concurrently.
    fn enable_multi_output_segment_parallel(&self) -> bool;

    /// Opens stored data read-only.
    ///
    /// # Errors
    ///
    /// Returns the open errors of [`AttributeReader::open`].
    fn open_source(
        &self,
        dir: &dyn Directory,
        data_path: &str,
        doc_count: u32,
    ) -> CoreResult<AttributeReader>;

    /// Creates an empty output writer.
    fn new_writer(&self) -> AttributeWriter;

    /// Whether the data kind carries update patches.
    fn supports_patches(&self) -> bool {
        false
    }
}

/// Copies one attribute.
#[derive(Debug, Clone)]
pub struct AttributeMergeStrategy {
    attribute: AttributeConfig,
    offset_config: OffsetConfig,
    parallel: bool,
    sub_partition: bool,
}

impl AttributeMergeStrategy {
    /// Strategy for `attribute` of the main doc space.
    #[must_use]
    pub fn new(attribute: AttributeConfig, offset_config: &OffsetConfig, merge: &MergeConfig) -> Self {
        Self {
            attribute,
            offset_config: offset_config.clone(),
            parallel: merge.enable_multi_output_segment_parallel,
            sub_partition: false,
        }
    }

    /// Targets the sub doc space instead.
    #[must_use]
    pub fn for_sub_partition(mut self) -> Self {
        self.sub_partition = true;
        self
    }
}

impl MergeStrategy for AttributeMergeStrategy {
    fn name(&self) -> &str {
        &self.attribute.name
    }

    fn data_path(&self, segment_path: &str) -> String {
        if self.sub_partition {
            attribute_path(&sub_segment_path(segment_path), &self.attribute.name)
        } else {
            attribute_path(segment_path, &self.attribute.name)
        }
    }

    fn enable_multi_output_segment_parallel(&self) -> bool {
        self.parallel
    }

    fn open_source(
        &self,
        dir: &dyn Directory,
        data_path: &str,
        doc_count: u32,
    ) -> CoreResult<AttributeReader> {
        let read_only = self.attribute.clone().updatable(false);
        AttributeReader::open(dir, data_path, &read_only, doc_count, &self.offset_config)
    }

    fn new_writer(&self) -> AttributeWriter {
        AttributeWriter::for_config(&self.attribute, &self.offset_config)
    }

    fn supports_patches(&self) -> bool {
        true
    }
}

/// Copies stored summaries.
#[derive(Debug, Clone)]
pub struct SummaryMergeStrategy {
    config: AttributeConfig,
    offset_config: OffsetConfig,
    parallel: bool,
}

impl SummaryMergeStrategy {
    /// Creates the strategy.
    #[must_use]
    pub fn new(offset_config: &OffsetConfig, merge: &MergeConfig) -> Self {
        Self {
            config: AttributeConfig::var_len(SUMMARY_DIR),
            offset_config: offset_config.clone(),
            parallel: merge.enable_multi_output_segment_parallel,
        }
    }
}

impl MergeStrategy for SummaryMergeStrategy {
    fn name(&self) -> &str {
        SUMMARY_DIR
    }

    fn data_path(&self, segment_path: &str) -> String {
        summary_path(segment_path)
    }

    fn enable_multi_output_segment_parallel(&self) -> bool {
        self.parallel
    }

    fn open_source(
        &self,
        dir: &dyn Directory,
        data_path: &str,
        doc_count: u32,
    ) -> CoreResult<AttributeReader> {
        AttributeReader::open(dir, data_path, &self.config, doc_count, &self.offset_config)
    }

    fn new_writer(&self) -> AttributeWriter {
        AttributeWriter::for_config(&self.config, &self.offset_config)
    }
}
