//! Partition directory layout.
//!
//! Every file the engine touches lives under one partition root:
//!
//! ```text
//! <root>/
//! ├─ version.<id>                   # committed versions (JSON)
//! ├─ schema.json                    # schema id 0
//! ├─ schema.json.<id>               # later schema ids
//! ├─ index_summary                  # bookkeeping, rewritten by clean
//! ├─ segment_<id>/
//! │  ├─ segment_info
//! │  ├─ attribute/<field>/{data, offset, offset.ext, attribute.meta, patch/}
//! │  ├─ summary/{data, offset, attribute.meta}
//! │  └─ sub_segment/                # same layout, sub doc space
//! └─ patch_index_<schema>/segment_<id>/
//! ```
//!
//! Names are parsed strictly: anything that doesn't match a pattern is
//! ignored by listings rather than treated as an error.

use crate::types::{SchemaVersionId, SegmentId, VersionId};
use seglake_storage::path::join;

/// Prefix of version files.
pub const VERSION_FILE_PREFIX: &str = "version.";
/// Prefix of segment directories.
pub const SEGMENT_DIR_PREFIX: &str = "segment_";
/// Prefix of patch index directories.
pub const PATCH_INDEX_DIR_PREFIX: &str = "patch_index_";
/// Schema file for schema id 0.
pub const SCHEMA_FILE: &str = "schema.json";
/// Index summary file.
pub const INDEX_SUMMARY_FILE: &str = "index_summary";
/// Segment info file inside a segment directory.
pub const SEGMENT_INFO_FILE: &str = "segment_info";
/// Attribute root inside a segment directory.
pub const ATTRIBUTE_DIR: &str = "attribute";
/// Summary directory inside a segment directory.
pub const SUMMARY_DIR: &str = "summary";
/// Sub-partition directory inside a segment directory.
pub const SUB_SEGMENT_DIR: &str = "sub_segment";
/// Value blob of an attribute.
pub const DATA_FILE: &str = "data";
/// Offset table of a variable-length attribute.
pub const OFFSET_FILE: &str = "offset";
/// Slice (growth) area of a compressed offset table.
pub const OFFSET_SLICE_FILE: &str = "offset.ext";
/// Stored format flags of an attribute.
pub const ATTRIBUTE_META_FILE: &str = "attribute.meta";
/// Patch directory inside an attribute directory.
pub const PATCH_DIR: &str = "patch";
/// Marker written once parallel merge outputs are reconciled.
pub const MERGE_DONE_FILE: &str = "merge.done";
/// Metadata of one parallel merge partial.
pub const PARTIAL_META_FILE: &str = "partial.meta";

fn parse_suffix(name: &str, prefix: &str) -> Option<u32> {
    let digits = name.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// File name of a version.
#[must_use]
pub fn version_file_name(id: VersionId) -> String {
    format!("{VERSION_FILE_PREFIX}{}", id.as_u32())
}

/// Parses `version.<digits>`.
#[must_use]
pub fn parse_version_file_name(name: &str) -> Option<VersionId> {
    parse_suffix(name, VERSION_FILE_PREFIX).map(VersionId::new)
}

/// Directory name of a segment.
#[must_use]
pub fn segment_dir_name(id: SegmentId) -> String {
    format!("{SEGMENT_DIR_PREFIX}{}", id.as_u32())
}

/// Parses `segment_<digits>`.
#[must_use]
pub fn parse_segment_dir_name(name: &str) -> Option<SegmentId> {
    parse_suffix(name, SEGMENT_DIR_PREFIX).map(SegmentId::new)
}

/// File name of a schema.
#[must_use]
pub fn schema_file_name(id: SchemaVersionId) -> String {
    if id.as_u32() == 0 {
        SCHEMA_FILE.to_string()
    } else {
        format!("{SCHEMA_FILE}.{}", id.as_u32())
    }
}

/// Parses `schema.json` or `schema.json.<digits>`.
#[must_use]
pub fn parse_schema_file_name(name: &str) -> Option<SchemaVersionId> {
    if name == SCHEMA_FILE {
        return Some(SchemaVersionId::new(0));
    }
    parse_suffix(name, "schema.json.").map(SchemaVersionId::new)
}

/// Directory name of the patch index for a schema.
#[must_use]
pub fn patch_index_dir_name(id: SchemaVersionId) -> String {
    format!("{PATCH_INDEX_DIR_PREFIX}{}", id.as_u32())
}

/// Parses `patch_index_<digits>`.
#[must_use]
pub fn parse_patch_index_dir_name(name: &str) -> Option<SchemaVersionId> {
    parse_suffix(name, PATCH_INDEX_DIR_PREFIX).map(SchemaVersionId::new)
}

/// Path of a segment directory relative to the partition root.
#[must_use]
pub fn segment_path(id: SegmentId) -> String {
    segment_dir_name(id)
}

/// Path of the sub-partition part of a segment.
#[must_use]
pub fn sub_segment_path(segment_path: &str) -> String {
    join(segment_path, SUB_SEGMENT_DIR)
}

/// Path of one attribute inside a segment.
#[must_use]
pub fn attribute_path(segment_path: &str, field: &str) -> String {
    join(&join(segment_path, ATTRIBUTE_DIR), field)
}

/// Path of the summary store inside a segment.
#[must_use]
pub fn summary_path(segment_path: &str) -> String {
    join(segment_path, SUMMARY_DIR)
}

/// File name of a patch written by `source` against `target`.
#[must_use]
pub fn patch_file_name(source: SegmentId, target: SegmentId) -> String {
    format!("{}_{}.patch", source.as_u32(), target.as_u32())
}

/// Parses `<source>_<target>.patch`.
#[must_use]
pub fn parse_patch_file_name(name: &str) -> Option<(SegmentId, SegmentId)> {
    let stem = name.strip_suffix(".patch")?;
    let (source, target) = stem.split_once('_')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(source) || !digits(target) {
        return None;
    }
    Some((
        SegmentId::new(source.parse().ok()?),
        SegmentId::new(target.parse().ok()?),
    ))
}

/// Directory name of one parallel merge partial.
#[must_use]
pub fn parallel_dir_name(instance: u32, total: u32) -> String {
    format!("parallel_{instance}_{total}")
}

/// Parses `parallel_<instance>_<total>`.
#[must_use]
pub fn parse_parallel_dir_name(name: &str) -> Option<(u32, u32)> {
    let rest = name.strip_prefix("parallel_")?;
    let (instance, total) = rest.split_once('_')?;
    Some((instance.parse().ok()?, total.parse().ok()?))
}
