//! Verify command implementation.

use super::open_partition;
use seglake_core::dir::{attribute_path, segment_path, sub_segment_path};
use seglake_core::{
    load_latest, AttributeConfig, AttributeReader, CoreResult, OffsetConfig, PartitionView, Schema,
    SegmentInfo, Version, VersionId,
};
use seglake_storage::Directory;
use std::path::Path;
use tracing::{debug, warn};

/// Verification result.
#[derive(Debug)]
pub struct VerifyResult {
    /// Version that was checked.
    pub version: VersionId,
    /// Number of segments checked.
    pub segments_checked: usize,
    /// Number of attribute values read back.
    pub values_read: u64,
    /// List of errors found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn new(version: VersionId) -> Self {
        Self {
            version,
            segments_checked: 0,
            values_read: 0,
            errors: Vec::new(),
        }
    }

    /// True if nothing failed.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path, version: Option<u32>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying partition at {:?}", path);
    println!();

    let dir = open_partition(path)?;
    let result = verify(&dir, version.map(VersionId::new))?;

    println!("Version {}:", result.version);
    println!("  Segments checked: {}", result.segments_checked);
    println!("  Values read:      {}", result.values_read);
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in &result.errors {
            println!("    - {}", error);
        }
    }

    println!();
    if result.is_ok() {
        println!("✓ Partition verification passed");
        Ok(())
    } else {
        println!("✗ Partition verification failed");
        Err("Verification failed".into())
    }
}

/// Reads back every attribute value of `version`, or of the newest
/// version when `None`.
///
/// Errors in the version's segments are collected; a missing version or
/// schema fails the whole check.
pub fn verify(
    dir: &dyn Directory,
    version: Option<VersionId>,
) -> Result<VerifyResult, Box<dyn std::error::Error>> {
    let version = match version {
        Some(id) => Version::load(dir, id)?,
        None => load_latest(dir)?.ok_or("Partition has no committed version")?,
    };
    let schema = Schema::load(dir, version.schema_version())?;
    let mut result = VerifyResult::new(version.version_id());

    if let Err(e) = PartitionView::open(dir, version.clone(), Vec::new(), schema.has_sub_schema()) {
        result.errors.push(format!("view: {e}"));
    }

    for &segment in version.segments() {
        result.segments_checked += 1;
        let seg_path = segment_path(segment);
        let info = match SegmentInfo::load(dir, &seg_path) {
            Ok(info) => info,
            Err(e) => {
                warn!(%segment, error = %e, "unreadable segment info");
                result.errors.push(format!("{segment}: {e}"));
                continue;
            }
        };
        check_space(dir, &seg_path, &schema, info.doc_count, &mut result);
        if let Some(sub) = schema.sub_schema.as_deref() {
            check_space(
                dir,
                &sub_segment_path(&seg_path),
                sub,
                info.sub_doc_count,
                &mut result,
            );
        }
        debug!(%segment, docs = info.doc_count, "segment verified");
    }

    Ok(result)
}

fn check_space(
    dir: &dyn Directory,
    space_path: &str,
    schema: &Schema,
    doc_count: u32,
    result: &mut VerifyResult,
) {
    for attribute in &schema.attributes {
        let attr_path = attribute_path(space_path, &attribute.name);
        match read_all(dir, &attr_path, attribute, doc_count) {
            Ok(count) => result.values_read += count,
            Err(e) => {
                warn!(path = %attr_path, error = %e, "attribute check failed");
                result.errors.push(format!("{attr_path}: {e}"));
            }
        }
    }
}

fn read_all(
    dir: &dyn Directory,
    attr_path: &str,
    attribute: &AttributeConfig,
    doc_count: u32,
) -> CoreResult<u64> {
    let reader =
        AttributeReader::open(dir, attr_path, attribute, doc_count, &OffsetConfig::default())?;
    for doc in 0..doc_count {
        reader.read(doc)?;
    }
    Ok(u64::from(doc_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use seglake_core::Document;
    use seglake_testkit::scenarios::{
        catalog_doc, catalog_schema, catalog_schema_with_variants, numbered_docs,
    };
    use seglake_testkit::PartitionFixture;

    #[test]
    fn test_verify_healthy_partition() {
        let mut partition = PartitionFixture::memory(catalog_schema_with_variants());
        let doc = catalog_doc("shirt", 10)
            .with_sub_doc(Document::new().with_attribute("color", "red"))
            .with_sub_doc(Document::new().with_attribute("color", "blue"));
        let s0 = partition.build_segment(&[doc]).id;
        partition.commit(&[s0]);

        let result = verify(partition.dir(), None).unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.segments_checked, 1);
        // title + price, then two colors
        assert_eq!(result.values_read, 4);
    }

    #[test]
    fn test_verify_reports_missing_attribute() {
        let mut partition = PartitionFixture::memory(catalog_schema());
        let s0 = partition.build_segment(&numbered_docs("a", 0..2)).id;
        let s1 = partition.build_segment(&numbered_docs("b", 0..2)).id;
        partition.commit(&[s0, s1]);
        partition.remove_dir_all("segment_1/attribute/price").unwrap();

        let result = verify(partition.dir(), Some(VersionId::new(0))).unwrap();
        assert!(!result.is_ok());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("segment_1/attribute/price"));
        assert_eq!(result.values_read, 6);
    }

    #[test]
    fn test_verify_without_versions() {
        let partition = PartitionFixture::memory(catalog_schema());
        assert!(verify(partition.dir(), None).is_err());
    }
}
