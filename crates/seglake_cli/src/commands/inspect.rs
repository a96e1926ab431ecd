//! Inspect command implementation.

use super::open_partition;
use seglake_core::dir::{parse_schema_file_name, parse_segment_dir_name, segment_path};
use seglake_core::{list_versions, SegmentInfo, Version};
use seglake_storage::{path, Directory};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

/// Partition inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Partition path.
    pub path: String,
    /// Committed versions, oldest first.
    pub versions: Vec<VersionStats>,
    /// Schema ids on disk.
    pub schemas: Vec<u32>,
    /// Segment directories on disk.
    pub segment_count: usize,
    /// Segment directories no version references (e.g. an uncommitted
    /// merge output).
    pub unreferenced_segments: Vec<u32>,
    /// Total size in bytes.
    pub total_size: u64,
}

/// Statistics for a single version.
#[derive(Debug, Serialize)]
pub struct VersionStats {
    /// Version id.
    pub id: u32,
    /// Schema id the version was built with.
    pub schema_version: u32,
    /// Commit timestamp, microseconds since the epoch.
    pub timestamp: i64,
    /// Documents across every segment.
    pub doc_count: u64,
    /// Segment details (newest version only, unless all were requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segments: Option<Vec<SegmentStats>>,
}

/// Statistics for a single segment.
#[derive(Debug, Serialize)]
pub struct SegmentStats {
    /// Segment id.
    pub id: u32,
    /// Main documents.
    pub doc_count: u32,
    /// Sub documents.
    pub sub_doc_count: u32,
    /// Size on disk in bytes.
    pub size: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, all_versions: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let dir = open_partition(path)?;
    let result = inspect(&dir, path, all_versions)?;

    // Output
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

/// Collects the statistics of the partition at `dir`.
pub fn inspect(
    dir: &dyn Directory,
    path: &Path,
    all_versions: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let ids = list_versions(dir)?;
    let mut referenced = BTreeSet::new();
    let mut versions = Vec::with_capacity(ids.len());
    for (i, &id) in ids.iter().enumerate() {
        let version = Version::load(dir, id)?;
        referenced.extend(version.segments().iter().map(|s| s.as_u32()));
        let segments = version
            .segments()
            .iter()
            .map(|&segment| {
                let seg_path = segment_path(segment);
                let info = SegmentInfo::load(dir, &seg_path)?;
                Ok(SegmentStats {
                    id: segment.as_u32(),
                    doc_count: info.doc_count,
                    sub_doc_count: info.sub_doc_count,
                    size: tree_size(dir, &seg_path)?,
                })
            })
            .collect::<Result<Vec<_>, Box<dyn std::error::Error>>>()?;
        let show = all_versions || i + 1 == ids.len();
        versions.push(VersionStats {
            id: id.as_u32(),
            schema_version: version.schema_version().as_u32(),
            timestamp: version.timestamp(),
            doc_count: segments.iter().map(|s| u64::from(s.doc_count)).sum(),
            segments: show.then_some(segments),
        });
    }

    let mut schemas = Vec::new();
    let mut segment_dirs = Vec::new();
    for name in dir.list("")? {
        if let Some(id) = parse_segment_dir_name(&name) {
            segment_dirs.push(id.as_u32());
        } else if let Some(id) = parse_schema_file_name(&name) {
            schemas.push(id.as_u32());
        }
    }
    let unreferenced_segments = segment_dirs
        .iter()
        .copied()
        .filter(|id| !referenced.contains(id))
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        versions,
        schemas,
        segment_count: segment_dirs.len(),
        unreferenced_segments,
        total_size: tree_size(dir, "")?,
    })
}

fn tree_size(dir: &dyn Directory, root: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let mut total = 0;
    for name in dir.list(root)? {
        let child = path::join(root, &name);
        total += if dir.is_dir(&child)? {
            tree_size(dir, &child)?
        } else {
            dir.file_len(&child)?
        };
    }
    Ok(total)
}

fn print_text_output(result: &InspectResult) {
    println!("seglake Partition Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!("Total size: {}", format_size(result.total_size));
    println!();
    println!("Versions: {}", result.versions.len());
    for version in &result.versions {
        println!(
            "  [ver:{}] schema {} | {} docs | committed at {}",
            version.id, version.schema_version, version.doc_count, version.timestamp
        );
        if let Some(segments) = &version.segments {
            for segment in segments {
                println!(
                    "    seg:{:<6} {:>10} docs {:>8} sub docs {:>12}",
                    segment.id,
                    segment.doc_count,
                    segment.sub_doc_count,
                    format_size(segment.size)
                );
            }
        }
    }
    println!();
    println!("Segments on disk: {}", result.segment_count);
    if !result.unreferenced_segments.is_empty() {
        println!("  Unreferenced:   {:?}", result.unreferenced_segments);
    }
    println!("Schemas: {:?}", result.schemas);
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seglake_testkit::scenarios::{catalog_schema, numbered_docs};
    use seglake_testkit::PartitionFixture;

    #[test]
    fn test_inspect_reports_versions_and_orphans() {
        let mut partition = PartitionFixture::memory(catalog_schema());
        let s0 = partition.build_segment(&numbered_docs("a", 0..3)).id;
        let s1 = partition.build_segment(&numbered_docs("b", 0..2)).id;
        partition.commit(&[s0]);
        partition.commit(&[s0, s1]);
        // built but never committed
        partition.build_segment(&numbered_docs("c", 0..1));

        let result = inspect(partition.dir(), Path::new("mem"), false).unwrap();
        assert_eq!(result.versions.len(), 2);
        assert!(result.versions[0].segments.is_none());
        assert_eq!(result.versions[0].doc_count, 3);
        let newest = result.versions[1].segments.as_ref().unwrap();
        assert_eq!(newest.iter().map(|s| s.doc_count).collect::<Vec<_>>(), vec![3, 2]);
        assert!(newest.iter().all(|s| s.size > 0));
        assert_eq!(result.segment_count, 3);
        assert_eq!(result.unreferenced_segments, vec![2]);
        assert_eq!(result.schemas, vec![0]);
        assert!(result.total_size > 0);
    }

    #[test]
    fn test_inspect_json() {
        let mut partition = PartitionFixture::file(catalog_schema());
        let s0 = partition.build_segment(&numbered_docs("a", 0..1)).id;
        partition.commit(&[s0]);
        run(&partition.path().unwrap(), true, "json").unwrap();
    }
}
