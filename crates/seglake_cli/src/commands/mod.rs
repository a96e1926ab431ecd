//! CLI command implementations.

pub mod clean;
pub mod clean_before;
pub mod inspect;
pub mod verify;

use seglake_core::{CleanReport, VersionId};
use seglake_storage::FsDirectory;
use std::path::Path;

/// Opens an existing partition root.
pub fn open_partition(path: &Path) -> Result<FsDirectory, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No partition found at {:?}", path).into());
    }
    Ok(FsDirectory::open(path, false)?)
}

/// Converts raw ids from the command line.
pub fn version_ids(raw: &[u32]) -> Vec<VersionId> {
    raw.iter().copied().map(VersionId::new).collect()
}

/// Prints a clean report; fails if some delete failed.
pub fn print_report(report: &CleanReport) -> Result<(), Box<dyn std::error::Error>> {
    println!("Clean Report:");
    println!("  Kept versions:      {}", join_ids(&report.kept_versions));
    println!("  Removed versions:   {}", join_ids(&report.removed_versions));
    println!("  Removed segments:   {}", join_ids(&report.removed_segments));
    if !report.removed_patch_segments.is_empty() {
        println!(
            "  Removed patches:    {}",
            report.removed_patch_segments.len()
        );
    }
    if !report.removed_schemas.is_empty() {
        println!("  Removed schemas:    {}", join_ids(&report.removed_schemas));
    }
    if report.tolerated_missing > 0 {
        println!("  Already removed:    {}", report.tolerated_missing);
    }

    if report.is_complete() {
        println!();
        println!("✓ Clean complete");
        Ok(())
    } else {
        println!();
        println!("Failures:");
        for failure in &report.failures {
            println!("  - {}: {}", failure.path, failure.error);
        }
        println!();
        println!("✗ Clean left {} paths behind", report.failures.len());
        Err("Clean incomplete".into())
    }
}

fn join_ids<T: std::fmt::Display>(ids: &[T]) -> String {
    if ids.is_empty() {
        return "-".to_string();
    }
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
