//! Clean-before command implementation.

use super::{open_partition, print_report, version_ids};
use seglake_core::{VersionCommitter, VersionId};
use std::path::Path;

/// Runs the clean-before command.
pub fn run(path: &Path, version: u32, reserve: &[u32]) -> Result<(), Box<dyn std::error::Error>> {
    let dir = open_partition(path)?;
    println!(
        "Cleaning versions up to {} at {:?}",
        VersionId::new(version),
        path
    );
    println!();

    let report = VersionCommitter::new(&dir)
        .clean_version_and_before(VersionId::new(version), &version_ids(reserve))?;
    print_report(&report)
}
