//! Clean command implementation.

use super::{open_partition, print_report, version_ids};
use seglake_core::{RetentionConfig, VersionCommitter};
use std::path::Path;
use tracing::info;

/// Runs the clean command.
///
/// Without `keep`, the default retention count applies.
pub fn run(
    path: &Path,
    keep: Option<usize>,
    reserve: &[u32],
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = open_partition(path)?;
    let mut config = RetentionConfig::new();
    if let Some(keep) = keep {
        config = config.keep_version_count(keep);
    }
    for id in version_ids(reserve) {
        config = config.reserve(id);
    }

    println!("Cleaning partition at {:?}", path);
    println!(
        "  Keeping {} newest versions, reserved: {:?}",
        config.keep_version_count, reserve
    );
    println!();
    info!(path = %path.display(), keep = config.keep_version_count, "clean requested");

    let report = VersionCommitter::new(&dir).clean_with(&config)?;
    print_report(&report)
}
