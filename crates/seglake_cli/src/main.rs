//! seglake CLI
//!
//! Command-line tools for seglake partition maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display versions, segments and schemas of a partition
//! - `verify` - Read back every segment of a version
//! - `clean` - Drop old versions and the segments only they reference
//! - `clean-before` - Drop every version up to a given one

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// seglake command-line partition tools.
#[derive(Parser)]
#[command(name = "seglake")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the partition root
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display versions, segments and schemas
    Inspect {
        /// Show the segments of every version, not only the newest
        #[arg(short, long)]
        all_versions: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Read back every attribute value of a version
    Verify {
        /// Version to verify (newest if omitted)
        #[arg(long)]
        version: Option<u32>,
    },

    /// Drop old versions and the segments only they reference
    Clean {
        /// Number of newest versions to keep
        #[arg(short, long)]
        keep: Option<usize>,

        /// Versions to keep regardless of age
        #[arg(short, long, value_delimiter = ',')]
        reserve: Vec<u32>,
    },

    /// Drop every version up to and including VERSION
    CleanBefore {
        /// Newest version to drop
        version: u32,

        /// Versions to keep regardless of age
        #[arg(short, long, value_delimiter = ',')]
        reserve: Vec<u32>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            all_versions,
            format,
        } => {
            let path = cli.path.ok_or("Partition path required for inspect")?;
            commands::inspect::run(&path, all_versions, &format)?;
        }
        Commands::Verify { version } => {
            let path = cli.path.ok_or("Partition path required for verify")?;
            commands::verify::run(&path, version)?;
        }
        Commands::Clean { keep, reserve } => {
            let path = cli.path.ok_or("Partition path required for clean")?;
            commands::clean::run(&path, keep, &reserve)?;
        }
        Commands::CleanBefore { version, reserve } => {
            let path = cli.path.ok_or("Partition path required for clean-before")?;
            commands::clean_before::run(&path, version, &reserve)?;
        }
        Commands::Version => {
            println!("seglake CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("seglake core v{}", seglake_core::VERSION);
        }
    }

    Ok(())
}
