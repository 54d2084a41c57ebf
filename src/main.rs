//! # Tracker Harness CLI (`trk`)
//!
//! The `trk` binary drives ingestion passes and inspects the cache.
//!
//! ## Usage
//!
//! ```bash
//! trk --config ./config/trk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trk sync` | Ingest new or modified sources and merge them into the cache |
//! | `trk status` | Show per-category cache freshness |
//! | `trk inventory` | List archives and data files under the root |
//! | `trk ibi` | Print the inter-beat-interval series derived from cached heart rate |
//!
//! Diagnostics go to stderr through `tracing`; set `RUST_LOG=tracker_harness=debug`
//! to see every dispatched source.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tracker_harness::config;
use tracker_harness::ingest::{CacheManager, TraceSummary};
use tracker_harness::inventory;
use tracker_harness::models::Category;
use tracker_harness::progress::{format_number, ProgressMode};

/// Tracker Harness CLI: incremental ingestion of fitness-tracker exports.
#[derive(Parser)]
#[command(
    name = "trk",
    about = "Tracker Harness — incremental ingestion of fitness-tracker exports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trk.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one ingestion pass.
    ///
    /// Parses every source that is new or modified since it was last
    /// ingested, merges the records into the cached datasets, and prints
    /// the resulting dataset sizes.
    Sync {
        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print the pass's progress trace as JSON lines on stdout.
        #[arg(long)]
        trace: bool,
    },

    /// Show per-category cache status.
    Status,

    /// List archives and data files under the root.
    Inventory,

    /// Print the derived inter-beat-interval series from the cache.
    Ibi {
        /// Maximum number of points to print.
        #[arg(long)]
        limit: Option<usize>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let mut manager = CacheManager::from_config(&cfg)?;

    match cli.command {
        Commands::Sync { progress, trace } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let reporter = mode.reporter();
            let output = manager.run_full_pass(Some(reporter.as_ref()));

            println!("sync {}", manager.root().display());
            for category in Category::ALL {
                println!(
                    "  {:<11} {} records",
                    format!("{}:", category),
                    format_number(output.count(category) as u64)
                );
            }
            println!("  {:<11} {} points", "ibi:", format_number(output.ibi.len() as u64));

            let summary = TraceSummary::from_trace(manager.progress_trace());
            println!(
                "  sources: {} visited, {} skipped, {} ingested, {} unmatched, {} failed",
                summary.visited, summary.skipped, summary.ingested, summary.unmatched, summary.failed
            );
            if trace {
                for record in manager.progress_trace() {
                    println!("{}", serde_json::to_string(&record.to_json())?);
                }
            }
            println!("ok");
        }
        Commands::Status => {
            println!("cache {}", manager.store().dir().display());
            inventory::print_status(&manager.cache_status());
        }
        Commands::Inventory => {
            inventory::print_inventory(&manager.file_inventory());
        }
        Commands::Ibi { limit } => {
            let cached = manager.load_cached();
            let points = cached.ibi.iter().take(limit.unwrap_or(usize::MAX));
            println!("dateTime,ibi_ms");
            for point in points {
                println!(
                    "{},{:.1}",
                    point.instant.format("%Y-%m-%dT%H:%M:%S"),
                    point.ibi_ms
                );
            }
        }
    }

    Ok(())
}
