//! # Engram CLI
//!
//! Command-line interface for the Engram file-activity engine.
//!
//! ## Commands
//!
//! - `engram monitor` - Watch NTFS volumes and record activity
//! - `engram transition` - Move aged activity from hot to warm tier
//! - `engram stats` - Show tier statistics and storage efficiency
//! - `engram query` - Query recorded activity
//! - `engram volumes` - List NTFS volumes and journal status
//! - `engram ingest` - Load a JSONL activity capture into the hot tier
//!
//! ## Example Usage
//!
//! ```bash
//! # Monitor all NTFS volumes (requires elevation)
//! engram monitor
//!
//! # Run one transition pass and show what moved
//! engram transition --run
//!
//! # Recent activity for the last 6 hours
//! engram query --hours 6
//! ```

mod app;
mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Engram - personal file-activity memory with tiered retention
#[derive(Parser)]
#[command(name = "engram")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch NTFS volumes and record file activity
    Monitor {
        /// Only monitor specific volumes (e.g., "C:" "D:")
        #[arg(short = 'V', long)]
        volumes: Vec<String>,

        /// Disable the scheduled hot-to-warm transitions
        #[arg(long)]
        no_transitions: bool,
    },

    /// Move aged activity from the hot tier to the warm tier
    Transition {
        /// Show transition statistics instead of running
        #[arg(long)]
        stats: bool,

        /// Age threshold override in hours
        #[arg(long)]
        age_hours: Option<u32>,

        /// Batch size override
        #[arg(long)]
        batch_size: Option<usize>,

        /// Maximum number of batches to process
        #[arg(long)]
        max_batches: Option<u32>,

        /// Write hot/warm JSONL snapshots for this run
        #[arg(long)]
        snapshots: bool,
    },

    /// Show hot-tier, warm-tier, and transition statistics
    Stats,

    /// Query recorded activity
    Query {
        /// Activities from the last N hours
        #[arg(long, default_value = "24")]
        hours: u32,

        /// Filter by entity id
        #[arg(long)]
        entity: Option<uuid::Uuid>,

        /// Filter by activity type (create, modify, delete, ...)
        #[arg(long = "type")]
        activity_type: Option<String>,

        /// Maximum number of results
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Result offset for paging
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Record a search hit against every returned activity
        #[arg(long)]
        mark_hit: bool,

        /// Output as JSON lines instead of a table
        #[arg(long)]
        json: bool,
    },

    /// List NTFS volumes and their journal status
    Volumes,

    /// Load a JSONL activity capture into the hot tier
    Ingest {
        /// Path to a .jsonl file of normalized events
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();

    let config = match &cli.config {
        Some(path) => engram_core::Config::load_from(path)?,
        None => engram_core::Config::load()?,
    };

    match cli.command {
        Commands::Monitor {
            volumes,
            no_transitions,
        } => commands::monitor::run(config, volumes, no_transitions),
        Commands::Transition {
            stats,
            age_hours,
            batch_size,
            max_batches,
            snapshots,
        } => commands::transition::run(config, stats, age_hours, batch_size, max_batches, snapshots),
        Commands::Stats => commands::stats::run(config),
        Commands::Query {
            hours,
            entity,
            activity_type,
            limit,
            offset,
            mark_hit,
            json,
        } => commands::query::run(config, hours, entity, activity_type, limit, offset, mark_hit, json),
        Commands::Volumes => commands::volumes::run(),
        Commands::Ingest { file } => commands::ingest::run(config, &file),
    }
}
