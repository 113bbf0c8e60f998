//! CLI - Command-line argument parsing
//!
//! Keeps argument parsing separate from the run itself.

use backup_risk::ProducerKind;
use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;

/// Backup Risk batch runner
#[derive(Parser, Debug)]
#[command(name = "riskd")]
#[command(about = "Backup Risk - quality-gated risk scoring over backup history", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (defaults: /etc/backup-risk/config.toml, ./backup-risk.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Record store path (overrides store.path from config)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Directory of <entity>.json history files
    #[arg(long)]
    pub data_dir: PathBuf,

    /// Secondary history directory used when the primary fails or is too short
    #[arg(long)]
    pub fallback_dir: Option<PathBuf>,

    /// Analysis time, RFC 3339 (default: now)
    #[arg(long)]
    pub as_of: Option<DateTime<Utc>>,

    /// Run a single producer (health, capacity, efficiency, recovery); skips synthesis
    #[arg(long)]
    pub only: Option<ProducerKind>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}
