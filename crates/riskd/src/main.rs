//! Backup Risk Runner - one batch analytics run
//!
//! Loads config, opens the record store, runs every producer for every
//! entity in the history directory and synthesizes risk for every job.

mod cli;
mod provider;

use anyhow::{Context, Result};
use backup_risk::{FallbackProvider, MetricStore, Pipeline, RiskConfig, RunSummary};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::cli::Cli;
use crate::provider::JsonDirProvider;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let run_id = Uuid::new_v4();
    info!("Backup Risk v{} starting run {}", env!("CARGO_PKG_VERSION"), run_id);

    let config = match &cli.config {
        Some(path) => RiskConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RiskConfig::load(),
    };

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.store.path));
    let store = MetricStore::open(&db_path)
        .with_context(|| format!("Failed to open record store {}", db_path.display()))?;

    let as_of = cli.as_of.unwrap_or_else(Utc::now);
    let mut pipeline = Pipeline::new(&config, &store).context("Failed to build pipeline")?;

    let primary = JsonDirProvider::open(&cli.data_dir)
        .with_context(|| format!("Failed to read history from {}", cli.data_dir.display()))?;

    let summary = match &cli.fallback_dir {
        Some(dir) => {
            let secondary = JsonDirProvider::open(dir)
                .with_context(|| format!("Failed to read fallback history from {}", dir.display()))?;
            let provider = FallbackProvider::new(primary, secondary, config.quality.health.min_span_days);
            pipeline.run_all(&provider, as_of, cli.only)
        }
        None => pipeline.run_all(&primary, as_of, cli.only),
    }
    .context("Run failed")?;

    log_summary(run_id, &summary);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

fn log_summary(run_id: Uuid, summary: &RunSummary) {
    info!(
        "Run {} finished: {} entities, {} records written, {} skipped, {} failed",
        run_id, summary.entities, summary.records_written, summary.skipped, summary.failed
    );
    for record in &summary.risk_records {
        info!(
            "  {:<24} {:<8} tier {:<8} impact {:>5.1}  confidence {:.2}",
            record.entity,
            record.category.label(),
            record.tier.label(),
            record.business_impact,
            record.overall_confidence
        );
    }
}
