//! cnpjlake: batch ingestion of the CNPJ open-data dump.
//!
//! Extracts the staging archives, curates them into Parquet, stacks and
//! joins the datasets, and writes the result as a Parquet snapshot and a
//! Delta table.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use cnpjlake::config::Config;
use cnpjlake::error::{AddressParseSnafu, ConfigSnafu, MetricsSnafu, PipelineError};
use cnpjlake::layout::Layout;
use cnpjlake::naming::RecordCategory;
use cnpjlake::{metrics, run_pipeline};

/// CNPJ bulk-data to Parquet and Delta Lake pipeline.
#[derive(Parser, Debug)]
#[command(name = "cnpjlake")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Suffix of the output snapshot and table (defaults to `output.label`).
    #[arg(long)]
    label: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without processing.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("cnpjlake starting");

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;
    let label = args.label.as_deref().unwrap_or(&config.output.label).to_string();

    // Initialize metrics if enabled
    let metrics_handle = if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        Some(metrics::init(addr).await.context(MetricsSnafu)?)
    } else {
        None
    };

    if args.dry_run {
        describe(&config, &label);
        info!("Configuration is valid");
        return Ok(());
    }

    let stats = run_pipeline(config, Some(&label)).await?;

    info!("Pipeline completed successfully");
    info!("  Archives extracted: {}", stats.archives_extracted);
    info!("  Archives re-fetched: {}", stats.archives_refetched);
    info!("  Raw files extracted: {}", stats.raw_files_extracted);
    info!("  Stale paths removed: {}", stats.stale_paths_removed);
    info!("  Partitions written: {}", stats.partitions_written);
    info!("  Files skipped: {}", stats.files_skipped);
    info!("  Rows curated: {}", stats.rows_curated);
    for (category, rows) in &stats.rows_stacked {
        info!("  Rows stacked ({category}): {rows}");
    }
    info!("  Rows written: {}", stats.rows_written);

    if let Some(handle) = metrics_handle {
        debug!("Final metrics:\n{}", handle.render());
    }

    Ok(())
}

/// Log the resolved layout for a dry run.
fn describe(config: &Config, label: &str) {
    let layout = Layout::new(&config.layers);
    info!("Dry run mode - validating configuration");
    info!("Staging: {}", layout.staging().display());
    for category in RecordCategory::ALL {
        info!(
            "  {category}: raw {} / curated {}",
            layout.raw_dir(category).display(),
            layout.curated_dir(category).display()
        );
    }
    info!("Snapshot: {}", layout.snapshot(label).display());
    info!("Delta table: {}", layout.delta_table(label).display());
    info!(
        "Re-fetch: {}",
        if config.fetch.enabled {
            config.fetch.base_url.as_str()
        } else {
            "disabled"
        }
    );
}
