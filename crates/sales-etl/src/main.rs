//! Sales Pulse ETL - load an order-line spreadsheet into the reporting schema

use anyhow::{Context, Result};
use clap::Parser;
use sales_common::logging::{init_logging, LogConfig, LogLevel};
use sales_etl::config::{ConfigOverrides, EtlConfig};
use sales_etl::pipeline;
use sales_etl::source::SourceFormat;
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "sales-etl")]
#[command(author, version, about = "Load a sales spreadsheet into the reporting database")]
struct Cli {
    /// Local spreadsheet to ingest (preferred over --url)
    #[arg(short, long, env = "ETL_FILE_PATH")]
    file: Option<PathBuf>,

    /// URL to fetch the spreadsheet from
    #[arg(short, long, env = "ETL_SOURCE_URL")]
    url: Option<String>,

    /// Source format (xlsx, xls, xlsb, ods, csv); inferred from the extension by default
    #[arg(long, env = "ETL_SOURCE_FORMAT")]
    format: Option<SourceFormat>,

    /// Rows per batch transaction
    #[arg(short, long, env = "ETL_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Batch transactions allowed in flight at once
    #[arg(long, env = "ETL_MAX_IN_FLIGHT")]
    max_in_flight: Option<usize>,

    /// Apply database migrations before ingesting
    #[arg(long)]
    migrate: bool,

    /// Write the run summary as JSON to this file
    #[arg(long)]
    summary_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("sales-etl")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let overrides = ConfigOverrides {
        file: cli.file,
        url: cli.url,
        format: cli.format,
        batch_size: cli.batch_size,
        max_in_flight: cli.max_in_flight,
        run_migrations: cli.migrate,
    };
    let config = EtlConfig::resolve(|key| std::env::var(key).ok(), &overrides)
        .context("Invalid configuration")?;

    info!(
        source = %config.source.location,
        batch_size = config.batch.batch_size,
        "Starting Sales Pulse ETL"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let summary = match pipeline::run(&config, cancel).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "ETL run failed");
            return Err(e).context("ETL run failed");
        }
    };

    if let Some(path) = &cli.summary_file {
        let json = serde_json::to_vec_pretty(&summary)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    }

    if summary.has_failures() {
        warn!(
            batches_failed = summary.batches_failed,
            rows_failed = summary.rows_failed,
            "Some batches rolled back; see the errors above for their source rows"
        );
    }

    info!(
        sheets = summary.sheets_seen,
        rows_read = summary.rows_read,
        rows_inserted = summary.rows_inserted,
        rows_rejected = summary.rows_rejected,
        rows_unresolved = summary.rows_unresolved,
        batches_failed = summary.batches_failed,
        "ETL complete"
    );
    Ok(())
}

/// Cancel the run on Ctrl+C or SIGTERM so in-flight batches can drain.
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, draining in-flight batches"),
        _ = terminate => info!("Received terminate signal, draining in-flight batches"),
    }

    cancel.cancel();
}
