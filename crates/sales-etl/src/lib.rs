//! Sales Pulse ETL Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Loads an order-line spreadsheet into the reporting schema
//! (`categories → subcategories → products → sales`).
//!
//! # Architecture
//!
//! - [`source`]: reads worksheets row by row from a local file or a URL and
//!   pushes them through a bounded channel
//! - [`parser`]: normalises header names and raw cell values
//! - [`coordinator`]: buffers rows into batches, bounds in-flight flushes and
//!   drains every worksheet before releasing the pool
//! - [`storage`]: resolves the dimension hierarchy and inserts facts, one
//!   transaction per batch
//! - [`pipeline`]: wires the above together for one run
//!
//! Re-running over the same file is idempotent: dimensions are resolved with
//! a check / insert-missing / re-read protocol and facts are keyed on
//! `(order_id, product_id)` with conflict-ignoring inserts.
//!
//! # Example
//!
//! ```no_run
//! use sales_etl::{config::EtlConfig, pipeline};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EtlConfig::from_env()?;
//!     let summary = pipeline::run(&config, CancellationToken::new()).await?;
//!     println!("inserted {} sales rows", summary.rows_inserted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod db;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod source;
pub mod stats;
pub mod storage;

pub use coordinator::{BatchCoordinator, CoordinatorConfig};
pub use stats::RunSummary;

/// Default number of tuples sent per lookup / insert round trip
pub const DEFAULT_CHUNK_SIZE: usize = 200;

/// Default capacity of the row queue between the reader and the coordinator
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default number of batch transactions allowed in flight at once
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1;

/// Result type for ETL operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Error types for the ETL pipeline
///
/// Row-level problems are not errors; see [`models::RowRejection`].
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Workbook error: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("Workbook error: {0}")]
    Xlsx(#[from] calamine::XlsxError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Download error: {0}")]
    Download(#[from] reqwest::Error),

    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Common(#[from] sales_common::SalesError),
}

impl EtlError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
