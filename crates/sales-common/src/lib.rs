//! Sales Pulse Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging and error handling for the Sales Pulse workspace.
//!
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` environment variables
//! - **Errors**: the workspace-wide [`SalesError`] and [`Result`] alias
//! - **Types**: rows of the fixed reporting schema (categories, subcategories,
//!   products, sales) shared by the ETL and the reporting API
//!
//! # Example
//!
//! ```no_run
//! use sales_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> sales_common::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Result, SalesError};
