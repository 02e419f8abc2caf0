//! Batch persistence
//!
//! A batch is resolved against the dimension tables and loaded into `sales`
//! inside one transaction: it either commits fully or leaves no trace.
//!
//! - [`dimensions`]: check / insert-missing / re-read resolution of
//!   categories, subcategories and products
//! - [`facts`]: in-batch dedup and conflict-ignoring fact inserts
//! - [`batch`]: the Postgres [`BatchProcessor`] tying both together

use async_trait::async_trait;

use crate::models::Batch;
use crate::Result;

pub mod batch;
pub mod dimensions;
pub mod facts;

pub use batch::PgBatchProcessor;
pub use dimensions::{DimensionKeys, DimensionResolver};
pub use facts::{FactLoader, NewSale};

/// Persists one batch atomically.
///
/// The coordinator owns exactly one processor per run and calls
/// [`shutdown`](BatchProcessor::shutdown) once after every batch has settled.
#[async_trait]
pub trait BatchProcessor: Send + Sync + 'static {
    /// Process one batch inside a single transaction.
    ///
    /// An error means nothing from the batch was persisted.
    async fn process(&self, batch: &Batch) -> Result<BatchReport>;

    /// Release storage resources.
    async fn shutdown(&self);
}

/// Outcome of one committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub rows: usize,
    /// Rows whose dimension chain was incomplete
    pub unresolved: usize,
    /// Repeats of a key already present earlier in the batch
    pub duplicates: usize,
    /// Rows whose key was already stored
    pub existing: usize,
    pub inserted: usize,
    pub categories_created: u64,
    pub subcategories_created: u64,
    pub products_created: u64,
}
