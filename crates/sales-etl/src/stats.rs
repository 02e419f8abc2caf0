//! Run-scoped counters

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::storage::BatchReport;

/// Counters shared between the coordinator and its flush tasks.
#[derive(Debug, Default)]
pub struct RunStats {
    sheets_seen: AtomicU64,
    sheets_skipped: AtomicU64,
    rows_read: AtomicU64,
    rows_ignored: AtomicU64,
    rows_rejected: AtomicU64,
    rows_unresolved: AtomicU64,
    rows_duplicate: AtomicU64,
    rows_existing: AtomicU64,
    rows_inserted: AtomicU64,
    rows_failed: AtomicU64,
    batches_committed: AtomicU64,
    batches_failed: AtomicU64,
    interrupted: AtomicBool,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet_started(&self) {
        self.sheets_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sheet_skipped(&self) {
        self.sheets_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn row_read(&self) {
        self.rows_read.fetch_add(1, Ordering::Relaxed);
    }

    /// A data row belonging to a skipped worksheet.
    pub fn row_ignored(&self) {
        self.rows_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn row_rejected(&self) {
        self.rows_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batch_committed(&self, report: &BatchReport) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.rows_unresolved
            .fetch_add(report.unresolved as u64, Ordering::Relaxed);
        self.rows_duplicate
            .fetch_add(report.duplicates as u64, Ordering::Relaxed);
        self.rows_existing
            .fetch_add(report.existing as u64, Ordering::Relaxed);
        self.rows_inserted
            .fetch_add(report.inserted as u64, Ordering::Relaxed);
    }

    pub fn batch_failed(&self, rows: usize) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.rows_failed.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn mark_interrupted(&self) {
        self.interrupted.store(true, Ordering::Relaxed);
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            sheets_seen: self.sheets_seen.load(Ordering::Relaxed),
            sheets_skipped: self.sheets_skipped.load(Ordering::Relaxed),
            rows_read: self.rows_read.load(Ordering::Relaxed),
            rows_ignored: self.rows_ignored.load(Ordering::Relaxed),
            rows_rejected: self.rows_rejected.load(Ordering::Relaxed),
            rows_unresolved: self.rows_unresolved.load(Ordering::Relaxed),
            rows_duplicate: self.rows_duplicate.load(Ordering::Relaxed),
            rows_existing: self.rows_existing.load(Ordering::Relaxed),
            rows_inserted: self.rows_inserted.load(Ordering::Relaxed),
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
        }
    }
}

/// Totals for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub sheets_seen: u64,
    pub sheets_skipped: u64,
    /// Data rows delivered by the source (header rows excluded)
    pub rows_read: u64,
    /// Data rows of skipped worksheets
    pub rows_ignored: u64,
    /// Rows dropped by value validation
    pub rows_rejected: u64,
    /// Rows dropped because their category/subcategory/product chain was incomplete
    pub rows_unresolved: u64,
    /// Repeats of an `(order_id, product_id)` key within one batch
    pub rows_duplicate: u64,
    /// Rows whose key was already stored
    pub rows_existing: u64,
    pub rows_inserted: u64,
    /// Rows of batches that rolled back
    pub rows_failed: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    /// The run was cancelled before the source was exhausted
    pub interrupted: bool,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.batches_failed > 0
    }
}
