//! Postgres batch processor

use async_trait::async_trait;
use sqlx::PgConnection;
use std::sync::Arc;
use tracing::{debug, warn};

use super::dimensions::{DimensionKeys, DimensionResolver};
use super::facts::{dedupe_by_key, FactLoader, NewSale};
use super::{BatchProcessor, BatchReport};
use crate::db::Database;
use crate::models::{Batch, SaleRow};
use crate::Result;

/// Runs dimension resolution and fact loading for a batch in one transaction.
#[derive(Debug, Clone)]
pub struct PgBatchProcessor {
    db: Arc<Database>,
    dimensions: DimensionResolver,
    facts: FactLoader,
}

impl PgBatchProcessor {
    pub fn new(db: Arc<Database>, chunk_size: usize) -> Self {
        Self {
            db,
            dimensions: DimensionResolver::new(chunk_size),
            facts: FactLoader::new(chunk_size),
        }
    }

    /// Resolve and load a batch on an open connection or transaction.
    pub async fn process_on(&self, conn: &mut PgConnection, batch: &Batch) -> Result<BatchReport> {
        let (keys, created) = self.dimensions.resolve(conn, &batch.rows).await?;

        let mut unresolved = 0;
        let mut candidates = Vec::with_capacity(batch.len());
        for row in &batch.rows {
            match NewSale::from_row(row, &keys) {
                Some(sale) => candidates.push(sale),
                None => {
                    unresolved += 1;
                    warn!(
                        sheet = %batch.sheet,
                        row = row.source_row,
                        order_id = %row.order_id,
                        missing = unresolved_level(row, &keys),
                        "Dropping row with incomplete product hierarchy"
                    );
                }
            }
        }

        let (unique, duplicates) = dedupe_by_key(candidates);
        if duplicates > 0 {
            debug!(sheet = %batch.sheet, batch = batch.ordinal, duplicates, "Dropped repeated order lines");
        }

        let loaded = self.facts.load(conn, &unique).await?;

        Ok(BatchReport {
            rows: batch.len(),
            unresolved,
            duplicates,
            existing: loaded.existing,
            inserted: loaded.inserted,
            categories_created: created.categories_created,
            subcategories_created: created.subcategories_created,
            products_created: created.products_created,
        })
    }
}

/// First level of the chain a row could not resolve.
fn unresolved_level(row: &SaleRow, keys: &DimensionKeys) -> &'static str {
    if row.category.is_none() {
        "category"
    } else if row.subcategory.is_none() {
        "subcategory"
    } else if row.product_name.is_none() {
        "product_name"
    } else if keys.category_id(row).is_none() {
        "category id"
    } else if keys.subcategory_id(row).is_none() {
        "subcategory id"
    } else {
        "product id"
    }
}

#[async_trait]
impl BatchProcessor for PgBatchProcessor {
    async fn process(&self, batch: &Batch) -> Result<BatchReport> {
        // Dropping the transaction on error rolls the whole batch back.
        let mut tx = self.db.pool().begin().await?;
        let report = self.process_on(&mut *tx, batch).await?;
        tx.commit().await?;
        Ok(report)
    }

    async fn shutdown(&self) {
        self.db.close().await;
    }
}
