//! Fact loading
//!
//! Sales are keyed on `(order_id, product_id)`. A batch is deduplicated in
//! memory, checked against stored keys, and only absent rows are inserted with
//! `ON CONFLICT DO NOTHING` as the last line against concurrent runs. Stored
//! rows are never updated.

use sqlx::{PgConnection, Postgres, QueryBuilder};
use std::collections::HashSet;
use tracing::debug;

use super::dimensions::DimensionKeys;
use crate::models::SaleRow;
use crate::{Result, DEFAULT_CHUNK_SIZE};

/// A validated row whose dimension chain resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewSale<'a> {
    pub row: &'a SaleRow,
    pub product_id: i32,
}

impl<'a> NewSale<'a> {
    /// `None` when the row's category/subcategory/product chain did not resolve.
    pub fn from_row(row: &'a SaleRow, keys: &DimensionKeys) -> Option<Self> {
        Some(Self {
            row,
            product_id: keys.product_id(row)?,
        })
    }

    pub fn key(&self) -> (&'a str, i32) {
        (self.row.order_id.as_str(), self.product_id)
    }
}

/// Keep the first occurrence of every key. Returns the survivors and the
/// number of rows dropped.
pub fn dedupe_by_key(sales: Vec<NewSale<'_>>) -> (Vec<NewSale<'_>>, usize) {
    let before = sales.len();
    let mut seen = HashSet::with_capacity(before);
    let unique: Vec<_> = sales.into_iter().filter(|s| seen.insert(s.key())).collect();
    let dropped = before - unique.len();
    (unique, dropped)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FactLoadReport {
    /// Rows skipped because their key was already stored
    pub existing: usize,
    pub inserted: usize,
}

/// Inserts deduplicated sales for one batch.
#[derive(Debug, Clone)]
pub struct FactLoader {
    chunk_size: usize,
}

impl Default for FactLoader {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl FactLoader {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Insert the sales whose key is not stored yet.
    ///
    /// Expects keys to be unique already (see [`dedupe_by_key`]). Must run
    /// inside the batch transaction.
    pub async fn load(
        &self,
        conn: &mut PgConnection,
        sales: &[NewSale<'_>],
    ) -> Result<FactLoadReport> {
        if sales.is_empty() {
            return Ok(FactLoadReport::default());
        }

        let stored = self.existing_keys(conn, sales).await?;
        let mut fresh: Vec<&NewSale<'_>> = sales
            .iter()
            .filter(|s| {
                let (order_id, product_id) = s.key();
                !stored.contains(&(order_id.to_string(), product_id))
            })
            .collect();
        // Concurrent loaders must take key locks in the same order.
        fresh.sort_by(|a, b| a.key().cmp(&b.key()));

        let mut inserted = 0usize;
        for chunk in fresh.chunks(self.chunk_size) {
            inserted += self.insert_chunk(conn, chunk).await? as usize;
        }

        // Rows lost to a concurrent insert between the check and the insert
        // count as existing.
        let report = FactLoadReport {
            existing: sales.len() - inserted,
            inserted,
        };

        debug!(
            candidates = sales.len(),
            already_stored = stored.len(),
            inserted = report.inserted,
            "Loaded sales"
        );

        Ok(report)
    }

    async fn existing_keys(
        &self,
        conn: &mut PgConnection,
        sales: &[NewSale<'_>],
    ) -> Result<HashSet<(String, i32)>> {
        let mut stored = HashSet::new();
        for chunk in sales.chunks(self.chunk_size) {
            let order_ids: Vec<&str> = chunk.iter().map(|s| s.row.order_id.as_str()).collect();
            let product_ids: Vec<i32> = chunk.iter().map(|s| s.product_id).collect();

            let rows: Vec<(String, i32)> = sqlx::query_as(
                r#"
                SELECT s.order_id, s.product_id
                FROM sales s
                JOIN UNNEST($1::text[], $2::int4[]) AS k(order_id, product_id)
                  ON s.order_id = k.order_id AND s.product_id = k.product_id
                "#,
            )
            .bind(order_ids)
            .bind(product_ids)
            .fetch_all(&mut *conn)
            .await?;

            stored.extend(rows);
        }
        Ok(stored)
    }

    async fn insert_chunk(&self, conn: &mut PgConnection, chunk: &[&NewSale<'_>]) -> Result<u64> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO sales (
                order_id,
                order_date,
                ship_date,
                ship_mode,
                quantity,
                discount,
                sales_amount,
                profit,
                product_id,
                state,
                country,
                region
            )
            "#,
        );

        builder.push_values(chunk, |mut b, sale| {
            let row = sale.row;
            b.push_bind(&row.order_id)
                .push_bind(row.order_date)
                .push_bind(row.ship_date)
                .push_bind(&row.ship_mode)
                .push_bind(row.quantity)
                .push_bind(row.discount)
                .push_bind(row.sales_amount)
                .push_bind(row.profit)
                .push_bind(sale.product_id)
                .push_bind(&row.state)
                .push_bind(&row.country)
                .push_bind(&row.region);
        });

        builder.push(" ON CONFLICT (order_id, product_id) DO NOTHING");

        let result = builder.build().execute(&mut *conn).await?;
        Ok(result.rows_affected())
    }
}
