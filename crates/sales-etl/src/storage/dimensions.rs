//! Dimension resolution
//!
//! Each level (category, subcategory, product) is resolved in three steps:
//! look up which referenced tuples already exist, insert only the missing ones
//! with `ON CONFLICT DO NOTHING`, then re-read every referenced tuple. The
//! insert-or-ignore primitive does not return ids for ignored rows, so the
//! re-read is what makes the result independent of which run inserted a row.
//!
//! Tuples are inserted in sorted order so concurrent runs take row locks in
//! the same sequence.

use sqlx::{PgConnection, Postgres, QueryBuilder};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::models::SaleRow;
use crate::{Result, DEFAULT_CHUNK_SIZE};

/// A child-level tuple: `(name, parent id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChildRef {
    pub name: String,
    pub parent_id: i32,
}

/// Name → surrogate key maps for one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DimensionKeys {
    categories: HashMap<String, i32>,
    /// category id → subcategory name → id
    subcategories: HashMap<i32, HashMap<String, i32>>,
    /// subcategory id → product name → id
    products: HashMap<i32, HashMap<String, i32>>,
}

impl DimensionKeys {
    pub fn category_id(&self, row: &SaleRow) -> Option<i32> {
        let name = row.category.as_deref()?;
        self.categories.get(name).copied()
    }

    pub fn subcategory_id(&self, row: &SaleRow) -> Option<i32> {
        let category_id = self.category_id(row)?;
        let name = row.subcategory.as_deref()?;
        self.subcategories.get(&category_id)?.get(name).copied()
    }

    /// Product id of a row whose whole dimension chain resolved.
    pub fn product_id(&self, row: &SaleRow) -> Option<i32> {
        let subcategory_id = self.subcategory_id(row)?;
        let name = row.product_name.as_deref()?;
        self.products.get(&subcategory_id)?.get(name).copied()
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn subcategory_count(&self) -> usize {
        self.subcategories.values().map(HashMap::len).sum()
    }

    pub fn product_count(&self) -> usize {
        self.products.values().map(HashMap::len).sum()
    }
}

/// Rows created while resolving one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DimensionStats {
    pub categories_created: u64,
    pub subcategories_created: u64,
    pub products_created: u64,
}

/// Distinct non-empty category names referenced by the rows, sorted.
pub fn category_refs(rows: &[SaleRow]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.category.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct `(subcategory, category id)` tuples whose category resolved.
pub fn subcategory_refs(rows: &[SaleRow], keys: &DimensionKeys) -> Vec<ChildRef> {
    rows.iter()
        .filter_map(|row| {
            Some(ChildRef {
                parent_id: keys.category_id(row)?,
                name: row.subcategory.clone()?,
            })
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct `(product, subcategory id)` tuples whose subcategory resolved.
pub fn product_refs(rows: &[SaleRow], keys: &DimensionKeys) -> Vec<ChildRef> {
    rows.iter()
        .filter_map(|row| {
            Some(ChildRef {
                parent_id: keys.subcategory_id(row)?,
                name: row.product_name.clone()?,
            })
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Table holding one child level of the hierarchy.
#[derive(Debug, Clone, Copy)]
struct ChildTable {
    table: &'static str,
    parent_column: &'static str,
}

const SUBCATEGORIES: ChildTable = ChildTable {
    table: "subcategories",
    parent_column: "category_id",
};

const PRODUCTS: ChildTable = ChildTable {
    table: "products",
    parent_column: "subcategory_id",
};

/// Resolves the category → subcategory → product chain of a batch.
#[derive(Debug, Clone)]
pub struct DimensionResolver {
    chunk_size: usize,
}

impl Default for DimensionResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl DimensionResolver {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Resolve (creating where needed) every dimension tuple the rows reference.
    ///
    /// Must run inside the batch transaction.
    pub async fn resolve(
        &self,
        conn: &mut PgConnection,
        rows: &[SaleRow],
    ) -> Result<(DimensionKeys, DimensionStats)> {
        let mut keys = DimensionKeys::default();
        let mut stats = DimensionStats::default();

        let names = category_refs(rows);
        let (categories, created) = self.resolve_categories(conn, &names).await?;
        keys.categories = categories;
        stats.categories_created = created;

        let refs = subcategory_refs(rows, &keys);
        let (subcategories, created) = self.resolve_children(conn, SUBCATEGORIES, &refs).await?;
        keys.subcategories = subcategories;
        stats.subcategories_created = created;

        let refs = product_refs(rows, &keys);
        let (products, created) = self.resolve_children(conn, PRODUCTS, &refs).await?;
        keys.products = products;
        stats.products_created = created;

        debug!(
            categories = keys.category_count(),
            subcategories = keys.subcategory_count(),
            products = keys.product_count(),
            created = ?stats,
            "Resolved dimensions"
        );

        Ok((keys, stats))
    }

    async fn resolve_categories(
        &self,
        conn: &mut PgConnection,
        names: &[String],
    ) -> Result<(HashMap<String, i32>, u64)> {
        if names.is_empty() {
            return Ok((HashMap::new(), 0));
        }

        let existing = self.fetch_categories(conn, names).await?;
        let missing: Vec<&String> = names
            .iter()
            .filter(|name| !existing.contains_key(*name))
            .collect();
        if missing.is_empty() {
            return Ok((existing, 0));
        }

        let mut created = 0;
        for chunk in missing.chunks(self.chunk_size) {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO categories (name) ");
            builder.push_values(chunk, |mut b, name| {
                b.push_bind(*name);
            });
            builder.push(" ON CONFLICT (name) DO NOTHING");
            created += builder.build().execute(&mut *conn).await?.rows_affected();
        }

        let resolved = self.fetch_categories(conn, names).await?;
        Ok((resolved, created))
    }

    async fn fetch_categories(
        &self,
        conn: &mut PgConnection,
        names: &[String],
    ) -> Result<HashMap<String, i32>> {
        let mut found = HashMap::with_capacity(names.len());
        for chunk in names.chunks(self.chunk_size) {
            let rows: Vec<(String, i32)> =
                sqlx::query_as("SELECT name, id FROM categories WHERE name = ANY($1)")
                    .bind(chunk)
                    .fetch_all(&mut *conn)
                    .await?;
            found.extend(rows);
        }
        Ok(found)
    }

    async fn resolve_children(
        &self,
        conn: &mut PgConnection,
        table: ChildTable,
        refs: &[ChildRef],
    ) -> Result<(HashMap<i32, HashMap<String, i32>>, u64)> {
        if refs.is_empty() {
            return Ok((HashMap::new(), 0));
        }

        let existing = self.fetch_children(conn, table, refs).await?;
        let missing: Vec<&ChildRef> = refs
            .iter()
            .filter(|r| {
                existing
                    .get(&r.parent_id)
                    .is_none_or(|names| !names.contains_key(&r.name))
            })
            .collect();
        if missing.is_empty() {
            return Ok((existing, 0));
        }

        let mut created = 0;
        for chunk in missing.chunks(self.chunk_size) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (name, {}) ",
                table.table, table.parent_column
            ));
            builder.push_values(chunk, |mut b, r| {
                b.push_bind(&r.name).push_bind(r.parent_id);
            });
            builder.push(format!(
                " ON CONFLICT (name, {}) DO NOTHING",
                table.parent_column
            ));
            created += builder.build().execute(&mut *conn).await?.rows_affected();
        }

        let resolved = self.fetch_children(conn, table, refs).await?;
        Ok((resolved, created))
    }

    async fn fetch_children(
        &self,
        conn: &mut PgConnection,
        table: ChildTable,
        refs: &[ChildRef],
    ) -> Result<HashMap<i32, HashMap<String, i32>>> {
        let sql = format!(
            "SELECT t.name, t.{parent}, t.id \
             FROM {table} t \
             JOIN UNNEST($1::text[], $2::int4[]) AS r(name, parent_id) \
               ON t.name = r.name AND t.{parent} = r.parent_id",
            parent = table.parent_column,
            table = table.table,
        );

        let mut found: HashMap<i32, HashMap<String, i32>> = HashMap::new();
        for chunk in refs.chunks(self.chunk_size) {
            let names: Vec<&str> = chunk.iter().map(|r| r.name.as_str()).collect();
            let parents: Vec<i32> = chunk.iter().map(|r| r.parent_id).collect();

            let rows: Vec<(String, i32, i32)> = sqlx::query_as(&sql)
                .bind(names)
                .bind(parents)
                .fetch_all(&mut *conn)
                .await?;

            for (name, parent_id, id) in rows {
                found.entry(parent_id).or_default().insert(name, id);
            }
        }
        Ok(found)
    }
}
