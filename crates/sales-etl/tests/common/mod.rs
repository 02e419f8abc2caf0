//! Shared fixtures for database-backed ETL tests
//!
//! Each test gets its own PostgreSQL container (16-alpine) with the schema
//! migrations applied. Spreadsheet fixtures are generated on the fly.

#![allow(dead_code)]

use anyhow::{Context, Result};
use rust_xlsxwriter::Workbook;
use sales_etl::config::{BatchSettings, EtlConfig};
use sales_etl::db::DatabaseConfig;
use sales_etl::source::SourceSpec;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::Path;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

pub const HEADER: [&str; 14] = [
    "Order ID",
    "Order Date",
    "Ship Date",
    "Ship Mode",
    "Quantity",
    "Discount",
    "Sales",
    "Profit",
    "Category",
    "Sub-Category",
    "Product Name",
    "State",
    "Country",
    "Region",
];

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sales_etl=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    /// Start a container and apply migrations.
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(5432.tcp()).await?;
        let connection_string = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub async fn count(&self, table: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn truncate(&self) -> Result<()> {
        sqlx::query("TRUNCATE sales, products, subcategories, categories RESTART IDENTITY CASCADE")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Config for a run against `db`, reading `source` in batches of `batch_size`.
pub fn etl_config(db: &TestPostgres, source: SourceSpec, batch_size: usize) -> EtlConfig {
    EtlConfig {
        database: DatabaseConfig::new(db.connection_string()),
        source,
        batch: BatchSettings::new(batch_size),
        http_timeout: Duration::from_secs(10),
        run_migrations: false,
    }
}

/// An order line in `HEADER` column order.
pub fn order_line<'a>(
    order_id: &'a str,
    sales: &'a str,
    category: &'a str,
    subcategory: &'a str,
    product: &'a str,
) -> Vec<&'a str> {
    vec![
        order_id,
        "2021-01-05",
        "2021-01-07",
        "First Class",
        "2",
        "0.1",
        sales,
        "10.00",
        category,
        subcategory,
        product,
        "CA",
        "US",
        "West",
    ]
}

/// Write worksheets of string rows; numeric-looking cells are written as numbers.
pub fn write_xlsx(path: &Path, sheets: &[(&str, Vec<Vec<&str>>)]) -> Result<()> {
    let mut workbook = Workbook::new();

    for (name, rows) in sheets {
        let sheet = workbook.add_worksheet().set_name(*name)?;
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                let (r, c) = (r as u32, c as u16);
                if value.is_empty() {
                    continue;
                }
                match value.parse::<f64>() {
                    Ok(number) => sheet.write_number(r, c, number)?,
                    Err(_) => sheet.write_string(r, c, *value)?,
                };
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}

/// Header row followed by `lines`.
pub fn with_header<'a>(lines: Vec<Vec<&'a str>>) -> Vec<Vec<&'a str>> {
    let mut rows = vec![HEADER.to_vec()];
    rows.extend(lines);
    rows
}

pub fn to_csv(rows: &[Vec<&str>]) -> String {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|v| if v.contains(',') { format!("\"{}\"", v) } else { v.to_string() })
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
