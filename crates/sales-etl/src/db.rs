//! Storage connection pool ownership
//!
//! The pool is created once per run and closed exactly once, no matter how
//! many paths (coordinator drain, signal handling, error unwinding) ask for it.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
    pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            min_connections: Self::DEFAULT_MIN_CONNECTIONS,
            connect_timeout_secs: Self::DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Owned handle to the run's connection pool.
#[derive(Debug)]
pub struct Database {
    pool: PgPool,
    closed: AtomicBool,
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database connection pool created"
        );

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            closed: AtomicBool::new(false),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Close the pool, waiting for checked-out connections to return.
    ///
    /// Returns `true` for the call that actually closed it; later calls are no-ops.
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Database pool already closed");
            return false;
        }

        self.pool.close().await;
        info!("Database connection pool closed");
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_defaults() {
        let config = DatabaseConfig::new("postgresql://localhost/sales");
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.connect_timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let pool = PgPool::connect_lazy("postgresql://localhost/sales").unwrap();
        let db = Database::from_pool(pool);

        assert!(!db.is_closed());
        assert!(db.close().await);
        assert!(!db.close().await);
        assert!(db.is_closed());
        assert!(db.pool().is_closed());
    }
}
