//! ETL configuration
//!
//! Values come from the environment (`.env` is honoured by the binary) and
//! can be overridden by command-line flags. Missing or invalid settings are
//! fatal before any ingestion starts.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sales_common::SalesError;

use crate::coordinator::CoordinatorConfig;
use crate::db::DatabaseConfig;
use crate::source::{SourceFormat, SourceLocation, SourceSpec};
use crate::{EtlError, Result, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_IN_FLIGHT, DEFAULT_QUEUE_CAPACITY};

/// Default timeout for fetching a remote source.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub max_in_flight: usize,
    pub queue_capacity: usize,
    pub chunk_size: usize,
}

impl BatchSettings {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig::new(self.batch_size).with_max_in_flight(self.max_in_flight)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtlConfig {
    pub database: DatabaseConfig,
    pub source: SourceSpec,
    pub batch: BatchSettings,
    pub http_timeout: Duration,
    pub run_migrations: bool,
}

/// Command-line values that take precedence over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub file: Option<PathBuf>,
    pub url: Option<String>,
    pub format: Option<SourceFormat>,
    pub batch_size: Option<usize>,
    pub max_in_flight: Option<usize>,
    pub run_migrations: bool,
}

impl EtlConfig {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::resolve(|key| std::env::var(key).ok(), &ConfigOverrides::default())
    }

    /// Load from `lookup`, then apply `overrides`, then validate.
    pub fn resolve<F>(lookup: F, overrides: &ConfigOverrides) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let url = env
            .string("DATABASE_URL")
            .ok_or(SalesError::MissingSetting("DATABASE_URL"))?;
        let database = DatabaseConfig {
            url,
            max_connections: env
                .parse("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(DatabaseConfig::DEFAULT_MAX_CONNECTIONS),
            min_connections: env
                .parse("DATABASE_MIN_CONNECTIONS")?
                .unwrap_or(DatabaseConfig::DEFAULT_MIN_CONNECTIONS),
            connect_timeout_secs: env
                .parse("DATABASE_CONNECT_TIMEOUT")?
                .unwrap_or(DatabaseConfig::DEFAULT_CONNECT_TIMEOUT_SECS),
        };

        let file = overrides
            .file
            .clone()
            .or_else(|| env.string("ETL_FILE_PATH").map(PathBuf::from));
        let url = overrides.url.clone().or_else(|| env.string("ETL_SOURCE_URL"));
        let location = match (file, url) {
            (Some(path), _) => SourceLocation::File(path),
            (None, Some(url)) => SourceLocation::Url(url),
            (None, None) => {
                return Err(EtlError::config(
                    "No source configured: set ETL_FILE_PATH or ETL_SOURCE_URL",
                ))
            }
        };
        let format = match overrides.format {
            Some(format) => Some(format),
            None => env.parse::<SourceFormat>("ETL_SOURCE_FORMAT")?,
        };

        let batch_size = match overrides.batch_size {
            Some(size) => size,
            None => env
                .parse("ETL_BATCH_SIZE")?
                .ok_or(SalesError::MissingSetting("ETL_BATCH_SIZE"))?,
        };
        let batch = BatchSettings {
            batch_size,
            max_in_flight: match overrides.max_in_flight {
                Some(n) => n,
                None => env.parse("ETL_MAX_IN_FLIGHT")?.unwrap_or(DEFAULT_MAX_IN_FLIGHT),
            },
            queue_capacity: env
                .parse("ETL_QUEUE_CAPACITY")?
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
            chunk_size: env.parse("ETL_CHUNK_SIZE")?.unwrap_or(DEFAULT_CHUNK_SIZE),
        };

        let config = Self {
            database,
            source: SourceSpec { location, format },
            batch,
            http_timeout: Duration::from_secs(
                env.parse("ETL_HTTP_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
            run_migrations: overrides.run_migrations
                || env.parse("ETL_RUN_MIGRATIONS")?.unwrap_or(false),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(SalesError::MissingSetting("DATABASE_URL").into());
        }
        if self.database.max_connections == 0 {
            return Err(EtlError::config("DATABASE_MAX_CONNECTIONS must be at least 1"));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(EtlError::config(format!(
                "DATABASE_MIN_CONNECTIONS ({}) exceeds DATABASE_MAX_CONNECTIONS ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }
        if self.batch.batch_size == 0 {
            return Err(EtlError::config("ETL_BATCH_SIZE must be greater than 0"));
        }
        if self.batch.max_in_flight == 0 {
            return Err(EtlError::config("ETL_MAX_IN_FLIGHT must be greater than 0"));
        }
        if self.batch.queue_capacity == 0 {
            return Err(EtlError::config("ETL_QUEUE_CAPACITY must be greater than 0"));
        }
        if self.batch.chunk_size == 0 {
            return Err(EtlError::config("ETL_CHUNK_SIZE must be greater than 0"));
        }
        match &self.source.location {
            SourceLocation::File(path) if path.as_os_str().is_empty() => {
                Err(EtlError::config("ETL_FILE_PATH is empty"))
            }
            SourceLocation::Url(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                Err(EtlError::config(format!("ETL_SOURCE_URL is not an http(s) URL: {}", url)))
            }
            _ => Ok(()),
        }
    }
}

/// Typed access to a key → value lookup. Blank values count as unset.
struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &'static str) -> std::result::Result<Option<T>, SalesError> {
        self.string(key)
            .map(|raw| raw.parse::<T>().map_err(|_| SalesError::invalid(key, raw)))
            .transpose()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DATABASE_URL", "postgresql://localhost/sales"),
            ("ETL_FILE_PATH", "data/sales.xlsx"),
            ("ETL_BATCH_SIZE", "500"),
        ]
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = EtlConfig::resolve(env(&base()), &ConfigOverrides::default()).unwrap();
        assert_eq!(config.batch.batch_size, 500);
        assert_eq!(config.batch.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
        assert_eq!(config.batch.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.http_timeout, Duration::from_secs(300));
        assert!(!config.run_migrations);
        assert_eq!(config.source, SourceSpec::file("data/sales.xlsx"));
    }

    #[test]
    fn test_missing_database_url_is_fatal() {
        let vars = [("ETL_FILE_PATH", "a.xlsx"), ("ETL_BATCH_SIZE", "10")];
        let err = EtlConfig::resolve(env(&vars), &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, EtlError::Common(SalesError::MissingSetting("DATABASE_URL"))));
    }

    #[test]
    fn test_batch_size_is_required_and_positive() {
        let vars = [("DATABASE_URL", "postgresql://x/y"), ("ETL_FILE_PATH", "a.xlsx")];
        let err = EtlConfig::resolve(env(&vars), &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, EtlError::Common(SalesError::MissingSetting("ETL_BATCH_SIZE"))));

        let mut vars = base();
        vars.push(("ETL_BATCH_SIZE", "0"));
        vars.remove(2);
        let err = EtlConfig::resolve(env(&vars), &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn test_unparseable_number_is_fatal() {
        let mut vars = base();
        vars.push(("ETL_MAX_IN_FLIGHT", "many"));
        let err = EtlConfig::resolve(env(&vars), &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(
            err,
            EtlError::Common(SalesError::InvalidValue { name: "ETL_MAX_IN_FLIGHT", .. })
        ));
    }

    #[test]
    fn test_url_used_when_file_path_absent() {
        let vars = [
            ("DATABASE_URL", "postgresql://x/y"),
            ("ETL_SOURCE_URL", "https://files.test/sales.xlsx"),
            ("ETL_FILE_PATH", "   "),
            ("ETL_BATCH_SIZE", "100"),
            ("ETL_SOURCE_FORMAT", "xlsx"),
        ];
        let config = EtlConfig::resolve(env(&vars), &ConfigOverrides::default()).unwrap();
        assert_eq!(
            config.source.location,
            SourceLocation::Url("https://files.test/sales.xlsx".to_string())
        );
        assert_eq!(config.source.format, Some(SourceFormat::Xlsx));
    }

    #[test]
    fn test_missing_source_is_fatal() {
        let vars = [("DATABASE_URL", "postgresql://x/y"), ("ETL_BATCH_SIZE", "100")];
        let err = EtlConfig::resolve(env(&vars), &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let overrides = ConfigOverrides {
            url: Some("https://files.test/q1.csv".to_string()),
            batch_size: Some(25),
            max_in_flight: Some(3),
            run_migrations: true,
            ..Default::default()
        };
        let vars = [("DATABASE_URL", "postgresql://x/y"), ("ETL_BATCH_SIZE", "500")];
        let config = EtlConfig::resolve(env(&vars), &overrides).unwrap();
        assert_eq!(config.batch.batch_size, 25);
        assert_eq!(config.batch.coordinator().max_in_flight, 3);
        assert!(config.run_migrations);
        assert!(matches!(config.source.location, SourceLocation::Url(_)));
    }

    #[test]
    fn test_min_connections_cannot_exceed_max() {
        let mut vars = base();
        vars.push(("DATABASE_MAX_CONNECTIONS", "2"));
        vars.push(("DATABASE_MIN_CONNECTIONS", "4"));
        let err = EtlConfig::resolve(env(&vars), &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }

    #[test]
    fn test_non_http_url_is_rejected() {
        let vars = [
            ("DATABASE_URL", "postgresql://x/y"),
            ("ETL_SOURCE_URL", "ftp://files.test/sales.xlsx"),
            ("ETL_BATCH_SIZE", "100"),
        ];
        let err = EtlConfig::resolve(env(&vars), &ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
    }
}
