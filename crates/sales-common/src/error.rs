//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for shared operations
pub type Result<T> = std::result::Result<T, SalesError>;

/// Main error type for shared operations
#[derive(Error, Debug)]
pub enum SalesError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Missing required setting: {0}")]
    MissingSetting(&'static str),
}

impl SalesError {
    pub fn invalid(name: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            name,
            value: value.into(),
        }
    }
}
