//! Error types for the Tiergate service.

use thiserror::Error;

use crate::ratelimit::StoreError;

/// Main error type for Tiergate operations.
#[derive(Error, Debug)]
pub enum TiergateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration source errors (file parsing, environment overrides)
    #[error("Configuration source error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    /// Counter store errors
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tiergate operations.
pub type Result<T> = std::result::Result<T, TiergateError>;
