//! Error types for hedger-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Invalid market: {0}")]
    InvalidMarket(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
