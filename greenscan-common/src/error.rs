//! Common error types for GreenScan

use thiserror::Error;

/// Common result type for GreenScan operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across GreenScan crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON encode/decode error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid user input or external value (unknown category, bad URL)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
