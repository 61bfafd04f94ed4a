//! Common error types for BLIP

use thiserror::Error;

/// Common result type for BLIP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the BLIP scanner and ingest processes
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input at a process boundary (empty address, out-of-range RSSI)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Message bus publish or delivery failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Event or payload serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
