//! Error types for fieldsync-core

use thiserror::Error;

/// Result type alias using fieldsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fieldsync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Remote document store error
    #[error("Remote store error: {0}")]
    Remote(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document or record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Device reports no connectivity
    #[error("Device is offline")]
    Offline,

    /// Conflict was parked for a human decision instead of being resolved
    #[error("Conflict {0} requires manual resolution")]
    ManualResolutionRequired(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
