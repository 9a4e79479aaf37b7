//! Error types for turnlog-core

use thiserror::Error;

/// Main error type for the turnlog-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Rejected input (missing ids on ingest, blank key on an admin save)
    #[error("invalid input: {0}")]
    Validation(String),

    /// Document store misuse or unusable state
    #[error("store error: {0}")]
    Store(String),

    /// Session not found
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

/// Result type alias for turnlog-core
pub type Result<T> = std::result::Result<T, Error>;
