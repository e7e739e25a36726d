//! Outbox error types.

use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] altrinity_storage::StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote endpoint rejected a submission
    #[error("Send failed: {0}")]
    Send(String),

    /// Queue used before `load()`
    #[error("Queue not loaded")]
    NotLoaded,

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
