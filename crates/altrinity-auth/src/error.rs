//! Auth error types.

use thiserror::Error;

/// Auth error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] altrinity_storage::StorageError),

    /// Token is not a well-formed JWT
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token payload is not valid JSON claims
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
