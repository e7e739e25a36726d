//! Durable key-value storage for the Altrinity sync client.
//!
//! The rest of the workspace only sees the [`KeyValueStore`] trait: one named
//! slot maps to one string value. Two implementations ship here:
//! - **[`SqliteStore`]**: a single `kv` table in a SQLite file (WAL mode)
//! - **[`MemoryStore`]**: a mutex-guarded map for tests and throwaway runs

mod keys;
mod memory;
mod sqlite;
mod traits;

pub use keys::StorageKeys;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::KeyValueStore;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Backend-specific failure that has no richer type
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
