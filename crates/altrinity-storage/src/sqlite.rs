//! SQLite-backed store.

use crate::{KeyValueStore, StorageError, StorageResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

/// Key-value store over a single SQLite table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open a store at the given path, creating the file and schema if needed.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        ",
        )?;
        Self::init_schema(&conn)?;

        debug!(path = %path.display(), "Opened key-value store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;
        Ok(())
    }

    fn conn(&self) -> StorageResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Backend("sqlite connection lock poisoned".to_string()))
    }
}

const UPSERT_SQL: &str = "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

impl KeyValueStore for SqliteStore {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.conn()?.execute(UPSERT_SQL, params![key, value])?;
        Ok(())
    }

    /// One transaction: either every entry is written or none is.
    fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for (key, value) in entries {
            tx.execute(UPSERT_SQL, params![key, value])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let value = self
            .conn()?
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sqlite_store_set_get_delete() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert_eq!(store.get("missing").unwrap(), None);

        store.set("routeQueue", "[]").unwrap();
        assert_eq!(store.get("routeQueue").unwrap().as_deref(), Some("[]"));

        store.set("routeQueue", "[{\"a\":1}]").unwrap();
        assert_eq!(
            store.get("routeQueue").unwrap().as_deref(),
            Some("[{\"a\":1}]")
        );

        assert!(store.delete("routeQueue").unwrap());
        assert!(!store.delete("routeQueue").unwrap());
        assert!(!store.has("routeQueue").unwrap());
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store.sqlite");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("auth.accessToken", "token-1").unwrap();
        }

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(
            reopened.get("auth.accessToken").unwrap().as_deref(),
            Some("token-1")
        );
    }

    #[test]
    fn test_sqlite_set_many_writes_every_entry() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("routeQueue", "[1]").unwrap();

        store
            .set_many(&[("routeQueue.failed", "[2]"), ("routeQueue", "[]")])
            .unwrap();

        assert_eq!(store.get("routeQueue").unwrap().as_deref(), Some("[]"));
        assert_eq!(
            store.get("routeQueue.failed").unwrap().as_deref(),
            Some("[2]")
        );
    }

    #[test]
    fn test_sqlite_set_many_is_all_or_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("a", "old").unwrap();
        store
            .conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_b BEFORE INSERT ON kv WHEN NEW.key = 'b'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let result = store.set_many(&[("a", "new"), ("b", "value")]);

        assert!(matches!(result, Err(StorageError::Sqlite(_))));
        assert_eq!(store.get("a").unwrap().as_deref(), Some("old"));
        assert!(!store.has("b").unwrap());
    }

    #[test]
    fn test_sqlite_store_as_trait_object() {
        let store: Box<dyn KeyValueStore> = Box::new(SqliteStore::open_in_memory().unwrap());

        store.set("k", "v").unwrap();
        assert!(store.has("k").unwrap());
    }
}
