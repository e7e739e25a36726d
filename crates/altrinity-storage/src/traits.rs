//! Storage trait definitions.

use crate::StorageResult;

/// Trait for durable key-value backends.
pub trait KeyValueStore: Send + Sync {
    /// Store a value, overwriting any previous one.
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value. Returns whether a value was removed.
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Store several values at once.
    ///
    /// Backends that can should apply the whole batch or nothing. The default
    /// writes the entries one by one in the given order and stops at the first
    /// error, so callers order entries to make a partial write harmless.
    fn set_many(&self, entries: &[(&str, &str)]) -> StorageResult<()> {
        for (key, value) in entries {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Check if a key exists.
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
