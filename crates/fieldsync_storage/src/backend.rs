//! Storage backend trait definition.

use crate::batch::WriteBatch;
use crate::error::StorageResult;

/// A physical local store made of named tables of keyed rows.
///
/// Storage backends are **opaque row stores**. They know nothing about
/// records, sync status or indexes; `fieldsync_core` owns all row
/// interpretation.
///
/// # Invariants
///
/// - `apply` is atomic: all preconditions are checked and all operations
///   are applied under one exclusive section, or nothing changes
/// - `get` after a successful `apply` observes the batch
/// - `scan` returns rows ordered by key
/// - Backends must be `Send + Sync`; one handle is shared by every
///   execution context that touches the same physical store
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For persistent storage
pub trait StorageBackend: Send + Sync {
    /// Reads one row.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Reads every row of a table, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn scan(&self, table: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Reads the rows whose key starts with `prefix`, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn scan_prefix(&self, table: &str, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>>;

    /// Applies a batch atomically.
    ///
    /// Returns `Ok(false)` without changing anything when a precondition
    /// does not hold.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be made durable.
    fn apply(&self, batch: WriteBatch) -> StorageResult<bool>;

    /// Flushes all applied batches to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&self) -> StorageResult<()>;

    /// Inserts or replaces a single row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn put(&self, table: &str, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(table, key, value);
        self.apply(batch).map(|_| ())
    }

    /// Removes a single row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn delete(&self, table: &str, key: &str) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.delete(table, key);
        self.apply(batch).map(|_| ())
    }

    /// Replaces a row only if it currently holds `expected`.
    ///
    /// `expected = None` means the row must be absent; `new = None`
    /// removes the row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn compare_and_swap(
        &self,
        table: &str,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    ) -> StorageResult<bool> {
        let mut batch = WriteBatch::new();
        batch.expect(table, key, expected);
        match new {
            Some(value) => batch.put(table, key, value),
            None => batch.delete(table, key),
        };
        self.apply(batch)
    }
}
