//! In-memory storage backend for testing.

use crate::backend::StorageBackend;
use crate::batch::{BatchOp, WriteBatch};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Table name → (key → row).
pub(crate) type Tables = BTreeMap<String, BTreeMap<String, Vec<u8>>>;

/// Rejects batches that name an empty table.
pub(crate) fn check_tables(batch: &WriteBatch) -> StorageResult<()> {
    for op in batch.ops() {
        let (BatchOp::Put { table, .. } | BatchOp::Delete { table, .. } | BatchOp::Clear { table }) = op;
        if table.is_empty() {
            return Err(StorageError::InvalidTable(table.clone()));
        }
    }
    Ok(())
}

/// Checks every precondition of `batch` against `tables`.
pub(crate) fn preconditions_hold(tables: &Tables, batch: &WriteBatch) -> bool {
    batch.preconditions().iter().all(|pre| {
        let current = tables.get(&pre.table).and_then(|rows| rows.get(&pre.key));
        current == pre.expected.as_ref()
    })
}

/// Applies the operations of `batch` to `tables`. Preconditions must have
/// been checked by the caller under the same lock.
pub(crate) fn apply_ops(tables: &mut Tables, batch: WriteBatch) {
    for op in batch.ops {
        match op {
            BatchOp::Put { table, key, value } => {
                tables.entry(table).or_default().insert(key, value);
            }
            BatchOp::Delete { table, key } => {
                if let Some(rows) = tables.get_mut(&table) {
                    rows.remove(&key);
                }
            }
            BatchOp::Clear { table } => {
                tables.remove(&table);
            }
        }
    }
}

pub(crate) fn scan_rows(tables: &Tables, table: &str, prefix: &str) -> Vec<(String, Vec<u8>)> {
    tables
        .get(table)
        .map(|rows| {
            rows.range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// An in-memory storage backend.
///
/// This backend stores all tables in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral stores that don't need persistence
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads and
/// execution contexts behind an `Arc`.
///
/// # Example
///
/// ```rust
/// use fieldsync_storage::{InMemoryBackend, StorageBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.put("phrases", "p-1", b"data".to_vec()).unwrap();
/// assert_eq!(backend.scan("phrases").unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    tables: RwLock<Tables>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the names of all non-empty tables.
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .read()
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns the number of rows in a table.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, BTreeMap::len)
    }
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, table: &str, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|rows| rows.get(key))
            .cloned())
    }

    fn scan(&self, table: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(scan_rows(&self.tables.read(), table, ""))
    }

    fn scan_prefix(&self, table: &str, prefix: &str) -> StorageResult<Vec<(String, Vec<u8>)>> {
        Ok(scan_rows(&self.tables.read(), table, prefix))
    }

    fn apply(&self, batch: WriteBatch) -> StorageResult<bool> {
        check_tables(&batch)?;
        let mut tables = self.tables.write();
        if !preconditions_hold(&tables, &batch) {
            return Ok(false);
        }
        apply_ops(&mut tables, batch);
        Ok(true)
    }

    fn flush(&self) -> StorageResult<()> {
        // Nothing is buffered
        Ok(())
    }
}
