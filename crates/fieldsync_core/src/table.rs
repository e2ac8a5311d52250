//! Raw table handle over the physical store.
//!
//! [`TableHandle`] is the only code that knows how records are laid out in
//! the backend: one row per record keyed by id, plus a companion index
//! table written in the same atomic batch. It performs no sync triggering;
//! [`crate::EntityTable`] wraps it for application code, and the
//! reconciliation pass and the background bridge use it directly.

use crate::change_feed::ChangeFeed;
use crate::codec::{decode_row, encode_row};
use crate::error::{CoreError, CoreResult};
use crate::record::{index_timestamp, Entity, LocalRow, Record, Timestamp};
use crate::status::SyncStatus;
use fieldsync_storage::{StorageBackend, WriteBatch};
use std::marker::PhantomData;
use std::sync::Arc;

const STATUS_PREFIX: &str = "s/";
const UPDATED_PREFIX: &str = "u/";
const TOMBSTONE_PREFIX: &str = "t/";

/// A decoded row together with the exact bytes it was read from.
///
/// Conditional writes compare against the raw bytes, so a row that changed
/// after it was read is never silently overwritten.
#[derive(Debug, Clone)]
pub struct VersionedRow<T> {
    /// The decoded row.
    pub row: LocalRow<T>,
    raw: Vec<u8>,
}

impl<T> VersionedRow<T> {
    /// Record id.
    pub fn id(&self) -> &str {
        self.row.id()
    }

    /// The record.
    pub fn record(&self) -> &Record<T> {
        &self.row.record
    }
}

/// Typed access to one entity table on a shared backend.
pub struct TableHandle<T: Entity> {
    backend: Arc<dyn StorageBackend>,
    feed: Option<Arc<ChangeFeed>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for TableHandle<T> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            feed: self.feed.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> TableHandle<T> {
    /// Creates a handle without change notifications.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            feed: None,
            _marker: PhantomData,
        }
    }

    /// Attaches a change feed notified after every committed write.
    pub fn with_feed(mut self, feed: Arc<ChangeFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Physical table name.
    pub fn table_name(&self) -> &'static str {
        T::TABLE
    }

    /// The shared backend.
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// The attached change feed, if any.
    pub fn feed(&self) -> Option<&Arc<ChangeFeed>> {
        self.feed.as_ref()
    }

    fn index_table() -> String {
        format!("{}#idx", T::TABLE)
    }

    fn index_keys(row: &LocalRow<T>) -> Vec<String> {
        let id = &row.record.id;
        let mut keys = vec![
            format!("{}{}/{}", STATUS_PREFIX, row.record.sync_status.as_str(), id),
            format!(
                "{}{}/{}",
                UPDATED_PREFIX,
                index_timestamp(&row.record.updated_at),
                id
            ),
        ];
        if row.is_tombstoned() {
            keys.push(format!("{}{}", TOMBSTONE_PREFIX, id));
        }
        keys
    }

    fn decode(&self, raw: Vec<u8>) -> CoreResult<VersionedRow<T>> {
        let row = decode_row(T::TABLE, &raw)?;
        Ok(VersionedRow { row, raw })
    }

    fn ids_under(&self, prefix: &str) -> CoreResult<Vec<String>> {
        Ok(self
            .backend
            .scan_prefix(&Self::index_table(), prefix)?
            .into_iter()
            .filter_map(|(key, _)| key.rsplit('/').next().map(str::to_string))
            .collect())
    }

    /// Writes `new` in place of `current` (absent when `None`), index
    /// included, only if the stored bytes still equal `current`.
    fn write(
        &self,
        id: &str,
        current: Option<&VersionedRow<T>>,
        new: Option<&LocalRow<T>>,
    ) -> CoreResult<bool> {
        let index = Self::index_table();
        let mut batch = WriteBatch::new();
        batch.expect(T::TABLE, id, current.map(|c| c.raw.clone()));

        if let Some(current) = current {
            for key in Self::index_keys(&current.row) {
                batch.delete(&index, &key);
            }
        }
        match new {
            Some(row) => {
                batch.put(T::TABLE, id, encode_row(T::TABLE, row)?);
                for key in Self::index_keys(row) {
                    batch.put(&index, &key, Vec::new());
                }
            }
            None => {
                batch.delete(T::TABLE, id);
            }
        }

        let applied = self.backend.apply(batch)?;
        if applied {
            if let Some(feed) = &self.feed {
                feed.notify();
            }
        }
        Ok(applied)
    }

    /// Reads one row, tombstoned or not.
    pub fn versioned(&self, id: &str) -> CoreResult<Option<VersionedRow<T>>> {
        self.backend
            .get(T::TABLE, id)?
            .map(|raw| self.decode(raw))
            .transpose()
    }

    /// Reads one row, tombstoned or not.
    pub fn row(&self, id: &str) -> CoreResult<Option<LocalRow<T>>> {
        Ok(self.versioned(id)?.map(|v| v.row))
    }

    /// Reads every row, tombstones included, ordered by id.
    pub fn versioned_rows(&self) -> CoreResult<Vec<VersionedRow<T>>> {
        self.backend
            .scan(T::TABLE)?
            .into_iter()
            .map(|(_, raw)| self.decode(raw))
            .collect()
    }

    /// Reads every non-tombstoned record, ordered by id.
    pub fn records(&self) -> CoreResult<Vec<Record<T>>> {
        Ok(self
            .versioned_rows()?
            .into_iter()
            .filter(|v| !v.row.is_tombstoned())
            .map(|v| v.row.record)
            .collect())
    }

    /// Number of non-tombstoned records.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.records()?.len())
    }

    /// Returns true if there are no non-tombstoned records.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Tombstoned rows awaiting a remote delete, via the index.
    pub fn tombstoned(&self) -> CoreResult<Vec<VersionedRow<T>>> {
        let mut rows = Vec::new();
        for id in self.ids_under(TOMBSTONE_PREFIX)? {
            if let Some(row) = self.versioned(&id)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Ids of rows currently in `status`, via the index.
    pub fn ids_with_status(&self, status: SyncStatus) -> CoreResult<Vec<String>> {
        self.ids_under(&format!("{}{}/", STATUS_PREFIX, status.as_str()))
    }

    /// Non-tombstoned records with `updated_at > since`, oldest first.
    pub fn modified_since(&self, since: Timestamp) -> CoreResult<Vec<Record<T>>> {
        let floor = format!("{}{}", UPDATED_PREFIX, index_timestamp(&since));
        let keys = self
            .backend
            .scan_prefix(&Self::index_table(), UPDATED_PREFIX)?;

        let mut records = Vec::new();
        for (key, _) in keys {
            // Keys are "u/<ts>/<id>"; compare on the "u/<ts>" part
            let Some((stamp, id)) = key.rsplit_once('/') else {
                continue;
            };
            if stamp <= floor.as_str() {
                continue;
            }
            if let Some(row) = self.row(id)? {
                if !row.is_tombstoned() {
                    records.push(row.record);
                }
            }
        }
        Ok(records)
    }

    /// Inserts a new row.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a row with the same id is stored,
    /// tombstoned or not.
    pub fn insert(&self, row: &LocalRow<T>) -> CoreResult<()> {
        if self.write(&row.record.id, None, Some(row))? {
            Ok(())
        } else {
            Err(CoreError::AlreadyExists {
                table: T::TABLE.to_string(),
                id: row.record.id.clone(),
            })
        }
    }

    /// Replaces `current` with `new` (or removes it for `None`) if the row
    /// has not changed since `current` was read.
    ///
    /// Returns `Ok(false)` when the row changed in the meantime.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the status change is not a legal
    /// transition.
    pub fn replace(&self, current: &VersionedRow<T>, new: Option<&LocalRow<T>>) -> CoreResult<bool> {
        if let Some(next) = new {
            let from = current.row.record.sync_status;
            let to = next.record.sync_status;
            if from != to && !from.can_transition_to(to) {
                return Err(CoreError::InvalidState {
                    table: T::TABLE.to_string(),
                    id: current.id().to_string(),
                    from,
                    to,
                });
            }
        }
        self.write(current.id(), Some(current), new)
    }

    /// Read-modify-write of one row.
    ///
    /// Returns `Ok(None)` if the row does not exist. `f` may reject the
    /// change by returning an error, which is passed through.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if another writer changed the row between the
    /// read and the write.
    pub fn modify<F>(&self, id: &str, f: F) -> CoreResult<Option<LocalRow<T>>>
    where
        F: FnOnce(&mut LocalRow<T>) -> CoreResult<()>,
    {
        let Some(current) = self.versioned(id)? else {
            return Ok(None);
        };
        let mut next = current.row.clone();
        f(&mut next)?;
        if self.replace(&current, Some(&next))? {
            Ok(Some(next))
        } else {
            Err(CoreError::Conflict {
                table: T::TABLE.to_string(),
                id: id.to_string(),
            })
        }
    }

    /// Removes every row and index entry of the table.
    pub fn clear(&self) -> CoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.clear(T::TABLE).clear(&Self::index_table());
        self.backend.apply(batch)?;
        if let Some(feed) = &self.feed {
            feed.notify();
        }
        Ok(())
    }
}
