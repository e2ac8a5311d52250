//! Application-facing entity tables.

use crate::change_feed::ChangeFeed;
use crate::error::{CoreError, CoreResult};
use crate::hook::{MutationHook, MutationKind, NoopHook};
use crate::live::{ListSnapshot, LiveList};
use crate::record::{next_timestamp, Entity, LocalRow, Record, Timestamp};
use crate::status::SyncStatus;
use crate::table::TableHandle;
use fieldsync_storage::StorageBackend;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Typed CRUD over one logical collection.
///
/// Every `add`, `update` and `remove` notifies the table's
/// [`MutationHook`] after the write commits; the sync engine uses this to
/// schedule a debounced reconciliation pass. Deletes are soft: `remove`
/// leaves a tombstone that the next pass turns into a remote delete.
///
/// # Example
///
/// ```rust
/// use fieldsync_core::{EntityTable, SyncStatus};
/// use fieldsync_core::models::Phrase;
/// use fieldsync_storage::InMemoryBackend;
/// use std::sync::Arc;
///
/// let phrases: EntityTable<Phrase> = EntityTable::new(Arc::new(InMemoryBackend::new()));
/// let record = phrases.add("p-1", Phrase::new("roof", "Slipped tiles", "Several tiles have slipped.")).unwrap();
/// assert_eq!(record.sync_status, SyncStatus::Queued);
///
/// phrases.remove("p-1").unwrap();
/// assert!(phrases.get("p-1").is_err());
/// ```
pub struct EntityTable<T: Entity> {
    handle: TableHandle<T>,
    hook: RwLock<Arc<dyn MutationHook>>,
    live: Arc<watch::Sender<ListSnapshot<T>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Entity> EntityTable<T> {
    /// Opens the entity table on a shared backend.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        let feed = Arc::new(ChangeFeed::new());
        let (live, _) = watch::channel(ListSnapshot::pending());
        Self {
            handle: TableHandle::new(backend).with_feed(feed),
            hook: RwLock::new(Arc::new(NoopHook)),
            live: Arc::new(live),
            watcher: Mutex::new(None),
        }
    }

    /// Sets the mutation hook.
    pub fn with_hook(self, hook: Arc<dyn MutationHook>) -> Self {
        self.set_hook(hook);
        self
    }

    /// Replaces the mutation hook.
    pub fn set_hook(&self, hook: Arc<dyn MutationHook>) {
        *self.hook.write() = hook;
    }

    /// The raw handle, sharing this table's change feed.
    pub fn handle(&self) -> &TableHandle<T> {
        &self.handle
    }

    /// Physical table name.
    pub fn name(&self) -> &'static str {
        T::TABLE
    }

    fn notify(&self, kind: MutationKind) {
        let hook = Arc::clone(&self.hook.read());
        hook.mutated(T::TABLE, kind);
    }

    fn not_found(id: &str) -> CoreError {
        CoreError::NotFound {
            table: T::TABLE.to_string(),
            id: id.to_string(),
        }
    }

    fn check_id(id: &str) -> CoreResult<()> {
        if id.is_empty() || id.contains('/') {
            return Err(CoreError::Validation(format!(
                "invalid record id {:?} for table {}",
                id,
                T::TABLE
            )));
        }
        Ok(())
    }

    fn insert_with_status(&self, id: &str, data: T, status: SyncStatus) -> CoreResult<Record<T>> {
        Self::check_id(id)?;
        data.validate()?;
        let record = Record::new(id, data, status);
        self.handle.insert(&LocalRow::live(record.clone()))?;
        Ok(record)
    }

    /// Inserts a new record in `Queued` state.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the id is taken (tombstones included).
    pub fn add(&self, id: &str, data: T) -> CoreResult<Record<T>> {
        let record = self.insert_with_status(id, data, SyncStatus::Queued)?;
        tracing::debug!(table = T::TABLE, id, "record added");
        self.notify(MutationKind::Add);
        Ok(record)
    }

    /// Inserts a local-only `Draft` record. Drafts are never pushed until
    /// a later `update` queues them.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the id is taken.
    pub fn save_draft(&self, id: &str, data: T) -> CoreResult<Record<T>> {
        let record = self.insert_with_status(id, data, SyncStatus::Draft)?;
        tracing::debug!(table = T::TABLE, id, "draft saved");
        Ok(record)
    }

    /// Applies `mutator` to the record's data and queues it for push.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if absent and `InvalidState` if tombstoned.
    pub fn update<F>(&self, id: &str, mutator: F) -> CoreResult<Record<T>>
    where
        F: FnOnce(&mut T),
    {
        let row = self
            .handle
            .modify(id, |row| {
                if row.is_tombstoned() {
                    return Err(CoreError::InvalidState {
                        table: T::TABLE.to_string(),
                        id: id.to_string(),
                        from: SyncStatus::PendingDelete,
                        to: SyncStatus::Queued,
                    });
                }
                mutator(&mut row.record.data);
                row.record.data.validate()?;
                row.record.sync_status = SyncStatus::Queued;
                row.record.sync_error = None;
                row.record.updated_at = next_timestamp(Some(row.record.updated_at));
                Ok(())
            })?
            .ok_or_else(|| Self::not_found(id))?;

        tracing::debug!(table = T::TABLE, id, "record updated");
        self.notify(MutationKind::Update);
        Ok(row.record)
    }

    fn tombstone(row: &mut LocalRow<T>) {
        row.tombstone = true;
        row.record.sync_status = SyncStatus::PendingDelete;
        row.record.sync_error = None;
        row.record.updated_at = next_timestamp(Some(row.record.updated_at));
    }

    /// Marks the record for remote deletion.
    ///
    /// Absent or already tombstoned records are left alone.
    pub fn remove(&self, id: &str) -> CoreResult<()> {
        let Some(current) = self.handle.versioned(id)? else {
            return Ok(());
        };
        if current.row.is_tombstoned() {
            return Ok(());
        }

        let mut next = current.row.clone();
        Self::tombstone(&mut next);
        if !self.handle.replace(&current, Some(&next))? {
            return Err(CoreError::Conflict {
                table: T::TABLE.to_string(),
                id: id.to_string(),
            });
        }

        tracing::debug!(table = T::TABLE, id, "record tombstoned");
        self.notify(MutationKind::Remove);
        Ok(())
    }

    /// Removes every record.
    ///
    /// With `delete_remote`, every row is tombstoned and the next pass
    /// deletes them remotely. Without it, the table is cleared locally and
    /// no sync is requested. Returns the number of rows affected.
    pub fn remove_all(&self, delete_remote: bool) -> CoreResult<usize> {
        if !delete_remote {
            let count = self.handle.versioned_rows()?.len();
            self.handle.clear()?;
            tracing::info!(table = T::TABLE, count, "table cleared locally");
            return Ok(count);
        }

        let mut count = 0;
        for current in self.handle.versioned_rows()? {
            if current.row.is_tombstoned() {
                continue;
            }
            let mut next = current.row.clone();
            Self::tombstone(&mut next);
            if self.handle.replace(&current, Some(&next))? {
                count += 1;
            }
        }

        tracing::info!(table = T::TABLE, count, "table tombstoned");
        if count > 0 {
            self.notify(MutationKind::Remove);
        }
        Ok(count)
    }

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if absent or tombstoned.
    pub fn get(&self, id: &str) -> CoreResult<Record<T>> {
        match self.handle.row(id)? {
            Some(row) if !row.is_tombstoned() => Ok(row.record),
            _ => Err(Self::not_found(id)),
        }
    }

    /// A live list of every non-tombstoned record.
    ///
    /// Inside a Tokio runtime the first call starts a background reader;
    /// until its initial read completes the list reports
    /// `hydrated == false`. Outside a runtime the table is read inline and
    /// the list is hydrated on return, but only a later `list()` call (or
    /// a reader started from a runtime) publishes further writes.
    pub fn list(&self) -> LiveList<T> {
        let rx = self.live.subscribe();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => self.ensure_watcher(&runtime),
            Err(_) => self.publish_now(),
        }
        LiveList::new(rx)
    }

    /// Non-tombstoned, non-archived records, read directly.
    pub fn list_active(&self) -> CoreResult<Vec<Record<T>>> {
        Ok(self
            .handle
            .records()?
            .into_iter()
            .filter(|r| r.sync_status != SyncStatus::Archived)
            .collect())
    }

    /// Soft-retires a record. Archived records stay local and are not pushed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if absent or tombstoned.
    pub fn archive(&self, id: &str) -> CoreResult<Record<T>> {
        let row = self
            .handle
            .modify(id, |row| {
                if row.is_tombstoned() {
                    return Err(Self::not_found(id));
                }
                if row.record.sync_status != SyncStatus::Archived {
                    row.record.sync_status = SyncStatus::Archived;
                    row.record.sync_error = None;
                    row.record.updated_at = next_timestamp(Some(row.record.updated_at));
                }
                Ok(())
            })?
            .ok_or_else(|| Self::not_found(id))?;
        Ok(row.record)
    }

    /// Re-queues a `Failed` record for the next pass.
    ///
    /// A failed remote delete goes back to `PendingDelete`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if absent and `InvalidState` unless `Failed`.
    pub fn retry(&self, id: &str) -> CoreResult<SyncStatus> {
        let row = self
            .handle
            .modify(id, |row| {
                if row.record.sync_status != SyncStatus::Failed {
                    return Err(CoreError::InvalidState {
                        table: T::TABLE.to_string(),
                        id: id.to_string(),
                        from: row.record.sync_status,
                        to: SyncStatus::Queued,
                    });
                }
                row.record.sync_status = if row.tombstone {
                    SyncStatus::PendingDelete
                } else {
                    SyncStatus::Queued
                };
                row.record.sync_error = None;
                Ok(())
            })?
            .ok_or_else(|| Self::not_found(id))?;

        self.notify(MutationKind::Update);
        Ok(row.record.sync_status)
    }

    /// Non-tombstoned records modified after `since`.
    pub fn modified_since(&self, since: Timestamp) -> CoreResult<Vec<Record<T>>> {
        self.handle.modified_since(since)
    }

    /// Number of non-tombstoned records.
    pub fn len(&self) -> CoreResult<usize> {
        self.handle.len()
    }

    /// Returns true if there are no non-tombstoned records.
    pub fn is_empty(&self) -> CoreResult<bool> {
        self.handle.is_empty()
    }

    fn publish_now(&self) {
        match self.handle.records() {
            Ok(items) => {
                self.live.send_replace(ListSnapshot {
                    hydrated: true,
                    items,
                });
            }
            Err(e) => tracing::warn!(table = T::TABLE, error = %e, "live list read failed"),
        }
    }

    fn ensure_watcher(&self, runtime: &tokio::runtime::Handle) {
        let mut slot = self.watcher.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let Some(feed) = self.handle.feed() else {
            return;
        };

        let mut changes = feed.subscribe();
        let handle = self.handle.clone();
        let live = Arc::clone(&self.live);

        *slot = Some(runtime.spawn(async move {
            loop {
                changes.borrow_and_update();
                let reader = handle.clone();
                match tokio::task::spawn_blocking(move || reader.records()).await {
                    Ok(Ok(items)) => {
                        live.send_replace(ListSnapshot {
                            hydrated: true,
                            items,
                        });
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(table = T::TABLE, error = %e, "live list read failed");
                    }
                    Err(e) => {
                        tracing::error!(table = T::TABLE, error = %e, "live list reader panicked");
                    }
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
        }));
    }
}

impl<T: Entity> Drop for EntityTable<T> {
    fn drop(&mut self) {
        if let Some(task) = self.watcher.get_mut().take() {
            task.abort();
        }
    }
}
