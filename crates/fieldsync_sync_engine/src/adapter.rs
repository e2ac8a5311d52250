//! Remote adapter contract and a scriptable in-memory adapter.

use crate::error::RemoteError;
use async_trait::async_trait;
use fieldsync_core::{next_timestamp, Entity, Record, RemoteRecord, Timestamp};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

/// What a remote adapter call returned.
///
/// Older adapters hand back the bare value and signal failure by panicking;
/// newer ones return a `Result`. The engine accepts both.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    /// A bare success value.
    Bare(T),
    /// An explicit result.
    Checked(Result<T, RemoteError>),
}

impl<T> Reply<T> {
    /// A successful explicit result.
    pub fn ok(value: T) -> Self {
        Reply::Checked(Ok(value))
    }

    /// A failed explicit result.
    pub fn err(error: RemoteError) -> Self {
        Reply::Checked(Err(error))
    }

    /// Normalizes both shapes into a `Result`.
    pub fn into_result(self) -> Result<T, RemoteError> {
        match self {
            Reply::Bare(value) => Ok(value),
            Reply::Checked(result) => result,
        }
    }
}

impl<T> From<Result<T, RemoteError>> for Reply<T> {
    fn from(result: Result<T, RemoteError>) -> Self {
        Reply::Checked(result)
    }
}

/// Per-entity remote operations.
///
/// Implementations are expected to be safe to retry; the engine does not
/// deduplicate in-flight requests beyond its own reentrancy guard.
#[async_trait]
pub trait RemoteAdapter<T: Entity>: Send + Sync {
    /// Every remote record of the entity.
    async fn list(&self) -> Reply<Vec<RemoteRecord<T>>>;

    /// Creates the record remotely and returns the stored copy.
    async fn create(&self, record: &Record<T>) -> Reply<RemoteRecord<T>>;

    /// Updates the record remotely and returns the stored copy.
    async fn update(&self, record: &Record<T>) -> Reply<RemoteRecord<T>>;

    /// Deletes the record remotely and returns its id.
    async fn delete(&self, id: &str) -> Reply<String>;
}

/// Remote operation kinds, for scripting and inspecting [`MockAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    /// `list`
    List,
    /// `create`
    Create,
    /// `update`
    Update,
    /// `delete`
    Delete,
}

/// An in-memory remote service for testing.
///
/// Behaves like a well-formed service that stamps `updated_at` on every
/// write. Individual calls can be scripted to fail or panic.
pub struct MockAdapter<T> {
    records: Mutex<BTreeMap<String, RemoteRecord<T>>>,
    failures: Mutex<HashMap<(RemoteOp, Option<String>), RemoteError>>,
    panics: Mutex<HashSet<(RemoteOp, Option<String>)>>,
    calls: Mutex<Vec<(RemoteOp, Option<String>)>>,
    clock: Mutex<Option<Timestamp>>,
    bare: AtomicBool,
}

impl<T: Entity> MockAdapter<T> {
    /// Creates an empty remote.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            failures: Mutex::new(HashMap::new()),
            panics: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            clock: Mutex::new(None),
            bare: AtomicBool::new(false),
        }
    }

    /// Stores a record remotely as if another device had written it.
    pub fn seed(&self, record: RemoteRecord<T>) {
        self.records.lock().insert(record.id.clone(), record);
    }

    /// Stores `data` under `id` with the given remote timestamp.
    pub fn seed_with(&self, id: &str, data: T, updated_at: Timestamp) {
        self.seed(RemoteRecord {
            id: id.to_string(),
            created_at: Some(updated_at),
            updated_at,
            data,
        });
    }

    /// The remote copy of a record.
    pub fn remote(&self, id: &str) -> Option<RemoteRecord<T>> {
        self.records.lock().get(id).cloned()
    }

    /// Every remote record, ordered by id.
    pub fn records(&self) -> Vec<RemoteRecord<T>> {
        self.records.lock().values().cloned().collect()
    }

    /// Makes `op` fail with `error`, for one id or (with `None`) every call.
    pub fn fail(&self, op: RemoteOp, id: Option<&str>, error: RemoteError) {
        self.failures
            .lock()
            .insert((op, id.map(str::to_string)), error);
    }

    /// Makes `op` panic, for one id or (with `None`) every call.
    pub fn panic_on(&self, op: RemoteOp, id: Option<&str>) {
        self.panics.lock().insert((op, id.map(str::to_string)));
    }

    /// Removes every scripted failure and panic.
    pub fn heal(&self) {
        self.failures.lock().clear();
        self.panics.lock().clear();
    }

    /// Returns bare values instead of `Result`s on success.
    pub fn set_bare(&self, bare: bool) {
        self.bare.store(bare, Ordering::SeqCst);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(RemoteOp, Option<String>)> {
        self.calls.lock().clone()
    }

    /// Number of calls of one kind.
    pub fn call_count(&self, op: RemoteOp) -> usize {
        self.calls.lock().iter().filter(|(o, _)| *o == op).count()
    }

    /// Forgets the call log.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn enter(&self, op: RemoteOp, id: Option<&str>) -> Result<(), RemoteError> {
        let id = id.map(str::to_string);
        self.calls.lock().push((op, id.clone()));

        let panics = {
            let panics = self.panics.lock();
            panics.contains(&(op, None)) || panics.contains(&(op, id.clone()))
        };
        if panics {
            panic!("scripted {op:?} panic for {id:?}");
        }

        let failures = self.failures.lock();
        if let Some(error) = failures.get(&(op, id)).or_else(|| failures.get(&(op, None))) {
            return Err(error.clone());
        }
        Ok(())
    }

    fn stamp(&self) -> Timestamp {
        let mut clock = self.clock.lock();
        let now = next_timestamp(*clock);
        *clock = Some(now);
        now
    }

    fn reply<V>(&self, result: Result<V, RemoteError>) -> Reply<V> {
        match result {
            Ok(value) if self.bare.load(Ordering::SeqCst) => Reply::Bare(value),
            other => Reply::Checked(other),
        }
    }
}

impl<T: Entity> Default for MockAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> RemoteAdapter<T> for MockAdapter<T> {
    async fn list(&self) -> Reply<Vec<RemoteRecord<T>>> {
        let result = self.enter(RemoteOp::List, None).map(|()| self.records());
        self.reply(result)
    }

    async fn create(&self, record: &Record<T>) -> Reply<RemoteRecord<T>> {
        let result = self.enter(RemoteOp::Create, Some(&record.id)).and_then(|()| {
            let mut records = self.records.lock();
            if records.contains_key(&record.id) {
                return Err(RemoteError::rejected(format!("{} already exists", record.id)));
            }
            let now = self.stamp();
            let stored = RemoteRecord {
                id: record.id.clone(),
                created_at: Some(now),
                updated_at: now,
                data: record.data.clone(),
            };
            records.insert(stored.id.clone(), stored.clone());
            Ok(stored)
        });
        self.reply(result)
    }

    async fn update(&self, record: &Record<T>) -> Reply<RemoteRecord<T>> {
        let result = self.enter(RemoteOp::Update, Some(&record.id)).and_then(|()| {
            let mut records = self.records.lock();
            let Some(existing) = records.get(&record.id) else {
                return Err(RemoteError::not_found(format!("{} does not exist", record.id)));
            };
            let stored = RemoteRecord {
                id: record.id.clone(),
                created_at: existing.created_at,
                updated_at: self.stamp(),
                data: record.data.clone(),
            };
            records.insert(stored.id.clone(), stored.clone());
            Ok(stored)
        });
        self.reply(result)
    }

    async fn delete(&self, id: &str) -> Reply<String> {
        let result = self.enter(RemoteOp::Delete, Some(id)).and_then(|()| {
            match self.records.lock().remove(id) {
                Some(_) => Ok(id.to_string()),
                None => Err(RemoteError::not_found(format!("{id} does not exist"))),
            }
        });
        self.reply(result)
    }
}
