//! Test fixtures and sync helpers.
//!
//! [`SyncHarness`] wires one entity table to a [`MockAdapter`] through a
//! [`SyncOrchestrator`], on in-memory or file-backed storage.

use chrono::{Duration, TimeZone, Utc};
use fieldsync_core::models::{Element, Location, Phrase, Survey};
use fieldsync_core::{Entity, EntityTable, SyncStatus, Timestamp};
use fieldsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use fieldsync_sync_engine::{
    BackgroundSyncBridge, Connectivity, MockAdapter, RemoteAdapter, SyncConfig, SyncOrchestrator,
    SyncOutcome, SyncResult,
};
use std::sync::Arc;
use tempfile::TempDir;

/// Context id used by harness orchestrators.
pub const PAGE_CONTEXT: &str = "page";

/// Context id used by harness bridges.
pub const BACKGROUND_CONTEXT: &str = "background";

/// A table, its mock remote and an orchestrator, sharing one backend.
pub struct SyncHarness<T: Entity> {
    /// Shared physical store.
    pub backend: Arc<dyn StorageBackend>,
    /// Connectivity seen by the orchestrator (starts online).
    pub connectivity: Connectivity,
    /// The mock remote service.
    pub remote: Arc<MockAdapter<T>>,
    /// The application-facing table.
    pub table: EntityTable<T>,
    /// Orchestrator for `table`.
    pub orchestrator: Arc<SyncOrchestrator<T>>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl<T: Entity> SyncHarness<T> {
    /// Creates a harness on in-memory storage.
    pub fn memory() -> Self {
        Self::on(Arc::new(InMemoryBackend::new()), Arc::new(MockAdapter::new()), None)
    }

    /// Creates a harness on file-backed storage in a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let backend = FileBackend::open_with_create_dirs(&temp_dir.path().join("fieldsync.db"))
            .expect("Failed to open file backend");
        Self::on(Arc::new(backend), Arc::new(MockAdapter::new()), Some(temp_dir))
    }

    /// Creates a second page-side harness on the same store and remote,
    /// as another tab of the same app would.
    pub fn sibling(&self, context_id: &str) -> Self {
        let table = EntityTable::new(Arc::clone(&self.backend));
        let remote: Arc<dyn RemoteAdapter<T>> = self.remote.clone();
        let orchestrator = SyncOrchestrator::new(
            table.handle().clone(),
            remote,
            self.connectivity.clone(),
            &SyncConfig::new(context_id),
        );
        Self {
            backend: Arc::clone(&self.backend),
            connectivity: self.connectivity.clone(),
            remote: Arc::clone(&self.remote),
            table,
            orchestrator: Arc::new(orchestrator),
            _temp_dir: None,
        }
    }

    fn on(backend: Arc<dyn StorageBackend>, remote: Arc<MockAdapter<T>>, temp_dir: Option<TempDir>) -> Self {
        let connectivity = Connectivity::online();
        let table = EntityTable::new(Arc::clone(&backend));
        let adapter: Arc<dyn RemoteAdapter<T>> = remote.clone();
        let orchestrator = SyncOrchestrator::new(
            table.handle().clone(),
            adapter,
            connectivity.clone(),
            &SyncConfig::new(PAGE_CONTEXT),
        );
        Self {
            backend,
            connectivity,
            remote,
            table,
            orchestrator: Arc::new(orchestrator),
            _temp_dir: temp_dir,
        }
    }

    /// Runs one pass through the orchestrator.
    pub async fn sync(&self) -> SyncResult<SyncOutcome> {
        self.orchestrator.sync_with_server().await
    }

    /// Builds a background bridge for this table on the same store and remote.
    pub fn bridge(&self) -> BackgroundSyncBridge {
        let remote: Arc<dyn RemoteAdapter<T>> = self.remote.clone();
        BackgroundSyncBridge::new(Arc::clone(&self.backend), SyncConfig::new(BACKGROUND_CONTEXT))
            .with_table(remote)
    }

    /// The stored status of `id`, including tombstoned rows.
    pub fn status(&self, id: &str) -> Option<SyncStatus> {
        self.table
            .handle()
            .row(id)
            .expect("Failed to read row")
            .map(|row| row.record.sync_status)
    }

    /// The stored `sync_error` of `id`.
    pub fn sync_error(&self, id: &str) -> Option<String> {
        self.table
            .handle()
            .row(id)
            .expect("Failed to read row")
            .and_then(|row| row.record.sync_error)
    }

    /// Returns true if a row (live or tombstoned) exists for `id`.
    pub fn has_row(&self, id: &str) -> bool {
        self.table.handle().row(id).expect("Failed to read row").is_some()
    }
}

/// Installs a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// A fixed reference instant, 2024-05-01T09:00:00Z.
pub fn epoch() -> Timestamp {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0)
        .single()
        .expect("valid fixture timestamp")
}

/// A timestamp `secs` seconds after [`epoch`].
pub fn at(secs: i64) -> Timestamp {
    epoch() + Duration::seconds(secs)
}

/// A survey with the given title.
pub fn survey(title: &str) -> Survey {
    let mut survey = Survey::new(title);
    survey.form = serde_json::json!({ "sections": [] });
    survey
}

/// A roof condition phrase.
pub fn phrase(name: &str) -> Phrase {
    Phrase::new("roof", name, "Observed from ground level.")
}

/// An element of survey `s-1`, section `sec-1`.
pub fn element(name: &str) -> Element {
    Element {
        survey_id: "s-1".to_string(),
        section_id: "sec-1".to_string(),
        name: name.to_string(),
        order: 0,
        description: None,
    }
}

/// A top-level location of survey `s-1`.
pub fn location(name: &str) -> Location {
    Location {
        survey_id: "s-1".to_string(),
        name: name.to_string(),
        parent_id: None,
    }
}
