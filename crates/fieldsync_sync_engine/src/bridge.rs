//! Background sync bridge.
//!
//! The bridge stands in for a platform background task: it is invoked with
//! a named tag, possibly while no page-side table or orchestrator exists.
//! It works directly on the physical store through its own
//! [`TableHandle`]s and runs the same [`reconcile`](crate::reconcile)
//! pass as the foreground, under its own context id, so the table leases
//! keep the two contexts from reconciling a table at the same time.
//!
//! Page-side live lists do not observe the bridge's writes until their
//! next local write republishes them.

use crate::adapter::RemoteAdapter;
use crate::assets::{AssetStore, ObjectStore, UploadReport};
use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{SyncOrchestrator, SyncOutcome, TableSync};
use fieldsync_core::{Entity, TableHandle};
use fieldsync_storage::StorageBackend;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Tag requesting a reconciliation pass of every registered table.
pub const DATA_SYNC_TAG: &str = "fieldsync-data";

/// Tag requesting a replay of pending asset uploads.
pub const ASSET_SYNC_TAG: &str = "fieldsync-assets";

/// Registers background sync tags with the platform.
pub trait BackgroundRegistrar: Send + Sync {
    /// Asks the platform to invoke the bridge with `tag` when it can.
    fn register(&self, tag: &str);
}

/// A registrar that drops every registration.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistrar;

impl BackgroundRegistrar for NoopRegistrar {
    fn register(&self, _tag: &str) {}
}

/// An in-process registrar feeding a bridge worker.
///
/// Like platform background sync, a tag that is already waiting is not
/// queued twice.
pub struct TagQueue {
    tx: mpsc::UnboundedSender<String>,
    waiting: Mutex<HashSet<String>>,
}

impl TagQueue {
    /// Creates a queue and the receiver a bridge worker consumes.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Arc::new(Self {
            tx,
            waiting: Mutex::new(HashSet::new()),
        });
        (queue, rx)
    }

    /// Marks `tag` as taken by the worker, so new registrations queue it again.
    pub fn take(&self, tag: &str) {
        self.waiting.lock().remove(tag);
    }

    /// Tags registered but not yet taken.
    pub fn waiting(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.waiting.lock().iter().cloned().collect();
        tags.sort();
        tags
    }
}

impl BackgroundRegistrar for TagQueue {
    fn register(&self, tag: &str) {
        if !self.waiting.lock().insert(tag.to_string()) {
            return;
        }
        if self.tx.send(tag.to_string()).is_err() {
            tracing::debug!(tag, "no bridge worker listening");
            self.waiting.lock().remove(tag);
        }
    }
}

/// What handling one tag did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Every registered table was reconciled.
    Data(Vec<(&'static str, SyncOutcome)>),
    /// Pending asset uploads were replayed.
    Assets(UploadReport),
}

/// Background context running reconciliation and upload replay.
pub struct BackgroundSyncBridge {
    backend: Arc<dyn StorageBackend>,
    config: SyncConfig,
    connectivity: Connectivity,
    tables: Vec<Arc<dyn TableSync>>,
    assets: Option<AssetStore>,
}

impl BackgroundSyncBridge {
    /// Creates a bridge on the shared physical store.
    ///
    /// `config.context_id` must differ from the page context's id.
    pub fn new(backend: Arc<dyn StorageBackend>, config: SyncConfig) -> Self {
        Self {
            backend,
            config,
            connectivity: Connectivity::online(),
            tables: Vec::new(),
            assets: None,
        }
    }

    /// Registers an entity table to reconcile on [`DATA_SYNC_TAG`].
    pub fn with_table<T: Entity>(mut self, adapter: Arc<dyn RemoteAdapter<T>>) -> Self {
        let handle: TableHandle<T> = TableHandle::new(Arc::clone(&self.backend));
        let orchestrator =
            SyncOrchestrator::new(handle, adapter, self.connectivity.clone(), &self.config);
        self.tables.push(Arc::new(orchestrator));
        self
    }

    /// Enables upload replay on [`ASSET_SYNC_TAG`].
    pub fn with_assets(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.assets = Some(AssetStore::new(
            Arc::clone(&self.backend),
            objects,
            &self.config,
        ));
        self
    }

    /// The bridge's context id.
    pub fn context_id(&self) -> &str {
        &self.config.context_id
    }

    /// Names of the registered tables.
    pub fn tables(&self) -> Vec<&'static str> {
        self.tables.iter().map(|t| t.table_name()).collect()
    }

    /// Handles one tag.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTag` for tags the bridge does not own. For the data
    /// tag every table is attempted and the first error is returned, so
    /// the platform retries the tag.
    pub async fn handle_tag(&self, tag: &str) -> SyncResult<BridgeOutcome> {
        match tag {
            DATA_SYNC_TAG => self.sync_tables().await,
            ASSET_SYNC_TAG => self.replay_assets().await,
            other => {
                tracing::warn!(tag = other, "unknown background sync tag");
                Err(SyncError::UnknownTag(other.to_string()))
            }
        }
    }

    async fn sync_tables(&self) -> SyncResult<BridgeOutcome> {
        let mut outcomes = Vec::with_capacity(self.tables.len());
        let mut first_error = None;
        for table in &self.tables {
            match table.sync_with_server().await {
                Ok(outcome) => outcomes.push((table.table_name(), outcome)),
                Err(e) => {
                    tracing::warn!(table = table.table_name(), error = %e, "background pass failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(BridgeOutcome::Data(outcomes)),
        }
    }

    async fn replay_assets(&self) -> SyncResult<BridgeOutcome> {
        match &self.assets {
            Some(assets) => Ok(BridgeOutcome::Assets(assets.upload_pending().await?)),
            None => Ok(BridgeOutcome::Assets(UploadReport::default())),
        }
    }

    /// Spawns a worker handling tags from a [`TagQueue`] until the queue
    /// is dropped.
    pub fn spawn_worker(
        self: Arc<Self>,
        queue: Arc<TagQueue>,
        mut rx: mpsc::UnboundedReceiver<String>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(tag) = rx.recv().await {
                queue.take(&tag);
                match self.handle_tag(&tag).await {
                    Ok(outcome) => tracing::debug!(tag = %tag, ?outcome, "background tag handled"),
                    Err(e) => tracing::warn!(tag = %tag, error = %e, "background tag failed"),
                }
            }
        })
    }
}
