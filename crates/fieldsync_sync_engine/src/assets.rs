//! Immutable binary assets (photographs, sketches).
//!
//! Assets skip the reconciliation pass. A new asset is kept in a local
//! pending table as `Queued` and uploaded on a spawned task; once the
//! object store confirms it, the local copy is dropped and the object
//! store is authoritative. A failed upload stays local as `Failed` until
//! [`AssetStore::upload_pending`] replays it. Every new asset registers
//! [`ASSET_SYNC_TAG`] so the background bridge replays it even if this
//! context goes away.

use crate::adapter::Reply;
use crate::bridge::{BackgroundRegistrar, NoopRegistrar, ASSET_SYNC_TAG};
use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::reconcile::guarded;
use async_trait::async_trait;
use bytes::Bytes;
use fieldsync_core::{
    CoreError, CoreResult, Entity, LocalRow, Record, SyncStatus, TableHandle, VersionedRow,
};
use fieldsync_storage::StorageBackend;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Descriptive data stored alongside an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetMetadata {
    /// MIME type.
    pub content_type: String,
    /// Free-form attributes (survey id, caption, ...).
    pub attributes: BTreeMap<String, String>,
}

impl AssetMetadata {
    /// Metadata with only a content type.
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// An object as the object store describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object path.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Stored metadata.
    pub metadata: AssetMetadata,
}

/// An asset as returned by [`AssetStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    /// Object path.
    pub path: String,
    /// `Queued`/`Failed` for local pending copies, `Synced` for remote ones.
    pub status: SyncStatus,
    /// Size in bytes.
    pub size: u64,
    /// Stored metadata.
    pub metadata: AssetMetadata,
    /// Content, when it was read.
    pub bytes: Option<Bytes>,
    /// Time-limited access URL for remote objects.
    pub url: Option<String>,
    /// Last upload error of a `Failed` pending copy.
    pub sync_error: Option<String>,
}

/// Remote blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores an object, replacing any previous content.
    async fn put(&self, path: &str, bytes: Bytes, metadata: &AssetMetadata) -> Result<(), RemoteError>;

    /// Describes an object.
    async fn head(&self, path: &str) -> Result<ObjectInfo, RemoteError>;

    /// A URL granting read access for `ttl`.
    async fn presign(&self, path: &str, ttl: Duration) -> Result<String, RemoteError>;

    /// Reads an object's content.
    async fn fetch(&self, path: &str) -> Result<Bytes, RemoteError>;

    /// Deletes an object.
    async fn delete(&self, path: &str) -> Result<(), RemoteError>;

    /// Objects whose path starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, RemoteError>;
}

/// A locally held asset awaiting upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAsset {
    /// Object path.
    pub path: String,
    /// Metadata to upload with the content.
    pub metadata: AssetMetadata,
    /// Content.
    pub bytes: Bytes,
}

impl Entity for PendingAsset {
    const TABLE: &'static str = "__assets";

    fn validate(&self) -> CoreResult<()> {
        if self.path.is_empty() {
            return Err(CoreError::Validation("asset path must not be empty".into()));
        }
        Ok(())
    }
}

/// Row key for a path; record ids may not contain '/'.
fn local_id(path: &str) -> String {
    path.replace('%', "%25").replace('/', "%2F")
}

fn pending_asset(record: &Record<PendingAsset>) -> Asset {
    Asset {
        path: record.data.path.clone(),
        status: record.sync_status,
        size: record.data.bytes.len() as u64,
        metadata: record.data.metadata.clone(),
        bytes: Some(record.data.bytes.clone()),
        url: None,
        sync_error: record.sync_error.clone(),
    }
}

fn remote_asset(info: ObjectInfo) -> Asset {
    Asset {
        path: info.path,
        status: SyncStatus::Synced,
        size: info.size,
        metadata: info.metadata,
        bytes: None,
        url: None,
        sync_error: None,
    }
}

/// Counters of an upload replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Uploads confirmed by the object store.
    pub uploaded: usize,
    /// Uploads that failed and stay pending.
    pub failed: usize,
}

/// A started upload.
#[derive(Debug)]
pub struct UploadHandle {
    /// The asset as stored locally.
    pub asset: Asset,
    task: JoinHandle<bool>,
}

impl UploadHandle {
    /// Waits for the upload; returns true if the object store confirmed it.
    ///
    /// Dropping the handle instead leaves the upload running.
    pub async fn finished(self) -> bool {
        self.task.await.unwrap_or(false)
    }
}

/// Local-first store for immutable binary assets.
pub struct AssetStore {
    pending: TableHandle<PendingAsset>,
    objects: Arc<dyn ObjectStore>,
    presign_ttl: Duration,
    registrar: Arc<dyn BackgroundRegistrar>,
}

impl AssetStore {
    /// Creates a store keeping pending uploads in `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>, objects: Arc<dyn ObjectStore>, config: &SyncConfig) -> Self {
        Self {
            pending: TableHandle::new(backend),
            objects,
            presign_ttl: config.presign_ttl,
            registrar: Arc::new(NoopRegistrar),
        }
    }

    /// Sets the registrar told about new assets.
    pub fn with_registrar(mut self, registrar: Arc<dyn BackgroundRegistrar>) -> Self {
        self.registrar = registrar;
        self
    }

    fn asset_error(path: &str, message: impl Into<String>) -> SyncError {
        SyncError::Asset {
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// Stores `bytes` locally as `Queued` and starts uploading it.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Asset` if the path is empty or an upload of the same path
    /// is still pending.
    pub fn create(
        self: &Arc<Self>,
        path: &str,
        bytes: Bytes,
        metadata: AssetMetadata,
    ) -> SyncResult<UploadHandle> {
        let data = PendingAsset {
            path: path.to_string(),
            metadata,
            bytes,
        };
        data.validate()?;

        let record = Record::new(local_id(path), data, SyncStatus::Queued);
        match self.pending.insert(&LocalRow::live(record.clone())) {
            Ok(()) => {}
            Err(CoreError::AlreadyExists { .. }) => {
                return Err(Self::asset_error(path, "an upload is already pending"));
            }
            Err(e) => return Err(e.into()),
        }
        tracing::debug!(path, size = record.data.bytes.len(), "asset stored locally");
        self.registrar.register(ASSET_SYNC_TAG);

        let store = Arc::clone(self);
        let upload_path = path.to_string();
        let task = tokio::spawn(async move {
            match store.upload(&upload_path).await {
                Ok(uploaded) => uploaded,
                Err(e) => {
                    tracing::warn!(path = %upload_path, error = %e, "asset upload aborted");
                    false
                }
            }
        });

        Ok(UploadHandle {
            asset: pending_asset(&record),
            task,
        })
    }

    async fn upload_row(&self, current: &VersionedRow<PendingAsset>) -> SyncResult<bool> {
        let data = &current.record().data;
        let result = guarded("put", async {
            Reply::from(
                self.objects
                    .put(&data.path, data.bytes.clone(), &data.metadata)
                    .await,
            )
        })
        .await;

        match result {
            Ok(()) => {
                if !self.pending.replace(current, None)? {
                    tracing::debug!(path = %data.path, "pending asset changed during upload");
                }
                tracing::info!(path = %data.path, "asset uploaded");
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(path = %data.path, error = %e, "asset upload failed");
                let mut next = current.row.clone();
                next.record.sync_status = SyncStatus::Failed;
                next.record.sync_error = Some(e.to_string());
                self.pending.replace(current, Some(&next))?;
                Ok(false)
            }
        }
    }

    async fn upload(&self, path: &str) -> SyncResult<bool> {
        match self.pending.versioned(&local_id(path))? {
            Some(current) => self.upload_row(&current).await,
            None => Ok(false),
        }
    }

    /// Reads an asset: the local pending copy if there is one, otherwise
    /// the remote object with a presigned URL and its content.
    ///
    /// # Errors
    ///
    /// Returns `Remote` if the object store fails (including `NotFound`).
    pub async fn get(&self, path: &str) -> SyncResult<Asset> {
        if let Some(row) = self.pending.row(&local_id(path))? {
            return Ok(pending_asset(&row.record));
        }

        let info = guarded("head", async { Reply::from(self.objects.head(path).await) }).await?;
        let url = guarded("presign", async {
            Reply::from(self.objects.presign(path, self.presign_ttl).await)
        })
        .await?;
        let bytes = guarded("fetch", async { Reply::from(self.objects.fetch(path).await) }).await?;

        let mut asset = remote_asset(info);
        asset.url = Some(url);
        asset.bytes = Some(bytes);
        Ok(asset)
    }

    /// Deletes the local pending copy if there is one, otherwise the
    /// remote object.
    ///
    /// # Errors
    ///
    /// Returns `Remote` if the remote delete fails.
    pub async fn remove(&self, path: &str) -> SyncResult<()> {
        if let Some(current) = self.pending.versioned(&local_id(path))? {
            if self.pending.replace(&current, None)? {
                tracing::debug!(path, "pending asset discarded");
                return Ok(());
            }
        }
        guarded("delete", async { Reply::from(self.objects.delete(path).await) }).await?;
        tracing::debug!(path, "remote asset deleted");
        Ok(())
    }

    /// Remote objects under `prefix` (as `Synced`) followed by local
    /// pending uploads under it.
    ///
    /// # Errors
    ///
    /// Returns `Remote` if the remote listing fails.
    pub async fn list(&self, prefix: &str) -> SyncResult<Vec<Asset>> {
        let remote = guarded("list", async { Reply::from(self.objects.list(prefix).await) }).await?;
        let mut assets: Vec<Asset> = remote.into_iter().map(remote_asset).collect();
        assets.extend(
            self.pending
                .records()?
                .iter()
                .filter(|r| r.data.path.starts_with(prefix))
                .map(pending_asset),
        );
        Ok(assets)
    }

    /// Replays every pending upload.
    pub async fn upload_pending(&self) -> SyncResult<UploadReport> {
        let mut report = UploadReport::default();
        for current in self.pending.versioned_rows()? {
            if !current.row.needs_push() {
                continue;
            }
            if self.upload_row(&current).await? {
                report.uploaded += 1;
            } else {
                report.failed += 1;
            }
        }
        if report.uploaded + report.failed > 0 {
            tracing::info!(uploaded = report.uploaded, failed = report.failed, "asset replay complete");
        }
        Ok(report)
    }

    /// Number of assets awaiting upload.
    pub fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.pending.len()?)
    }
}

/// An in-memory object store for testing.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, (Bytes, AssetMetadata)>>,
    failing: AtomicBool,
    puts: AtomicUsize,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail as `Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `put` calls that reached the store.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Returns true if an object exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().contains_key(path)
    }

    fn check(&self) -> Result<(), RemoteError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::unavailable("object store unreachable"));
        }
        Ok(())
    }

    fn info(path: &str, bytes: &Bytes, metadata: &AssetMetadata) -> ObjectInfo {
        ObjectInfo {
            path: path.to_string(),
            size: bytes.len() as u64,
            metadata: metadata.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, path: &str, bytes: Bytes, metadata: &AssetMetadata) -> Result<(), RemoteError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.objects
            .lock()
            .insert(path.to_string(), (bytes, metadata.clone()));
        Ok(())
    }

    async fn head(&self, path: &str) -> Result<ObjectInfo, RemoteError> {
        self.check()?;
        self.objects
            .lock()
            .get(path)
            .map(|(bytes, metadata)| Self::info(path, bytes, metadata))
            .ok_or_else(|| RemoteError::not_found(path))
    }

    async fn presign(&self, path: &str, ttl: Duration) -> Result<String, RemoteError> {
        self.check()?;
        Ok(format!("memory://{path}?expires_in={}", ttl.as_secs()))
    }

    async fn fetch(&self, path: &str) -> Result<Bytes, RemoteError> {
        self.check()?;
        self.objects
            .lock()
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| RemoteError::not_found(path))
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        self.check()?;
        self.objects
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| RemoteError::not_found(path))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, RemoteError> {
        self.check()?;
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, (bytes, metadata))| Self::info(path, bytes, metadata))
            .collect())
    }
}
