//! Serialized, lease-guarded reconciliation of one entity table.

use crate::adapter::RemoteAdapter;
use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::reconcile::{lease_holder, reconcile_leased, PassReport};
use async_trait::async_trait;
use fieldsync_core::{Entity, SyncLease, TableHandle};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// What a call to `sync_with_server` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// A pass ran to completion.
    Completed(PassReport),
    /// Another pass was already running in this context.
    Skipped,
}

impl SyncOutcome {
    /// The report of a completed pass.
    pub fn report(&self) -> Option<&PassReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Skipped => None,
        }
    }
}

/// Statistics about sync passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that ran to completion.
    pub passes_completed: u64,
    /// Calls that found a pass already running.
    pub passes_skipped: u64,
    /// Passes that returned an error (offline, lease, pull, store).
    pub passes_failed: u64,
    /// Rows pulled from the remote.
    pub records_pulled: u64,
    /// Rows the remote accepted.
    pub records_pushed: u64,
    /// Tombstones removed after a confirmed delete.
    pub records_deleted: u64,
    /// Per-record push failures.
    pub push_failures: u64,
    /// Per-record delete failures.
    pub delete_failures: u64,
    /// When the last pass completed.
    pub last_sync_time: Option<Instant>,
    /// Duration of the last completed pass.
    pub last_duration: Option<Duration>,
    /// Last error message.
    pub last_error: Option<String>,
}

impl SyncStats {
    fn record_pass(&mut self, report: &PassReport, elapsed: Duration) {
        self.passes_completed += 1;
        self.records_pulled += report.pulled as u64;
        self.records_pushed += report.pushed as u64;
        self.records_deleted += report.deleted as u64;
        self.push_failures += report.push_failures as u64;
        self.delete_failures += report.delete_failures as u64;
        self.last_sync_time = Some(Instant::now());
        self.last_duration = Some(elapsed);
        self.last_error = None;
    }
}

/// Type-erased view of an orchestrator, so schedulers and the background
/// bridge can drive tables of different entity types.
#[async_trait]
pub trait TableSync: Send + Sync {
    /// Physical table name.
    fn table_name(&self) -> &'static str;

    /// Runs one guarded pass.
    async fn sync_with_server(&self) -> SyncResult<SyncOutcome>;

    /// Accumulated statistics.
    fn stats(&self) -> SyncStats;
}

/// Runs reconciliation passes for one table on behalf of one execution
/// context.
///
/// Within the context, passes are serialized by a mutex that is only ever
/// `try_lock`ed: a call that finds a pass running returns
/// [`SyncOutcome::Skipped`] instead of queueing. Across contexts, each
/// pass holds the table's [`SyncLease`].
pub struct SyncOrchestrator<T: Entity> {
    table: TableHandle<T>,
    adapter: Arc<dyn RemoteAdapter<T>>,
    connectivity: Connectivity,
    lease: SyncLease,
    running: tokio::sync::Mutex<()>,
    stats: RwLock<SyncStats>,
}

impl<T: Entity> SyncOrchestrator<T> {
    /// Creates an orchestrator for `table`.
    pub fn new(
        table: TableHandle<T>,
        adapter: Arc<dyn RemoteAdapter<T>>,
        connectivity: Connectivity,
        config: &SyncConfig,
    ) -> Self {
        let lease = SyncLease::new(
            Arc::clone(table.backend()),
            T::TABLE,
            config.context_id.clone(),
            config.lease_ttl,
        );
        Self {
            table,
            adapter,
            connectivity,
            lease,
            running: tokio::sync::Mutex::new(()),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// The table being reconciled.
    pub fn table(&self) -> &TableHandle<T> {
        &self.table
    }

    /// The connectivity flag consulted before each pass.
    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a pass is running in this context.
    pub fn is_syncing(&self) -> bool {
        self.running.try_lock().is_err()
    }

    fn fail(&self, error: SyncError) -> SyncResult<SyncOutcome> {
        let mut stats = self.stats.write();
        stats.passes_failed += 1;
        stats.last_error = Some(error.to_string());
        Err(error)
    }

    /// Runs one reconciliation pass.
    ///
    /// Safe to call repeatedly; with no intervening changes a second call
    /// leaves the table as the first one did.
    ///
    /// # Errors
    ///
    /// - `Offline` if connectivity is down (checked before anything else)
    /// - `LeaseHeld` if another context is reconciling this table, or took
    ///   the lease over while this pass was running
    /// - `Remote` if the pull failed
    /// - `Core` for local store failures
    pub async fn sync_with_server(&self) -> SyncResult<SyncOutcome> {
        if !self.connectivity.is_online() {
            tracing::debug!(table = T::TABLE, "offline, pass not started");
            return self.fail(SyncError::Offline);
        }

        let Ok(_running) = self.running.try_lock() else {
            tracing::debug!(table = T::TABLE, "pass already running, skipped");
            self.stats.write().passes_skipped += 1;
            return Ok(SyncOutcome::Skipped);
        };

        let mut lease = match self.lease.try_acquire() {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                let holder = lease_holder(&self.lease);
                tracing::warn!(table = T::TABLE, holder = %holder, "sync lease held elsewhere");
                return self.fail(SyncError::LeaseHeld {
                    table: T::TABLE.to_string(),
                    holder,
                });
            }
            Err(e) => return self.fail(e.into()),
        };

        let start = Instant::now();
        let result =
            reconcile_leased(&self.table, self.adapter.as_ref(), &self.lease, &mut lease).await;

        if let Err(e) = lease.release() {
            tracing::warn!(table = T::TABLE, error = %e, "failed to release sync lease");
        }

        match result {
            Ok(report) => {
                self.stats.write().record_pass(&report, start.elapsed());
                Ok(SyncOutcome::Completed(report))
            }
            Err(e) => self.fail(e),
        }
    }
}

#[async_trait]
impl<T: Entity> TableSync for SyncOrchestrator<T> {
    fn table_name(&self) -> &'static str {
        T::TABLE
    }

    async fn sync_with_server(&self) -> SyncResult<SyncOutcome> {
        SyncOrchestrator::sync_with_server(self).await
    }

    fn stats(&self) -> SyncStats {
        SyncOrchestrator::stats(self)
    }
}
