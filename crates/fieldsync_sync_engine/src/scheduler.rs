//! Timer and connectivity driven sync.

use crate::assets::AssetStore;
use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::orchestrator::{SyncOutcome, TableSync};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Logs the result of a triggered pass at a level matching its severity.
pub(crate) fn log_outcome(table: &'static str, trigger: &'static str, result: &SyncResult<SyncOutcome>) {
    match result {
        Ok(SyncOutcome::Completed(report)) => {
            tracing::debug!(table, trigger, ?report, "triggered pass completed");
        }
        Ok(SyncOutcome::Skipped) => {
            tracing::debug!(table, trigger, "triggered pass skipped, already running");
        }
        Err(SyncError::Offline) => {
            tracing::debug!(table, trigger, "triggered pass skipped, offline");
        }
        Err(e) if e.is_contention() => {
            tracing::debug!(table, trigger, error = %e, "triggered pass skipped");
        }
        Err(e) => {
            tracing::warn!(table, trigger, error = %e, "triggered pass failed");
        }
    }
}

/// Runs every registered table periodically and on reconnect.
///
/// Both triggers go through each orchestrator's guard, so a tick that
/// lands during a running pass is a no-op.
pub struct SyncScheduler {
    tables: Vec<Arc<dyn TableSync>>,
    assets: Option<Arc<AssetStore>>,
    connectivity: Connectivity,
    interval: Duration,
}

impl SyncScheduler {
    /// Creates a scheduler with no tables.
    pub fn new(connectivity: Connectivity, config: &SyncConfig) -> Self {
        Self {
            tables: Vec::new(),
            assets: None,
            connectivity,
            interval: config.sync_interval,
        }
    }

    /// Registers a table.
    pub fn with_table(mut self, table: Arc<dyn TableSync>) -> Self {
        self.tables.push(table);
        self
    }

    /// Also replays pending asset uploads on every trigger.
    pub fn with_assets(mut self, assets: Arc<AssetStore>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Names of the registered tables.
    pub fn tables(&self) -> Vec<&'static str> {
        self.tables.iter().map(|t| t.table_name()).collect()
    }

    /// Runs one pass of every table, one after another.
    ///
    /// No ordering between tables is implied beyond registration order.
    pub async fn sync_all(&self, trigger: &'static str) -> Vec<(&'static str, SyncResult<SyncOutcome>)> {
        let mut results = Vec::with_capacity(self.tables.len());
        for table in &self.tables {
            let result = table.sync_with_server().await;
            log_outcome(table.table_name(), trigger, &result);
            results.push((table.table_name(), result));
        }

        if let Some(assets) = &self.assets {
            if self.connectivity.is_online() {
                if let Err(e) = assets.upload_pending().await {
                    tracing::warn!(trigger, error = %e, "asset replay failed");
                }
            }
        }
        results
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut online = self.connectivity.subscribe();
        let mut was_online = *online.borrow_and_update();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.connectivity.is_online() {
                        self.sync_all("interval").await;
                    }
                }
                changed = online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let now_online = *online.borrow_and_update();
                    if now_online && !was_online {
                        tracing::info!(tables = self.tables.len(), "back online, syncing every table");
                        self.sync_all("reconnect").await;
                    }
                    was_online = now_online;
                }
            }
        }
    }

    /// Starts the timer and connectivity listener on the current runtime.
    pub fn start(self) -> SchedulerHandle {
        let scheduler = Arc::new(self);
        let runner = Arc::clone(&scheduler);
        let task = tokio::spawn(async move { runner.run().await });
        SchedulerHandle { scheduler, task }
    }
}

/// A running scheduler. Dropping the handle stops it.
pub struct SchedulerHandle {
    scheduler: Arc<SyncScheduler>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// The running scheduler, e.g. for a manual [`SyncScheduler::sync_all`].
    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    /// Stops the scheduler.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
