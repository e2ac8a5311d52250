//! Configuration for the sync engine.

use std::time::Duration;

/// Configuration shared by the orchestrator, scheduler, asset store and
/// background bridge of one execution context.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Identifies this execution context as a lease owner.
    pub context_id: String,
    /// Quiet period that coalesces mutation-triggered syncs.
    pub debounce: Duration,
    /// Period of the scheduler's timer.
    pub sync_interval: Duration,
    /// How long a sync lease stays valid without being released.
    pub lease_ttl: Duration,
    /// Lifetime of presigned asset URLs.
    pub presign_ttl: Duration,
}

impl SyncConfig {
    /// Creates a configuration with default timings for the given context.
    pub fn new(context_id: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            debounce: Duration::from_secs(1),
            sync_interval: Duration::from_secs(60),
            lease_ttl: Duration::from_secs(120),
            presign_ttl: Duration::from_secs(15 * 60),
        }
    }

    /// Sets the debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Sets the periodic sync interval.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the lease time-to-live.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Sets the presigned URL lifetime.
    pub fn with_presign_ttl(mut self, ttl: Duration) -> Self {
        self.presign_ttl = ttl;
        self
    }
}

impl Default for SyncConfig {
    /// A fresh random context id with default timings.
    fn default() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }
}
