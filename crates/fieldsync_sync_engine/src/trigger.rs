//! Mutation-driven sync requests.

use crate::bridge::{BackgroundRegistrar, DATA_SYNC_TAG};
use crate::debounce::Debouncer;
use crate::orchestrator::TableSync;
use crate::scheduler::log_outcome;
use fieldsync_core::{MutationHook, MutationKind};
use std::sync::Arc;
use std::time::Duration;

/// A [`MutationHook`] that debounces a pass of one table and registers
/// the data sync tag for the background bridge.
///
/// Attach it with [`EntityTable::set_hook`](fieldsync_core::EntityTable::set_hook).
/// Must be created inside a Tokio runtime.
pub struct SyncTrigger {
    table: &'static str,
    debouncer: Debouncer,
    registrar: Arc<dyn BackgroundRegistrar>,
}

impl SyncTrigger {
    /// Creates a trigger driving `sync` after `debounce` of quiet.
    pub fn new(
        sync: Arc<dyn TableSync>,
        debounce: Duration,
        registrar: Arc<dyn BackgroundRegistrar>,
    ) -> Self {
        let table = sync.table_name();
        let debouncer = Debouncer::spawn(debounce, move || {
            let sync = Arc::clone(&sync);
            async move {
                let result = sync.sync_with_server().await;
                log_outcome(sync.table_name(), "mutation", &result);
            }
        });
        Self {
            table,
            debouncer,
            registrar,
        }
    }

    /// Requests a debounced pass without a mutation.
    pub fn request(&self) {
        self.debouncer.request();
    }

    /// Passes run by this trigger so far.
    pub fn runs(&self) -> u64 {
        self.debouncer.runs()
    }
}

impl MutationHook for SyncTrigger {
    fn mutated(&self, table: &'static str, kind: MutationKind) {
        tracing::trace!(table, ?kind, "mutation observed");
        if table != self.table {
            tracing::warn!(table, expected = self.table, "trigger attached to the wrong table");
        }
        self.registrar.register(DATA_SYNC_TAG);
        self.debouncer.request();
    }
}
