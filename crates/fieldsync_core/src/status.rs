//! Per-record sync status lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The sync lifecycle state attached to every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local copy mirrors the last-known remote state.
    Synced,
    /// Local-only, not yet eligible for sync.
    Draft,
    /// Locally mutated, awaiting push.
    Queued,
    /// Last push attempt errored; `sync_error` is populated.
    Failed,
    /// Tombstone: marked for remote deletion, not yet purged locally.
    PendingDelete,
    /// Soft-retired, excluded from active listings.
    Archived,
}

impl SyncStatus {
    /// Every status, in declaration order.
    pub const ALL: [SyncStatus; 6] = [
        SyncStatus::Synced,
        SyncStatus::Draft,
        SyncStatus::Queued,
        SyncStatus::Failed,
        SyncStatus::PendingDelete,
        SyncStatus::Archived,
    ];

    /// Stable lowercase name, used in index keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Draft => "draft",
            SyncStatus::Queued => "queued",
            SyncStatus::Failed => "failed",
            SyncStatus::PendingDelete => "pending_delete",
            SyncStatus::Archived => "archived",
        }
    }

    /// Returns true if a reconciliation pass should push this record.
    pub fn needs_push(&self) -> bool {
        matches!(self, SyncStatus::Queued | SyncStatus::Failed)
    }

    /// Returns true if a local `update` may be applied.
    pub fn is_editable(&self) -> bool {
        !matches!(self, SyncStatus::PendingDelete)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    ///
    /// Nothing leaves `PendingDelete` except `Failed`, which a failed remote
    /// delete records while the row stays tombstoned.
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        use SyncStatus::*;
        match (*self, next) {
            (PendingDelete, Failed) => true,
            (PendingDelete, _) => false,
            (_, PendingDelete) => true,

            (Draft, Draft) => true,
            (_, Draft) => false,

            (Draft | Synced | Queued | Failed | Archived, Queued) => true,

            // Push success, or a newer remote copy overwriting the row
            (_, Synced) => true,

            (Queued | Failed, Failed) => true,
            (_, Failed) => false,

            (Archived, Archived) => false,
            (_, Archived) => true,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
