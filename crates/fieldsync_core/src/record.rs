//! Record shapes shared by every synchronized entity.

use crate::error::CoreResult;
use crate::status::SyncStatus;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Client- or server-assigned UTC timestamp (ISO-8601 on the wire).
pub type Timestamp = DateTime<Utc>;

/// Returns a timestamp strictly greater than `previous`.
///
/// Normally this is the wall clock. If the clock has not advanced past
/// `previous` (same millisecond, or a clock step backwards), the result is
/// `previous + 1ms`.
pub fn next_timestamp(previous: Option<Timestamp>) -> Timestamp {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + chrono::Duration::milliseconds(1),
        _ => now,
    }
}

/// Fixed-width, lexicographically ordered rendering used in index keys.
pub fn index_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// An entity payload stored in its own table.
///
/// The payload carries only entity-specific fields; id, timestamps and
/// sync bookkeeping live on [`Record`].
pub trait Entity: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Physical table name.
    const TABLE: &'static str;

    /// Checks the payload before it is written locally.
    fn validate(&self) -> CoreResult<()> {
        Ok(())
    }
}

/// A locally stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record<T> {
    /// Client-assigned id, unique within the table.
    pub id: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last mutation time; the only input to last-write-wins.
    pub updated_at: Timestamp,
    /// Lifecycle state.
    pub sync_status: SyncStatus,
    /// Last push or delete error, present only when `Failed`.
    pub sync_error: Option<String>,
    /// Entity-specific fields.
    pub data: T,
}

impl<T> Record<T> {
    /// Builds a fresh record stamped with `now` in the given status.
    pub fn new(id: impl Into<String>, data: T, status: SyncStatus) -> Self {
        let now = next_timestamp(None);
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            sync_status: status,
            sync_error: None,
            data,
        }
    }
}

/// A record as the remote service returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord<T> {
    /// Record id.
    pub id: String,
    /// Server-side creation time, when the service reports one.
    pub created_at: Option<Timestamp>,
    /// Server-side last update time.
    pub updated_at: Timestamp,
    /// Entity-specific fields.
    pub data: T,
}

impl<T: Clone> RemoteRecord<T> {
    /// Converts into a local record in `Synced` state.
    ///
    /// `local_created_at` wins when the service does not report a creation
    /// time, so a pushed record keeps its original creation stamp.
    pub fn to_synced(&self, local_created_at: Option<Timestamp>) -> Record<T> {
        Record {
            id: self.id.clone(),
            created_at: self
                .created_at
                .or(local_created_at)
                .unwrap_or(self.updated_at),
            updated_at: self.updated_at,
            sync_status: SyncStatus::Synced,
            sync_error: None,
            data: self.data.clone(),
        }
    }
}

/// A stored row as seen by the reconciliation pass, tombstone flag included.
///
/// A failed remote delete sets the status to `Failed` but must not revive
/// the record, so tombstones are tracked separately from the status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalRow<T> {
    /// The record.
    pub record: Record<T>,
    /// Set by a local remove; cleared only by physical deletion.
    pub tombstone: bool,
}

impl<T> LocalRow<T> {
    /// Wraps a live (non-tombstoned) record.
    pub fn live(record: Record<T>) -> Self {
        Self {
            record,
            tombstone: false,
        }
    }

    /// Returns true if the row is hidden from reads and awaiting remote delete.
    pub fn is_tombstoned(&self) -> bool {
        self.tombstone || self.record.sync_status == SyncStatus::PendingDelete
    }

    /// Returns true if the push phase should send this row.
    pub fn needs_push(&self) -> bool {
        !self.is_tombstoned() && self.record.sync_status.needs_push()
    }

    /// Record id.
    pub fn id(&self) -> &str {
        &self.record.id
    }
}
