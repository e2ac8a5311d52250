//! The reconciliation pass shared by every execution context.
//!
//! One pass over one table runs, in order:
//!
//! 1. **Tombstone sweep**: every tombstoned row is deleted remotely. Success
//!    (or a remote `NotFound`) physically removes the row; any other failure
//!    marks it `Failed` and keeps the tombstone.
//! 2. **Pull**: the full remote listing. A failure aborts the pass.
//! 3. **Merge**: remote records that are unknown locally, or newer than a
//!    non-tombstoned local copy, overwrite the local row as `Synced`.
//! 4. **Push**: every `Queued`/`Failed` row is created or updated remotely,
//!    depending on whether the pull saw it. Failures are recorded on the
//!    row and do not stop the batch.
//!
//! Every local write is conditional on the row being unchanged since it was
//! read, so a local edit that lands mid-pass is never overwritten.
//!
//! [`reconcile_leased`] also renews the table lease before the pull, the
//! merge and the push, and aborts with `LeaseHeld` once a renewal finds the
//! lease taken over.

use crate::adapter::{RemoteAdapter, Reply};
use crate::error::{RemoteError, SyncError, SyncResult};
use fieldsync_core::{
    CoreError, Entity, LeaseGuard, LocalRow, RemoteRecord, SyncLease, SyncStatus, TableHandle,
    VersionedRow,
};
use futures::FutureExt;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Per-pass counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Tombstones physically removed after a confirmed remote delete.
    pub deleted: usize,
    /// Tombstones whose remote delete failed.
    pub delete_failures: usize,
    /// Local rows inserted or overwritten from the remote listing.
    pub pulled: usize,
    /// Rows the remote accepted.
    pub pushed: usize,
    /// Rows whose push failed.
    pub push_failures: usize,
}

impl PassReport {
    /// Returns true if no per-record step failed.
    pub fn is_clean(&self) -> bool {
        self.delete_failures == 0 && self.push_failures == 0
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Awaits an adapter call, turning a panic into a remote error.
pub(crate) async fn guarded<V, F>(operation: &'static str, call: F) -> Result<V, RemoteError>
where
    F: Future<Output = Reply<V>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(reply) => reply.into_result(),
        Err(payload) => Err(RemoteError::other(format!(
            "{operation} panicked: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Name of whoever holds `lease` now, for error reports.
pub(crate) fn lease_holder(lease: &SyncLease) -> String {
    lease
        .holder()
        .ok()
        .flatten()
        .map(|h| h.owner)
        .unwrap_or_else(|| "unknown".to_string())
}

fn renew<T: Entity>(
    lease: &mut Option<(&SyncLease, &mut LeaseGuard)>,
    phase: &'static str,
) -> SyncResult<()> {
    let Some((lease, guard)) = lease else {
        return Ok(());
    };
    if guard.renew()? {
        tracing::trace!(table = T::TABLE, phase, "sync lease renewed");
        return Ok(());
    }
    let holder = lease_holder(*lease);
    tracing::warn!(table = T::TABLE, phase, holder = %holder, "sync lease lost, pass aborted");
    Err(SyncError::LeaseHeld {
        table: T::TABLE.to_string(),
        holder,
    })
}

fn valid_remote_id(id: &str) -> bool {
    !id.is_empty() && !id.contains('/')
}

/// Records a failed remote call on the row, keeping its tombstone.
///
/// Returns false if the row changed while the call was in flight.
fn mark_failed<T: Entity>(
    table: &TableHandle<T>,
    current: &VersionedRow<T>,
    error: &RemoteError,
) -> SyncResult<bool> {
    let mut next = current.row.clone();
    next.record.sync_status = SyncStatus::Failed;
    next.record.sync_error = Some(error.to_string());
    Ok(table.replace(current, Some(&next))?)
}

async fn sweep<T: Entity>(
    table: &TableHandle<T>,
    adapter: &dyn RemoteAdapter<T>,
    report: &mut PassReport,
) -> SyncResult<()> {
    for current in table.tombstoned()? {
        let id = current.id().to_string();
        match guarded("delete", adapter.delete(&id)).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!(table = T::TABLE, id = %id, "remote copy already absent");
            }
            Err(e) => {
                tracing::warn!(table = T::TABLE, id = %id, error = %e, "remote delete failed");
                report.delete_failures += 1;
                mark_failed(table, &current, &e)?;
                continue;
            }
        }

        if table.replace(&current, None)? {
            tracing::debug!(table = T::TABLE, id = %id, "tombstone removed");
            report.deleted += 1;
        } else {
            tracing::debug!(table = T::TABLE, id = %id, "tombstone changed during delete");
        }
    }
    Ok(())
}

fn merge<T: Entity>(
    table: &TableHandle<T>,
    remote: &[RemoteRecord<T>],
    report: &mut PassReport,
) -> SyncResult<()> {
    let mut local: HashMap<String, VersionedRow<T>> = table
        .versioned_rows()?
        .into_iter()
        .map(|row| (row.id().to_string(), row))
        .collect();

    for theirs in remote {
        if !valid_remote_id(&theirs.id) {
            tracing::warn!(table = T::TABLE, id = %theirs.id, "skipping remote record with unusable id");
            continue;
        }

        match local.remove(&theirs.id) {
            None => match table.insert(&LocalRow::live(theirs.to_synced(None))) {
                Ok(()) => report.pulled += 1,
                Err(CoreError::AlreadyExists { .. }) => {
                    tracing::debug!(table = T::TABLE, id = %theirs.id, "row appeared during merge");
                }
                Err(e) => return Err(e.into()),
            },
            Some(ours) => {
                if ours.row.is_tombstoned() || theirs.updated_at <= ours.record().updated_at {
                    continue;
                }
                let next = LocalRow::live(theirs.to_synced(Some(ours.record().created_at)));
                if table.replace(&ours, Some(&next))? {
                    tracing::debug!(table = T::TABLE, id = %theirs.id, "newer remote copy applied");
                    report.pulled += 1;
                }
            }
        }
    }
    Ok(())
}

async fn push<T: Entity>(
    table: &TableHandle<T>,
    adapter: &dyn RemoteAdapter<T>,
    remote_ids: &HashSet<String>,
    report: &mut PassReport,
) -> SyncResult<()> {
    let mut ids = table.ids_with_status(SyncStatus::Queued)?;
    ids.extend(table.ids_with_status(SyncStatus::Failed)?);
    ids.sort();
    ids.dedup();

    for id in ids {
        let Some(current) = table.versioned(&id)? else {
            continue;
        };
        if !current.row.needs_push() {
            continue;
        }

        let result = if remote_ids.contains(&id) {
            guarded("update", adapter.update(current.record())).await
        } else {
            guarded("create", adapter.create(current.record())).await
        };

        match result {
            Ok(stored) => {
                report.pushed += 1;
                let mut next = LocalRow::live(stored.to_synced(Some(current.record().created_at)));
                next.record.id = id.clone();
                if table.replace(&current, Some(&next))? {
                    tracing::debug!(table = T::TABLE, id = %id, "record pushed");
                } else {
                    tracing::debug!(table = T::TABLE, id = %id, "record changed during push, keeping local edit");
                }
            }
            Err(e) => {
                tracing::warn!(table = T::TABLE, id = %id, error = %e, "push failed");
                report.push_failures += 1;
                mark_failed(table, &current, &e)?;
            }
        }
    }
    Ok(())
}

/// Runs one reconciliation pass of `table` against `adapter`.
///
/// Callers are responsible for mutual exclusion; see
/// [`SyncOrchestrator`](crate::SyncOrchestrator).
///
/// # Errors
///
/// Returns `Remote` if the pull fails and `Core` if the local store fails.
/// Per-record delete and push failures are stored on the rows instead.
pub async fn reconcile<T: Entity>(
    table: &TableHandle<T>,
    adapter: &dyn RemoteAdapter<T>,
) -> SyncResult<PassReport> {
    run(table, adapter, None).await
}

/// Runs one pass while holding `guard` on `lease`, renewing it between
/// phases.
///
/// # Errors
///
/// As [`reconcile`], plus `LeaseHeld` if another context took the lease
/// over mid-pass. Work done before the loss is kept.
pub async fn reconcile_leased<T: Entity>(
    table: &TableHandle<T>,
    adapter: &dyn RemoteAdapter<T>,
    lease: &SyncLease,
    guard: &mut LeaseGuard,
) -> SyncResult<PassReport> {
    run(table, adapter, Some((lease, guard))).await
}

async fn run<T: Entity>(
    table: &TableHandle<T>,
    adapter: &dyn RemoteAdapter<T>,
    mut lease: Option<(&SyncLease, &mut LeaseGuard)>,
) -> SyncResult<PassReport> {
    let mut report = PassReport::default();

    sweep(table, adapter, &mut report).await?;
    renew::<T>(&mut lease, "pull")?;

    let remote = match guarded("list", adapter.list()).await {
        Ok(remote) => remote,
        Err(e) => {
            tracing::error!(table = T::TABLE, error = %e, "remote pull failed, pass aborted");
            return Err(SyncError::Remote(e));
        }
    };
    let remote_ids: HashSet<String> = remote.iter().map(|r| r.id.clone()).collect();

    renew::<T>(&mut lease, "merge")?;
    merge(table, &remote, &mut report)?;
    renew::<T>(&mut lease, "push")?;
    push(table, adapter, &remote_ids, &mut report).await?;

    tracing::info!(
        table = T::TABLE,
        deleted = report.deleted,
        delete_failures = report.delete_failures,
        pulled = report.pulled,
        pushed = report.pushed,
        push_failures = report.push_failures,
        "reconciliation pass complete"
    );
    Ok(report)
}
