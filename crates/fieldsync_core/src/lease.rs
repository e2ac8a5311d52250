//! Table-scoped sync leases.
//!
//! Several execution contexts (the foreground orchestrator, the background
//! bridge) may reconcile the same physical table. A lease is a row in the
//! reserved [`LEASE_TABLE`] keyed by entity table name. It names the owning
//! context and an expiry; it is taken and released with compare-and-swap,
//! so two contexts can never both believe they hold it. An expired lease
//! may be taken over, which bounds the damage of a context that died
//! mid-pass. A holder running a long pass renews the lease as it goes and
//! stops as soon as a renewal finds the lease taken over.

use crate::codec::{decode_row, encode_row};
use crate::error::CoreResult;
use crate::record::Timestamp;
use chrono::Utc;
use fieldsync_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Reserved table holding lease rows.
pub const LEASE_TABLE: &str = "__leases";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LeaseRow {
    owner: String,
    expires_at: Timestamp,
}

/// Who currently holds a table's lease.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaseHolder {
    /// Owning context id.
    pub owner: String,
    /// Expiry.
    pub expires_at: Timestamp,
}

/// Lease manager for one entity table.
#[derive(Clone)]
pub struct SyncLease {
    backend: Arc<dyn StorageBackend>,
    table: String,
    owner: String,
    ttl: Duration,
}

impl SyncLease {
    /// Creates a lease manager for `table`, acting as context `owner`.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        table: impl Into<String>,
        owner: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            backend,
            table: table.into(),
            owner: owner.into(),
            ttl,
        }
    }

    /// The entity table this lease guards.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The context id this manager acquires as.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the current unexpired holder, if any.
    pub fn holder(&self) -> CoreResult<Option<LeaseHolder>> {
        let Some(raw) = self.backend.get(LEASE_TABLE, &self.table)? else {
            return Ok(None);
        };
        let row: LeaseRow = decode_row(LEASE_TABLE, &raw)?;
        if row.expires_at <= Utc::now() {
            return Ok(None);
        }
        Ok(Some(LeaseHolder {
            owner: row.owner,
            expires_at: row.expires_at,
        }))
    }

    /// Attempts to take the lease.
    ///
    /// Returns `Ok(None)` if another context holds an unexpired lease or
    /// won a race for it. Re-acquiring a lease this owner already holds
    /// extends it.
    pub fn try_acquire(&self) -> CoreResult<Option<LeaseGuard>> {
        let current = self.backend.get(LEASE_TABLE, &self.table)?;
        if let Some(raw) = &current {
            let row: LeaseRow = decode_row(LEASE_TABLE, raw)?;
            if row.owner != self.owner && row.expires_at > Utc::now() {
                tracing::debug!(
                    table = %self.table,
                    holder = %row.owner,
                    "sync lease held by another context"
                );
                return Ok(None);
            }
        }

        let row = LeaseRow {
            owner: self.owner.clone(),
            expires_at: expiry(self.ttl),
        };
        let raw = encode_row(LEASE_TABLE, &row)?;
        if !self
            .backend
            .compare_and_swap(LEASE_TABLE, &self.table, current, Some(raw.clone()))?
        {
            return Ok(None);
        }

        Ok(Some(LeaseGuard {
            backend: Arc::clone(&self.backend),
            table: self.table.clone(),
            owner: self.owner.clone(),
            ttl: self.ttl,
            expires_at: row.expires_at,
            raw: Some(raw),
        }))
    }
}

fn expiry(ttl: Duration) -> Timestamp {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
}

/// Proof of holding a lease; releases it on drop.
pub struct LeaseGuard {
    backend: Arc<dyn StorageBackend>,
    table: String,
    owner: String,
    ttl: Duration,
    expires_at: Timestamp,
    raw: Option<Vec<u8>>,
}

impl LeaseGuard {
    /// When the lease runs out unless renewed.
    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    /// Pushes the expiry a full TTL past now.
    ///
    /// Returns `Ok(false)` if the lease was taken over since it was last
    /// written; the guard then no longer holds anything. A lease that
    /// expired but was not taken over is renewed.
    pub fn renew(&mut self) -> CoreResult<bool> {
        let Some(current) = self.raw.take() else {
            return Ok(false);
        };
        let row = LeaseRow {
            owner: self.owner.clone(),
            expires_at: expiry(self.ttl),
        };
        let raw = encode_row(LEASE_TABLE, &row)?;
        let renewed = match self.backend.compare_and_swap(
            LEASE_TABLE,
            &self.table,
            Some(current.clone()),
            Some(raw.clone()),
        ) {
            Ok(renewed) => renewed,
            Err(e) => {
                self.raw = Some(current);
                return Err(e.into());
            }
        };
        if renewed {
            self.expires_at = row.expires_at;
            self.raw = Some(raw);
        } else {
            tracing::warn!(table = %self.table, owner = %self.owner, "sync lease lost to another context");
        }
        Ok(renewed)
    }

    /// Releases the lease now.
    ///
    /// A lease that expired and was taken over is left to its new owner.
    pub fn release(mut self) -> CoreResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> CoreResult<()> {
        if let Some(raw) = self.raw.take() {
            self.backend
                .compare_and_swap(LEASE_TABLE, &self.table, Some(raw), None)?;
        }
        Ok(())
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            tracing::warn!(table = %self.table, error = %e, "failed to release sync lease");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_storage::InMemoryBackend;

    fn lease(backend: &Arc<InMemoryBackend>, owner: &str, ttl: Duration) -> SyncLease {
        let backend: Arc<dyn StorageBackend> = backend.clone();
        SyncLease::new(backend, "surveys", owner, ttl)
    }

    #[test]
    fn second_owner_is_excluded() {
        let backend = Arc::new(InMemoryBackend::new());
        let page = lease(&backend, "page", Duration::from_secs(60));
        let worker = lease(&backend, "worker", Duration::from_secs(60));

        let guard = page.try_acquire().unwrap().expect("page acquires");
        assert!(worker.try_acquire().unwrap().is_none());
        assert_eq!(worker.holder().unwrap().unwrap().owner, "page");

        drop(guard);
        assert!(worker.try_acquire().unwrap().is_some());
    }

    #[test]
    fn expired_lease_can_be_taken_over() {
        let backend = Arc::new(InMemoryBackend::new());
        let page = lease(&backend, "page", Duration::ZERO);
        let worker = lease(&backend, "worker", Duration::from_secs(60));

        let stale = page.try_acquire().unwrap().unwrap();
        let fresh = worker.try_acquire().unwrap().expect("expired lease is free");

        // Releasing the stale guard must not drop the new owner's lease
        stale.release().unwrap();
        assert_eq!(page.holder().unwrap().unwrap().owner, "worker");
        drop(fresh);
        assert!(page.holder().unwrap().is_none());
    }

    #[test]
    fn renewal_extends_the_expiry() {
        let backend = Arc::new(InMemoryBackend::new());
        let page = lease(&backend, "page", Duration::from_secs(60));

        let mut guard = page.try_acquire().unwrap().unwrap();
        let first = guard.expires_at();
        std::thread::sleep(Duration::from_millis(2));
        assert!(guard.renew().unwrap());

        assert!(guard.expires_at() > first);
        assert_eq!(page.holder().unwrap().unwrap().expires_at, guard.expires_at());
    }

    #[test]
    fn expired_but_untaken_lease_renews() {
        let backend = Arc::new(InMemoryBackend::new());
        let page = lease(&backend, "page", Duration::from_millis(1));

        let mut guard = page.try_acquire().unwrap().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(page.holder().unwrap().is_none());
        assert!(guard.renew().unwrap());
    }

    #[test]
    fn renewal_after_takeover_fails_and_leaves_new_owner() {
        let backend = Arc::new(InMemoryBackend::new());
        let page = lease(&backend, "page", Duration::ZERO);
        let worker = lease(&backend, "worker", Duration::from_secs(60));

        let mut stale = page.try_acquire().unwrap().unwrap();
        let _fresh = worker.try_acquire().unwrap().unwrap();

        assert!(!stale.renew().unwrap());
        assert!(!stale.renew().unwrap());
        drop(stale);
        assert_eq!(worker.holder().unwrap().unwrap().owner, "worker");
    }

    #[test]
    fn leases_are_per_table() {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let a = SyncLease::new(Arc::clone(&backend), "surveys", "page", Duration::from_secs(60));
        let b = SyncLease::new(Arc::clone(&backend), "phrases", "worker", Duration::from_secs(60));

        let _ga = a.try_acquire().unwrap().unwrap();
        assert!(b.try_acquire().unwrap().is_some());
    }
}
