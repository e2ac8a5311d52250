//! Passes overlapping with other calls and local edits.

use async_trait::async_trait;
use fieldsync_core::{Entity, EntityTable, Record, RemoteRecord, SyncLease, SyncStatus};
use fieldsync_storage::InMemoryBackend;
use fieldsync_sync_engine::{
    Connectivity, MockAdapter, RemoteAdapter, RemoteOp, Reply, SyncConfig, SyncError,
    SyncOrchestrator, SyncOutcome,
};
use fieldsync_testkit::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hold {
    List,
    Create,
}

/// Wraps the mock remote and parks the first call of one kind until
/// released.
struct GatedAdapter {
    inner: MockAdapter<Phrase>,
    hold: Mutex<Option<Hold>>,
    entered: Notify,
    release: Notify,
}

impl GatedAdapter {
    fn new(hold: Hold) -> Self {
        Self {
            inner: MockAdapter::new(),
            hold: Mutex::new(Some(hold)),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    async fn pause(&self, op: Hold) {
        let armed = {
            let mut hold = self.hold.lock();
            if *hold == Some(op) {
                *hold = None;
                true
            } else {
                false
            }
        };
        if armed {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl RemoteAdapter<Phrase> for GatedAdapter {
    async fn list(&self) -> Reply<Vec<RemoteRecord<Phrase>>> {
        self.pause(Hold::List).await;
        self.inner.list().await
    }

    async fn create(&self, record: &Record<Phrase>) -> Reply<RemoteRecord<Phrase>> {
        let reply = self.inner.create(record).await;
        self.pause(Hold::Create).await;
        reply
    }

    async fn update(&self, record: &Record<Phrase>) -> Reply<RemoteRecord<Phrase>> {
        self.inner.update(record).await
    }

    async fn delete(&self, id: &str) -> Reply<String> {
        self.inner.delete(id).await
    }
}

type Setup = (EntityTable<Phrase>, Arc<GatedAdapter>, Arc<SyncOrchestrator<Phrase>>);

fn setup(hold: Hold) -> Setup {
    setup_with(hold, SyncConfig::new(PAGE_CONTEXT))
}

fn setup_with(hold: Hold, config: SyncConfig) -> Setup {
    let table = EntityTable::new(Arc::new(InMemoryBackend::new()));
    let remote = Arc::new(GatedAdapter::new(hold));
    let adapter: Arc<dyn RemoteAdapter<Phrase>> = remote.clone();
    let orchestrator = SyncOrchestrator::new(
        table.handle().clone(),
        adapter,
        Connectivity::online(),
        &config,
    );
    (table, remote, Arc::new(orchestrator))
}

#[tokio::test]
async fn call_during_a_running_pass_is_skipped() {
    let (table, remote, orchestrator) = setup(Hold::List);
    table.add("p-1", phrase("Slipped tiles")).unwrap();

    let running = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.sync_with_server().await }
    });
    remote.entered.notified().await;
    assert!(orchestrator.is_syncing());
    let calls_before = remote.inner.calls().len();

    let second = orchestrator.sync_with_server().await.unwrap();

    assert_eq!(second, SyncOutcome::Skipped);
    assert_eq!(remote.inner.calls().len(), calls_before);
    assert_eq!(orchestrator.stats().passes_skipped, 1);

    remote.release.notify_one();
    let first = running.await.unwrap().unwrap();
    assert_eq!(first.report().unwrap().pushed, 1);
    assert!(!orchestrator.is_syncing());
    assert_eq!(orchestrator.stats().passes_completed, 1);
    assert_eq!(table.get("p-1").unwrap().sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn edit_made_during_push_is_kept_and_sent_next_pass() {
    let (table, remote, orchestrator) = setup(Hold::Create);
    table.add("p-1", phrase("Slipped tiles")).unwrap();

    let running = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.sync_with_server().await }
    });
    remote.entered.notified().await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    table
        .update("p-1", |p| p.body = "Edited while uploading.".to_string())
        .unwrap();
    remote.release.notify_one();

    let report = *running.await.unwrap().unwrap().report().unwrap();
    assert_eq!(report.pushed, 1);

    let kept = table.get("p-1").unwrap();
    assert_eq!(kept.sync_status, SyncStatus::Queued);
    assert_eq!(kept.data.body, "Edited while uploading.");
    assert_eq!(
        remote.inner.remote("p-1").unwrap().data.body,
        "Observed from ground level."
    );

    orchestrator.sync_with_server().await.unwrap();

    assert_eq!(remote.inner.call_count(RemoteOp::Create), 1);
    assert_eq!(remote.inner.call_count(RemoteOp::Update), 1);
    assert_eq!(
        remote.inner.remote("p-1").unwrap().data.body,
        "Edited while uploading."
    );
    assert_eq!(table.get("p-1").unwrap().sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn pass_that_outlives_its_lease_stops_once_taken_over() {
    let ttl = Duration::from_millis(20);
    let (table, remote, orchestrator) =
        setup_with(Hold::List, SyncConfig::new(PAGE_CONTEXT).with_lease_ttl(ttl));
    table.add("p-1", phrase("Slipped tiles")).unwrap();
    let background = SyncLease::new(
        Arc::clone(table.handle().backend()),
        Phrase::TABLE,
        BACKGROUND_CONTEXT,
        Duration::from_secs(60),
    );

    let running = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.sync_with_server().await }
    });
    remote.entered.notified().await;
    tokio::time::sleep(ttl * 3).await;
    let taken = background.try_acquire().unwrap().expect("expired lease is free");
    remote.release.notify_one();

    let err = running.await.unwrap().unwrap_err();
    match err {
        SyncError::LeaseHeld { holder, .. } => assert_eq!(holder, BACKGROUND_CONTEXT),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(remote.inner.call_count(RemoteOp::Create), 0);
    assert_eq!(table.get("p-1").unwrap().sync_status, SyncStatus::Queued);
    assert_eq!(background.holder().unwrap().unwrap().owner, BACKGROUND_CONTEXT);
    assert_eq!(orchestrator.stats().passes_failed, 1);

    drop(taken);
    let outcome = orchestrator.sync_with_server().await.unwrap();
    assert_eq!(outcome.report().unwrap().pushed, 1);
}

#[tokio::test]
async fn pass_that_outlives_its_lease_renews_it_when_untaken() {
    let ttl = Duration::from_millis(20);
    let (table, remote, orchestrator) =
        setup_with(Hold::List, SyncConfig::new(PAGE_CONTEXT).with_lease_ttl(ttl));
    table.add("p-1", phrase("Slipped tiles")).unwrap();

    let running = tokio::spawn({
        let orchestrator = Arc::clone(&orchestrator);
        async move { orchestrator.sync_with_server().await }
    });
    remote.entered.notified().await;
    tokio::time::sleep(ttl * 3).await;
    remote.release.notify_one();

    let outcome = running.await.unwrap().unwrap();
    assert_eq!(outcome.report().unwrap().pushed, 1);
    assert_eq!(table.get("p-1").unwrap().sync_status, SyncStatus::Synced);
}
