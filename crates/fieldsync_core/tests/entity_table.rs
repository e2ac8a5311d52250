//! Behaviour of application-facing entity tables.

use fieldsync_core::models::{Phrase, Survey};
use fieldsync_core::{
    CoreError, EntityTable, MutationHook, MutationKind, SyncStatus, LEASE_TABLE,
};
use fieldsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Default)]
struct RecordingHook {
    calls: Mutex<Vec<(&'static str, MutationKind)>>,
}

impl RecordingHook {
    fn calls(&self) -> Vec<(&'static str, MutationKind)> {
        self.calls.lock().clone()
    }
}

impl MutationHook for RecordingHook {
    fn mutated(&self, table: &'static str, kind: MutationKind) {
        self.calls.lock().push((table, kind));
    }
}

fn phrase(name: &str) -> Phrase {
    Phrase::new("roof", name, "Observed during inspection.")
}

fn table_with_hook() -> (EntityTable<Phrase>, Arc<RecordingHook>) {
    let hook = Arc::new(RecordingHook::default());
    let table = EntityTable::new(Arc::new(InMemoryBackend::new())).with_hook(hook.clone());
    (table, hook)
}

#[test]
fn add_queues_and_notifies() {
    let (table, hook) = table_with_hook();
    let record = table.add("p-1", phrase("Slipped tiles")).unwrap();

    assert_eq!(record.sync_status, SyncStatus::Queued);
    assert_eq!(record.created_at, record.updated_at);
    assert_eq!(hook.calls(), vec![("phrases", MutationKind::Add)]);
}

#[test]
fn duplicate_add_is_rejected() {
    let (table, _) = table_with_hook();
    table.add("p-1", phrase("Slipped tiles")).unwrap();
    let err = table.add("p-1", phrase("Other")).unwrap_err();
    assert!(matches!(err, CoreError::AlreadyExists { .. }));
}

#[test]
fn ids_with_separator_are_rejected() {
    let (table, hook) = table_with_hook();
    assert!(matches!(
        table.add("a/b", phrase("x")),
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(table.add("", phrase("x")), Err(CoreError::Validation(_))));
    assert!(hook.calls().is_empty());
}

#[test]
fn invalid_payload_is_rejected() {
    let (table, _) = table_with_hook();
    let err = table.add("p-1", Phrase::new("roof", "", "")).unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));
    assert!(table.is_empty().unwrap());
}

#[test]
fn draft_is_silent_until_updated() {
    let (table, hook) = table_with_hook();
    let draft = table.save_draft("p-1", phrase("Draft")).unwrap();
    assert_eq!(draft.sync_status, SyncStatus::Draft);
    assert!(hook.calls().is_empty());

    let queued = table.update("p-1", |p| p.ordinal = 3).unwrap();
    assert_eq!(queued.sync_status, SyncStatus::Queued);
    assert_eq!(queued.data.ordinal, 3);
    assert_eq!(hook.calls(), vec![("phrases", MutationKind::Update)]);
}

#[test]
fn update_bumps_updated_at() {
    let (table, _) = table_with_hook();
    let first = table.add("p-1", phrase("Slipped tiles")).unwrap();
    let second = table.update("p-1", |p| p.body = "Changed".into()).unwrap();
    let third = table.update("p-1", |p| p.body = "Changed again".into()).unwrap();

    assert!(second.updated_at > first.updated_at);
    assert!(third.updated_at > second.updated_at);
    assert_eq!(third.created_at, first.created_at);
}

#[test]
fn update_missing_is_not_found() {
    let (table, hook) = table_with_hook();
    let err = table.update("nope", |_| {}).unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
    assert!(hook.calls().is_empty());
}

#[test]
fn removed_record_is_hidden_and_frozen() {
    let (table, hook) = table_with_hook();
    table.add("p-1", phrase("Slipped tiles")).unwrap();
    table.remove("p-1").unwrap();

    assert!(matches!(table.get("p-1"), Err(CoreError::NotFound { .. })));
    assert!(table.is_empty().unwrap());

    let err = table.update("p-1", |p| p.ordinal = 1).unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidState {
            from: SyncStatus::PendingDelete,
            ..
        }
    ));

    let stored = table.handle().row("p-1").unwrap().unwrap();
    assert!(stored.tombstone);
    assert_eq!(stored.record.sync_status, SyncStatus::PendingDelete);
    assert_eq!(table.handle().tombstoned().unwrap().len(), 1);

    assert_eq!(
        hook.calls(),
        vec![("phrases", MutationKind::Add), ("phrases", MutationKind::Remove)]
    );
}

#[test]
fn remove_is_idempotent_and_ignores_missing() {
    let (table, hook) = table_with_hook();
    table.remove("missing").unwrap();
    table.add("p-1", phrase("x")).unwrap();
    table.remove("p-1").unwrap();
    table.remove("p-1").unwrap();

    let removes = hook
        .calls()
        .into_iter()
        .filter(|(_, kind)| *kind == MutationKind::Remove)
        .count();
    assert_eq!(removes, 1);
}

#[test]
fn remove_all_locally_does_not_schedule() {
    let (table, hook) = table_with_hook();
    table.add("p-1", phrase("a")).unwrap();
    table.add("p-2", phrase("b")).unwrap();

    assert_eq!(table.remove_all(false).unwrap(), 2);
    assert!(table.is_empty().unwrap());
    assert!(table.handle().versioned_rows().unwrap().is_empty());
    assert!(table.handle().tombstoned().unwrap().is_empty());
    assert_eq!(hook.calls().len(), 2);
}

#[test]
fn remove_all_remotely_tombstones_everything() {
    let (table, hook) = table_with_hook();
    table.add("p-1", phrase("a")).unwrap();
    table.add("p-2", phrase("b")).unwrap();
    table.remove("p-2").unwrap();

    assert_eq!(table.remove_all(true).unwrap(), 1);
    assert!(table.is_empty().unwrap());
    assert_eq!(table.handle().tombstoned().unwrap().len(), 2);

    let removes = hook
        .calls()
        .into_iter()
        .filter(|(_, kind)| *kind == MutationKind::Remove)
        .count();
    assert_eq!(removes, 2);
}

#[test]
fn remove_all_on_empty_table_is_quiet() {
    let (table, hook) = table_with_hook();
    assert_eq!(table.remove_all(true).unwrap(), 0);
    assert!(hook.calls().is_empty());
}

#[test]
fn archive_hides_from_active_only() {
    let (table, _) = table_with_hook();
    table.add("p-1", phrase("a")).unwrap();
    table.add("p-2", phrase("b")).unwrap();

    let archived = table.archive("p-1").unwrap();
    assert_eq!(archived.sync_status, SyncStatus::Archived);
    // archiving twice is a no-op
    table.archive("p-1").unwrap();

    assert_eq!(table.len().unwrap(), 2);
    let active: Vec<_> = table.list_active().unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(active, vec!["p-2".to_string()]);
}

#[test]
fn retry_requires_failed() {
    let (table, _) = table_with_hook();
    table.add("p-1", phrase("a")).unwrap();
    let err = table.retry("p-1").unwrap_err();
    assert!(matches!(
        err,
        CoreError::InvalidState {
            from: SyncStatus::Queued,
            ..
        }
    ));
    assert!(matches!(table.retry("missing"), Err(CoreError::NotFound { .. })));
}

#[test]
fn retry_requeues_failed_push_and_delete() {
    let (table, hook) = table_with_hook();
    table.add("p-1", phrase("a")).unwrap();
    table.add("p-2", phrase("b")).unwrap();
    table.remove("p-2").unwrap();

    for id in ["p-1", "p-2"] {
        table
            .handle()
            .modify(id, |row| {
                row.record.sync_status = SyncStatus::Failed;
                row.record.sync_error = Some("boom".into());
                Ok(())
            })
            .unwrap();
    }

    assert_eq!(table.retry("p-1").unwrap(), SyncStatus::Queued);
    assert_eq!(table.retry("p-2").unwrap(), SyncStatus::PendingDelete);
    assert!(table.get("p-1").unwrap().sync_error.is_none());

    let stored = table.handle().row("p-2").unwrap().unwrap();
    assert!(stored.tombstone);
    assert!(hook
        .calls()
        .ends_with(&[("phrases", MutationKind::Update), ("phrases", MutationKind::Update)]));
}

#[test]
fn modified_since_filters_by_update_time() {
    let (table, _) = table_with_hook();
    let first = table.add("p-1", phrase("a")).unwrap();
    table.add("p-2", phrase("b")).unwrap();
    table.update("p-1", |p| p.ordinal = 9).unwrap();

    let ids: Vec<_> = table
        .modified_since(first.updated_at)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"p-1".to_string()));

    let latest = table.get("p-1").unwrap().updated_at;
    assert!(table.modified_since(latest).unwrap().is_empty());
}

#[test]
fn status_index_tracks_transitions() {
    let (table, _) = table_with_hook();
    table.add("p-1", phrase("a")).unwrap();
    table.save_draft("p-2", phrase("b")).unwrap();

    let handle = table.handle();
    assert_eq!(handle.ids_with_status(SyncStatus::Queued).unwrap(), vec!["p-1"]);
    assert_eq!(handle.ids_with_status(SyncStatus::Draft).unwrap(), vec!["p-2"]);

    table.update("p-2", |_| {}).unwrap();
    assert!(handle.ids_with_status(SyncStatus::Draft).unwrap().is_empty());
    assert_eq!(handle.ids_with_status(SyncStatus::Queued).unwrap().len(), 2);
}

#[test]
fn tables_share_one_backend() {
    let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
    let phrases: EntityTable<Phrase> = EntityTable::new(backend.clone());
    let surveys: EntityTable<Survey> = EntityTable::new(backend.clone());

    phrases.add("x-1", phrase("a")).unwrap();
    surveys.add("x-1", Survey::new("12 High Street")).unwrap();

    assert_eq!(phrases.len().unwrap(), 1);
    assert_eq!(surveys.len().unwrap(), 1);
    assert!(backend.scan(LEASE_TABLE).unwrap().is_empty());
}

#[test]
fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fieldsync.db");

    {
        let table: EntityTable<Phrase> = EntityTable::new(Arc::new(FileBackend::open(&path).unwrap()));
        table.add("p-1", phrase("a")).unwrap();
        table.add("p-2", phrase("b")).unwrap();
        table.remove("p-2").unwrap();
    }

    let table: EntityTable<Phrase> = EntityTable::new(Arc::new(FileBackend::open(&path).unwrap()));
    assert_eq!(table.get("p-1").unwrap().data.name, "a");
    assert!(table.get("p-2").is_err());
    assert_eq!(table.handle().tombstoned().unwrap().len(), 1);
}

#[tokio::test]
async fn live_list_hydrates_then_follows_writes() {
    let (table, _) = table_with_hook();
    table.add("p-1", phrase("a")).unwrap();

    let mut list = table.list();
    let first = list.hydrated().await.unwrap();
    assert!(first.hydrated);
    assert_eq!(first.items.len(), 1);

    table.add("p-2", phrase("b")).unwrap();
    let second = list.wait_for(|s| s.items.len() == 2).await.unwrap();
    assert_eq!(second.items[1].id, "p-2");

    table.remove("p-1").unwrap();
    let third = list.wait_for(|s| s.items.len() == 1).await.unwrap();
    assert_eq!(third.items[0].id, "p-2");
}

#[tokio::test]
async fn empty_table_hydrates_to_empty_list() {
    let (table, _) = table_with_hook();
    let mut list = table.list();
    let snapshot = list.hydrated().await.unwrap();
    assert!(snapshot.hydrated);
    assert!(snapshot.items.is_empty());
}

#[tokio::test]
async fn second_subscriber_sees_current_state() {
    let (table, _) = table_with_hook();
    table.add("p-1", phrase("a")).unwrap();

    let mut first = table.list();
    first.hydrated().await.unwrap();

    let second = table.list();
    assert!(second.is_hydrated());
    assert_eq!(second.snapshot().items.len(), 1);
}

#[test]
fn list_outside_a_runtime_reads_inline() {
    let (table, _) = table_with_hook();
    table.add("p-1", phrase("a")).unwrap();
    table.add("p-2", phrase("b")).unwrap();
    table.remove("p-2").unwrap();

    let list = table.list();
    assert!(list.is_hydrated());
    let ids: Vec<String> = list.snapshot().items.into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec!["p-1"]);

    table.add("p-3", phrase("c")).unwrap();
    let refreshed = table.list();
    assert_eq!(refreshed.snapshot().items.len(), 2);
    assert_eq!(list.snapshot().items.len(), 2);
}
