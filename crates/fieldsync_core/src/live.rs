//! Reactive list reads.

use crate::record::Record;
use crate::status::SyncStatus;
use tokio::sync::watch;

/// One published state of a live list.
#[derive(Debug, Clone, PartialEq)]
pub struct ListSnapshot<T> {
    /// False until the initial read has completed. An empty, unhydrated
    /// list says nothing about the table's contents.
    pub hydrated: bool,
    /// Non-tombstoned records, ordered by id.
    pub items: Vec<Record<T>>,
}

impl<T> ListSnapshot<T> {
    /// The state before the initial read.
    pub fn pending() -> Self {
        Self {
            hydrated: false,
            items: Vec::new(),
        }
    }

    /// Records that are not archived.
    pub fn active(&self) -> impl Iterator<Item = &Record<T>> {
        self.items
            .iter()
            .filter(|r| r.sync_status != SyncStatus::Archived)
    }
}

/// A live view of an entity table.
///
/// Each write to the table publishes a fresh snapshot.
#[derive(Debug, Clone)]
pub struct LiveList<T> {
    rx: watch::Receiver<ListSnapshot<T>>,
}

impl<T: Clone> LiveList<T> {
    pub(crate) fn new(rx: watch::Receiver<ListSnapshot<T>>) -> Self {
        Self { rx }
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> ListSnapshot<T> {
        self.rx.borrow().clone()
    }

    /// Returns true once the initial read has completed.
    pub fn is_hydrated(&self) -> bool {
        self.rx.borrow().hydrated
    }

    /// Waits for the next published snapshot.
    ///
    /// Returns false if the table has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Waits until the initial read has completed and returns that snapshot.
    pub async fn hydrated(&mut self) -> Option<ListSnapshot<T>> {
        self.rx
            .wait_for(|snapshot| snapshot.hydrated)
            .await
            .ok()
            .map(|snapshot| snapshot.clone())
    }

    /// Waits until a snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<ListSnapshot<T>>
    where
        F: FnMut(&ListSnapshot<T>) -> bool,
    {
        self.rx
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .ok()
            .map(|snapshot| snapshot.clone())
    }
}
