//! Trailing-edge debouncing of async actions.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Runs an action once a burst of requests has been quiet for `delay`.
///
/// Each request restarts the window, so N requests inside one window
/// produce exactly one run. A request that arrives while the action is
/// running opens a new window after it finishes.
pub struct Debouncer {
    notify: Arc<Notify>,
    requests: Arc<AtomicU64>,
    runs: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl Debouncer {
    /// Spawns the debounce loop on the current Tokio runtime.
    pub fn spawn<F, Fut>(delay: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let notify = Arc::new(Notify::new());
        let runs = Arc::new(AtomicU64::new(0));
        let waiter = Arc::clone(&notify);
        let run_count = Arc::clone(&runs);

        let task = tokio::spawn(async move {
            loop {
                waiter.notified().await;
                loop {
                    tokio::select! {
                        () = waiter.notified() => {}
                        () = tokio::time::sleep(delay) => break,
                    }
                }
                action().await;
                run_count.fetch_add(1, Ordering::SeqCst);
            }
        });

        Self {
            notify,
            requests: Arc::new(AtomicU64::new(0)),
            runs,
            task,
        }
    }

    /// Requests a run. Never blocks.
    pub fn request(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Requests received so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }

    /// Completed runs so far.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
