//! Change notifications for one table.
//!
//! Every write made through a [`crate::TableHandle`] that carries a feed
//! bumps the feed's version, which wakes live list readers so they
//! re-read the table. Writes made through a handle without a feed (for
//! example from the background bridge) become visible at the next
//! notified write.

use tokio::sync::watch;

/// A version counter bumped after each committed table write.
#[derive(Debug)]
pub struct ChangeFeed {
    version: watch::Sender<u64>,
}

impl ChangeFeed {
    /// Creates a new change feed at version 0.
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self { version }
    }

    /// Records that the table changed.
    pub fn notify(&self) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Subscribes to version changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
