//! Device connectivity flag.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared online/offline state of one execution context.
///
/// Cloning yields another handle on the same flag.
#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// Creates a flag with the given initial state.
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// A flag that starts online.
    pub fn online() -> Self {
        Self::new(true)
    }

    /// Returns true if the device is online.
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Updates the flag. Returns true if the state changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            tracing::info!(online, "connectivity changed");
        }
        changed
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::online()
    }
}
