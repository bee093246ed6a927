//! Internet reachability signal
//!
//! The OS-level reachability probe is a black box owned by the host
//! application; the runtime only consumes a boolean that flips on the edge.
//! A watch channel carries the current value and wakes the uploader on every
//! change.

use tokio::sync::watch;
use tracing::info;

/// Handle the host application flips when connectivity changes.
#[derive(Debug)]
pub struct ReachabilityMonitor {
    tx: watch::Sender<bool>,
}

impl ReachabilityMonitor {
    /// Start offline.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Report the current connectivity state. Repeats are absorbed.
    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "reachability changed");
        }
    }

    /// Subscribe to connectivity changes.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ReachabilityMonitor {
    fn default() -> Self {
        Self::new()
    }
}
