//! Mesh change-event stream
//!
//! The router and the gateway uploader publish state changes on a broadcast
//! channel. Consumers (UI, CLI status output, tests) subscribe for pushes;
//! the router's snapshot accessors cover the pull side.

use lib_protocol::MessageEnvelope;
use tokio::sync::broadcast;

use crate::link::Peer;

/// Upload state of the gateway uploader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Idle,
    Syncing,
    /// Last sync uploaded this many messages.
    Success(usize),
    Failed(String),
}

/// One state change somewhere in the mesh runtime.
#[derive(Debug, Clone)]
pub enum MeshEvent {
    PeerConnected(Peer),
    PeerDisconnected(Peer),
    MessageAdmitted(MessageEnvelope),
    TopologyUpdated,
    /// The set of reachable gateways changed.
    GatewayStateChanged { reachable: bool },
    UploadStatusChanged(UploadStatus),
}

/// Broadcast handle for mesh events.
///
/// Slow subscribers lag rather than block publishers; a lagging receiver
/// observes a `RecvError::Lagged` and can resubscribe for fresh state.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MeshEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; dropped silently when nobody listens.
    pub fn emit(&self, event: MeshEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
