//! In-process link hub
//!
//! Wires several nodes together inside one process for tests and demos.
//! Radio range and session state are explicit, so a test can lay out a line
//! or triangle topology and partition it at will. Delivery is FIFO per
//! receiver, which preserves the per-peer ordering contract.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::debug;

use super::{Link, LinkEvent, Peer};

#[derive(Default)]
struct HubInner {
    nodes: HashMap<String, NodeSlot>,
}

struct NodeSlot {
    peer: Peer,
    events: UnboundedSender<LinkEvent>,
    started: bool,
    in_range: HashSet<String>,
    sessions: HashSet<String>,
}

/// Shared radio environment for [`MemoryLink`] endpoints.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the hub, returning its link endpoint and event stream.
    pub async fn attach(
        &self,
        device_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> (MemoryLink, UnboundedReceiver<LinkEvent>) {
        let peer = Peer::new(device_id, display_name);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        inner.nodes.insert(
            peer.device_id.clone(),
            NodeSlot {
                peer: peer.clone(),
                events: tx,
                started: false,
                in_range: HashSet::new(),
                sessions: HashSet::new(),
            },
        );
        (
            MemoryLink {
                inner: self.inner.clone(),
                device_id: peer.device_id,
            },
            rx,
        )
    }

    /// Bring two nodes into radio range; both discover each other if started.
    pub async fn place_in_range(&self, a: &str, b: &str) {
        let mut inner = self.inner.lock().await;
        inner.link_range(a, b);
    }

    /// Take two nodes out of range, closing any session between them.
    pub async fn drop_from_range(&self, a: &str, b: &str) {
        let mut inner = self.inner.lock().await;
        inner.close_session(a, b);
        if let Some(slot) = inner.nodes.get_mut(a) {
            slot.in_range.remove(b);
        }
        if let Some(slot) = inner.nodes.get_mut(b) {
            slot.in_range.remove(a);
        }
        inner.notify_pair(a, b, LinkEvent::PeerLost);
    }

    /// Test convenience: put two nodes in range and open the session.
    pub async fn join(&self, a: &str, b: &str) {
        let mut inner = self.inner.lock().await;
        inner.link_range(a, b);
        inner.open_session(a, b);
    }

    /// Close the session between two nodes without moving them out of range.
    pub async fn sever(&self, a: &str, b: &str) {
        let mut inner = self.inner.lock().await;
        inner.close_session(a, b);
    }
}

impl HubInner {
    fn link_range(&mut self, a: &str, b: &str) {
        if a == b {
            return;
        }
        if let Some(slot) = self.nodes.get_mut(a) {
            slot.in_range.insert(b.to_string());
        }
        if let Some(slot) = self.nodes.get_mut(b) {
            slot.in_range.insert(a.to_string());
        }
        if self.both_started(a, b) {
            self.notify_pair(a, b, LinkEvent::PeerDiscovered);
        }
    }

    fn open_session(&mut self, a: &str, b: &str) {
        if a == b || !self.both_started(a, b) {
            return;
        }
        let fresh = self
            .nodes
            .get_mut(a)
            .map(|s| s.sessions.insert(b.to_string()))
            .unwrap_or(false);
        if let Some(slot) = self.nodes.get_mut(b) {
            slot.sessions.insert(a.to_string());
        }
        if fresh {
            self.notify_pair(a, b, LinkEvent::Connected);
        }
    }

    fn close_session(&mut self, a: &str, b: &str) {
        let open = self
            .nodes
            .get_mut(a)
            .map(|s| s.sessions.remove(b))
            .unwrap_or(false);
        if let Some(slot) = self.nodes.get_mut(b) {
            slot.sessions.remove(a);
        }
        if open {
            self.notify_pair(a, b, LinkEvent::Disconnected);
        }
    }

    fn both_started(&self, a: &str, b: &str) -> bool {
        self.nodes.get(a).map(|s| s.started).unwrap_or(false)
            && self.nodes.get(b).map(|s| s.started).unwrap_or(false)
    }

    /// Send `a` an event about `b` and `b` an event about `a`.
    fn notify_pair(&self, a: &str, b: &str, event: impl Fn(Peer) -> LinkEvent) {
        if let (Some(slot_a), Some(slot_b)) = (self.nodes.get(a), self.nodes.get(b)) {
            let _ = slot_a.events.send(event(slot_b.peer.clone()));
            let _ = slot_b.events.send(event(slot_a.peer.clone()));
        }
    }
}

/// One node's endpoint on a [`MemoryHub`].
pub struct MemoryLink {
    inner: Arc<Mutex<HubInner>>,
    device_id: String,
}

#[async_trait]
impl Link for MemoryLink {
    async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner.nodes.get_mut(&self.device_id) {
            slot.started = true;
        }
        // Everyone already in range discovers us, and we them.
        let in_range: Vec<String> = inner
            .nodes
            .get(&self.device_id)
            .map(|s| s.in_range.iter().cloned().collect())
            .unwrap_or_default();
        for other in in_range {
            if inner.both_started(&self.device_id, &other) {
                inner.notify_pair(&self.device_id, &other, LinkEvent::PeerDiscovered);
            }
        }
        debug!(device_id = %self.device_id, "memory link started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let sessions: Vec<String> = inner
            .nodes
            .get(&self.device_id)
            .map(|s| s.sessions.iter().cloned().collect())
            .unwrap_or_default();
        for other in sessions {
            inner.close_session(&self.device_id, &other);
        }
        if let Some(slot) = inner.nodes.get_mut(&self.device_id) {
            slot.started = false;
        }
        Ok(())
    }

    async fn connect(&self, peer: &Peer) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let in_range = inner
            .nodes
            .get(&self.device_id)
            .map(|s| s.in_range.contains(&peer.device_id))
            .unwrap_or(false);
        if !in_range {
            return Err(anyhow!("peer {} not in range", peer.device_id));
        }
        // Invitations are auto-accepted: opening the session is unilateral.
        inner.open_session(&self.device_id, &peer.device_id);
        Ok(())
    }

    async fn send(&self, frame: &[u8], to: &[Peer]) -> Result<()> {
        let inner = self.inner.lock().await;
        let Some(own) = inner.nodes.get(&self.device_id) else {
            return Err(anyhow!("link detached"));
        };
        let mut missed = Vec::new();
        for peer in to {
            if !own.sessions.contains(&peer.device_id) {
                missed.push(peer.device_id.clone());
                continue;
            }
            if let Some(target) = inner.nodes.get(&peer.device_id) {
                let _ = target.events.send(LinkEvent::Frame {
                    from: own.peer.clone(),
                    bytes: frame.to_vec(),
                });
            }
        }
        if missed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("no session with peers: {}", missed.join(", ")))
        }
    }
}
