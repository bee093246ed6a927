//! Mesh router: deduplicating store-and-forward relay
//!
//! Every frame runs the same admission pipeline: decode, TTL check, dedup
//! against the store, per-type dispatch, then a forward to every connected
//! peer except the one it arrived from. Dedup happens before any forward,
//! so a second arrival of the same id from another peer can never produce a
//! second relay. Locally originated messages run the same store-first path.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use lib_protocol::{
    MessageEnvelope, MessagePayload, MessageType, WireError, AUTO_CONNECT_PERIOD,
    CONNECT_INVITE_TIMEOUT, MAX_ENVELOPE_SIZE, MAX_HOPS, MAX_PEERS,
};
use lib_storage::SharedMessageStore;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{EventBus, MeshEvent};
use crate::link::{Link, LinkEvent, Peer};
use crate::stats::RelayStats;
use crate::topology::{GatewayEntry, TopologyTracker};

/// The mesh relay for one node.
#[derive(Clone)]
pub struct MeshRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    device_id: String,
    device_name: String,
    link: Arc<dyn Link>,
    store: SharedMessageStore,
    topology: RwLock<TopologyTracker>,
    events: EventBus,
    connected: RwLock<HashMap<String, Peer>>,
    discovered: RwLock<HashMap<String, Peer>>,
    /// Direct messages awaiting a delivery receipt, by message id.
    pending_receipts: RwLock<HashMap<String, Instant>>,
    stats: RwLock<RelayStats>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

enum Admission {
    Admitted,
    Marked,
    Duplicate,
}

/// Probe traffic is deduplicated but kept out of the persistent log, so it
/// neither churns the bounded store nor lands in gateway uploads.
fn is_transient(kind: MessageType) -> bool {
    matches!(
        kind,
        MessageType::Ping | MessageType::Discovery | MessageType::GatewayStatus
    )
}

impl MeshRouter {
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        link: Arc<dyn Link>,
        store: SharedMessageStore,
        events: EventBus,
    ) -> Self {
        let device_id = device_id.into();
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(RouterInner {
                topology: RwLock::new(TopologyTracker::new(device_id.clone())),
                device_id,
                device_name: device_name.into(),
                link,
                store,
                events,
                connected: RwLock::new(HashMap::new()),
                discovered: RwLock::new(HashMap::new()),
                pending_receipts: RwLock::new(HashMap::new()),
                stats: RwLock::new(RelayStats::default()),
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start the link and the router's background loops.
    pub async fn run(&self, link_events: UnboundedReceiver<LinkEvent>) -> Result<()> {
        self.inner.link.start().await?;

        let event_task = tokio::spawn(event_loop(
            self.inner.clone(),
            link_events,
            self.inner.shutdown.subscribe(),
        ));
        let connect_task = tokio::spawn(auto_connect_loop(
            self.inner.clone(),
            self.inner.shutdown.subscribe(),
        ));

        let mut tasks = self.inner.tasks.lock().await;
        tasks.push(event_task);
        tasks.push(connect_task);
        info!(device_id = %self.inner.device_id, "mesh router running");
        Ok(())
    }

    /// Cancel timers, drain in-flight work and disconnect the link.
    pub async fn stop(&self) {
        let _ = self.inner.shutdown.send(true);
        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        if let Err(e) = self.inner.link.stop().await {
            warn!("link did not stop cleanly: {e:#}");
        }
        info!(device_id = %self.inner.device_id, "mesh router stopped");
    }

    /// Originate a message from this node and flood it to all neighbors.
    ///
    /// The message is admitted locally first, so it shows up in the own log
    /// and is eligible for gateway upload.
    pub async fn originate(
        &self,
        payload: MessagePayload,
        target_device_id: Option<String>,
    ) -> Result<MessageEnvelope> {
        self.inner.originate(payload, target_device_id).await
    }

    /// Address a direct message to one device.
    pub async fn send_direct(
        &self,
        content: impl Into<String>,
        target_device_id: impl Into<String>,
    ) -> Result<MessageEnvelope> {
        let target = target_device_id.into();
        self.inner
            .originate(
                MessagePayload::Direct {
                    content: content.into(),
                },
                Some(target),
            )
            .await
    }

    /// Flood a liveness probe.
    pub async fn send_ping(&self) -> Result<MessageEnvelope> {
        self.inner
            .originate(
                MessagePayload::Ping {
                    original_sender_id: Some(self.inner.device_id.clone()),
                    original_timestamp: Some(Utc::now()),
                },
                None,
            )
            .await
    }

    /// Flood a topology discovery request carrying our neighbor list.
    pub async fn discover_network(&self) -> Result<MessageEnvelope> {
        let neighbors = self.inner.neighbor_ids().await;
        self.inner
            .originate(
                MessagePayload::Discovery {
                    request_id: Uuid::new_v4().to_string(),
                    connected_peers: Some(neighbors),
                },
                None,
            )
            .await
    }

    /// Advertise (or retract) this node as a gateway.
    pub async fn broadcast_gateway_status(
        &self,
        is_gateway: bool,
        synced_count: u64,
    ) -> Result<MessageEnvelope> {
        self.inner
            .originate(
                MessagePayload::GatewayStatus {
                    is_gateway,
                    gateway_device_id: self.inner.device_id.clone(),
                    gateway_device_name: self.inner.device_name.clone(),
                    synced_count: Some(synced_count),
                },
                None,
            )
            .await
    }

    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn device_name(&self) -> &str {
        &self.inner.device_name
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.inner.events.subscribe()
    }

    pub async fn connected_peers(&self) -> Vec<Peer> {
        self.inner.connected.read().await.values().cloned().collect()
    }

    pub async fn discovered_peers(&self) -> Vec<Peer> {
        self.inner
            .discovered
            .read()
            .await
            .values()
            .cloned()
            .collect()
    }

    pub async fn known_devices(&self) -> HashMap<String, u32> {
        self.inner.topology.read().await.known_devices().clone()
    }

    pub async fn known_gateways(&self) -> Vec<(String, GatewayEntry)> {
        self.inner
            .topology
            .read()
            .await
            .known_gateways()
            .map(|(id, entry)| (id.to_string(), entry.clone()))
            .collect()
    }

    pub async fn nearest_gateway(&self) -> Option<(String, u32)> {
        self.inner
            .topology
            .read()
            .await
            .nearest_gateway()
            .map(|(id, entry)| (id.to_string(), entry.hops))
    }

    pub async fn has_reachable_gateway(&self) -> bool {
        self.inner.topology.read().await.has_reachable_gateway()
    }

    /// Ids of direct messages still awaiting a delivery receipt.
    pub async fn pending_receipts(&self) -> Vec<String> {
        self.inner
            .pending_receipts
            .read()
            .await
            .keys()
            .cloned()
            .collect()
    }

    pub async fn stats(&self) -> RelayStats {
        self.inner.stats.read().await.clone()
    }
}

async fn event_loop(
    inner: Arc<RouterInner>,
    mut link_events: UnboundedReceiver<LinkEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = link_events.recv() => match event {
                Some(event) => inner.handle_link_event(event).await,
                None => break,
            },
        }
    }
}

async fn auto_connect_loop(inner: Arc<RouterInner>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(AUTO_CONNECT_PERIOD);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => inner.auto_connect_tick().await,
        }
    }
}

impl RouterInner {
    async fn handle_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::PeerDiscovered(peer) => {
                if peer.device_id != self.device_id {
                    debug!(peer = %peer.device_id, "peer discovered");
                    self.discovered
                        .write()
                        .await
                        .insert(peer.device_id.clone(), peer);
                }
            }
            LinkEvent::PeerLost(peer) => {
                self.discovered.write().await.remove(&peer.device_id);
            }
            LinkEvent::Connected(peer) => {
                info!(peer = %peer.device_id, "peer connected");
                self.connected
                    .write()
                    .await
                    .insert(peer.device_id.clone(), peer.clone());
                self.events.emit(MeshEvent::PeerConnected(peer));
            }
            LinkEvent::Disconnected(peer) => {
                info!(peer = %peer.device_id, "peer disconnected");
                self.connected.write().await.remove(&peer.device_id);
                self.events.emit(MeshEvent::PeerDisconnected(peer));
            }
            LinkEvent::Frame { from, bytes } => {
                self.process_frame(&from, &bytes).await;
            }
        }
    }

    /// The admission pipeline for one received frame.
    async fn process_frame(&self, from: &Peer, bytes: &[u8]) {
        let message = match lib_protocol::decode(bytes) {
            Ok(message) => message,
            Err(e) => {
                self.stats.write().await.decode_errors += 1;
                match e {
                    WireError::HopMismatch { .. } | WireError::PathSenderMismatch(_) => {
                        warn!(peer = %from.device_id, "dropping frame violating hop invariants: {e}");
                    }
                    _ => {
                        debug!(peer = %from.device_id, "dropping malformed frame: {e}");
                    }
                }
                return;
            }
        };

        // TTL: a copy at the bound is dropped outright, not admitted.
        if message.hop_count >= MAX_HOPS {
            self.stats.write().await.ttl_dropped += 1;
            return;
        }

        let admission = {
            let mut store = self.store.write().await;
            if store.has_seen(&message.id) {
                Admission::Duplicate
            } else if is_transient(message.message_type()) {
                store.mark_seen(&message.id);
                Admission::Marked
            } else {
                store.admit(message.clone());
                Admission::Admitted
            }
        };

        match admission {
            Admission::Duplicate => {
                self.stats.write().await.duplicates_dropped += 1;
                return;
            }
            Admission::Admitted => {
                self.stats.write().await.messages_admitted += 1;
                self.events.emit(MeshEvent::MessageAdmitted(message.clone()));
            }
            Admission::Marked => {}
        }

        self.dispatch(&message).await;
        self.forward(message, Some(from)).await;
    }

    /// Per-type side effects of a first arrival.
    async fn dispatch(&self, message: &MessageEnvelope) {
        match &message.payload {
            MessagePayload::Direct { .. } => {
                if message.is_for(&self.device_id) {
                    info!(from = %message.sender_id, "direct message delivered");
                    let receipt = MessagePayload::DeliveryReceipt {
                        original_message_id: message.id.clone(),
                        delivered_at: Utc::now(),
                    };
                    if let Err(e) = self
                        .originate(receipt, Some(message.sender_id.clone()))
                        .await
                    {
                        warn!("failed to emit delivery receipt: {e:#}");
                    }
                }
            }
            MessagePayload::Ping {
                original_sender_id,
                original_timestamp,
            } => {
                let pong = MessagePayload::Pong {
                    original_sender_id: original_sender_id
                        .clone()
                        .unwrap_or_else(|| message.sender_id.clone()),
                    original_timestamp: original_timestamp.unwrap_or(message.timestamp),
                };
                if let Err(e) = self.originate(pong, None).await {
                    debug!("failed to reply to ping: {e:#}");
                }
            }
            MessagePayload::Pong {
                original_sender_id, ..
            } => {
                self.topology
                    .write()
                    .await
                    .observe(original_sender_id, message.hop_distance());
                self.events.emit(MeshEvent::TopologyUpdated);
            }
            MessagePayload::Discovery { request_id, .. } => {
                let reply = MessagePayload::DiscoveryReply {
                    request_id: request_id.clone(),
                    connected_peers: self.neighbor_ids().await,
                };
                if let Err(e) = self.originate(reply, None).await {
                    debug!("failed to reply to discovery: {e:#}");
                }
            }
            MessagePayload::DiscoveryReply {
                connected_peers, ..
            } => {
                let mut topology = self.topology.write().await;
                topology.observe(&message.sender_id, message.hop_distance());
                for peer in connected_peers {
                    // One link beyond the replying node.
                    topology.observe(peer, message.hop_distance() + 1);
                }
                drop(topology);
                self.events.emit(MeshEvent::TopologyUpdated);
            }
            MessagePayload::DeliveryReceipt {
                original_message_id,
                ..
            } => {
                if self
                    .pending_receipts
                    .write()
                    .await
                    .remove(original_message_id)
                    .is_some()
                {
                    info!(message_id = %original_message_id, "direct message acknowledged");
                }
            }
            MessagePayload::GatewayStatus {
                is_gateway,
                gateway_device_id,
                gateway_device_name,
                synced_count,
            } => {
                let mut topology = self.topology.write().await;
                topology.observe_gateway(
                    gateway_device_id,
                    gateway_device_name,
                    message.hop_distance(),
                    *is_gateway,
                    synced_count.unwrap_or(0),
                );
                let reachable = topology.has_reachable_gateway();
                drop(topology);
                self.events.emit(MeshEvent::GatewayStateChanged { reachable });
            }
            // Content types have no side effects beyond admission.
            MessagePayload::Sos { .. }
            | MessagePayload::Triage { .. }
            | MessagePayload::Shelter { .. }
            | MessagePayload::MissingPerson { .. }
            | MessagePayload::Broadcast { .. } => {}
        }
    }

    /// Relay a message to all connected peers except the one it came from.
    async fn forward(&self, mut message: MessageEnvelope, arrived_from: Option<&Peer>) {
        // Skip when the bump would push past the TTL.
        if message.hop_count + 1 > MAX_HOPS {
            return;
        }
        let targets: Vec<Peer> = self
            .connected
            .read()
            .await
            .values()
            .filter(|peer| {
                arrived_from.map_or(true, |from| peer.device_id != from.device_id)
            })
            .cloned()
            .collect();
        if targets.is_empty() {
            return;
        }

        message.add_hop(&self.device_id);
        let bytes = match lib_protocol::encode(&message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to re-encode message for relay: {e}");
                return;
            }
        };
        if let Err(e) = self.link.send(&bytes, &targets).await {
            // The link already retried within the session; another neighbor's
            // copy covers the gap.
            info!("relay send incomplete: {e:#}");
        }
        let mut stats = self.stats.write().await;
        stats.messages_forwarded += 1;
        stats.frames_sent += targets.len() as u64;
    }

    async fn originate(
        &self,
        payload: MessagePayload,
        target_device_id: Option<String>,
    ) -> Result<MessageEnvelope> {
        let message = MessageEnvelope::originate(
            &self.device_id,
            &self.device_name,
            payload,
            target_device_id,
        );
        let bytes = lib_protocol::encode(&message)?;
        if bytes.len() > MAX_ENVELOPE_SIZE {
            anyhow::bail!(
                "refusing to originate a {} byte envelope over the {} byte cap",
                bytes.len(),
                MAX_ENVELOPE_SIZE
            );
        }

        let transient = is_transient(message.message_type());
        {
            let mut store = self.store.write().await;
            if transient {
                store.mark_seen(&message.id);
            } else {
                store.admit(message.clone());
            }
        }
        {
            let mut stats = self.stats.write().await;
            stats.messages_originated += 1;
            if !transient {
                stats.messages_admitted += 1;
            }
        }
        if !transient {
            self.events.emit(MeshEvent::MessageAdmitted(message.clone()));
        }
        if message.message_type() == MessageType::Direct {
            self.pending_receipts
                .write()
                .await
                .insert(message.id.clone(), Instant::now());
        }

        let targets: Vec<Peer> = self.connected.read().await.values().cloned().collect();
        if !targets.is_empty() {
            if let Err(e) = self.link.send(&bytes, &targets).await {
                info!("origination send incomplete: {e:#}");
            }
            self.stats.write().await.frames_sent += targets.len() as u64;
        }
        Ok(message)
    }

    async fn neighbor_ids(&self) -> Vec<String> {
        self.connected.read().await.keys().cloned().collect()
    }

    /// Dial every discovered-but-unconnected peer, up to the session cap.
    async fn auto_connect_tick(&self) {
        let connected = self.connected.read().await;
        let slots = MAX_PEERS.saturating_sub(connected.len());
        if slots == 0 {
            return;
        }
        let candidates: Vec<Peer> = self
            .discovered
            .read()
            .await
            .values()
            .filter(|peer| !connected.contains_key(&peer.device_id))
            .take(slots)
            .cloned()
            .collect();
        drop(connected);

        for peer in candidates {
            let link = self.link.clone();
            tokio::spawn(async move {
                match tokio::time::timeout(CONNECT_INVITE_TIMEOUT, link.connect(&peer)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(peer = %peer.device_id, "connect failed: {e:#}"),
                    Err(_) => debug!(peer = %peer.device_id, "connect attempt timed out"),
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::memory::MemoryHub;
    use lib_storage::{new_shared, MessageStore};
    use std::time::Duration;

    async fn spawn_router(hub: &MemoryHub, id: &str, name: &str) -> (MeshRouter, SharedMessageStore) {
        let (link, link_events) = hub.attach(id, name).await;
        let store = new_shared(MessageStore::in_memory());
        let router = MeshRouter::new(id, name, Arc::new(link), store.clone(), EventBus::new());
        router.run(link_events).await.expect("run router");
        (router, store)
    }

    fn raw_broadcast(sender: &str) -> MessageEnvelope {
        MessageEnvelope::originate(
            sender,
            sender,
            MessagePayload::Broadcast {
                title: "test".into(),
                message: "body".into(),
                priority: None,
                latitude: None,
                longitude: None,
            },
            None,
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_arrivals_admit_once_and_forward_once() {
        let hub = MemoryHub::new();
        let (_router, store) = spawn_router(&hub, "a", "A").await;
        let (link_b, mut rx_b) = hub.attach("b", "B").await;
        let (_link_c, mut rx_c) = hub.attach("c", "C").await;
        link_b.start().await.expect("start b");
        _link_c.start().await.expect("start c");
        hub.join("a", "b").await;
        hub.join("a", "c").await;
        settle().await;

        let frame = lib_protocol::encode(&raw_broadcast("b")).expect("encode");
        let a = Peer::new("a", "A");
        link_b.send(&frame, std::slice::from_ref(&a)).await.expect("send");
        link_b.send(&frame, std::slice::from_ref(&a)).await.expect("resend");
        settle().await;

        assert_eq!(store.read().await.len(), 1, "admitted exactly once");

        // c saw exactly one relayed copy, with a's hop appended.
        let mut frames = Vec::new();
        while let Ok(event) = rx_c.try_recv() {
            if let LinkEvent::Frame { bytes, .. } = event {
                frames.push(bytes);
            }
        }
        assert_eq!(frames.len(), 1, "forwarded exactly once");
        let relayed = lib_protocol::decode(&frames[0]).expect("decode relayed");
        assert_eq!(relayed.hops, vec!["b".to_string(), "a".to_string()]);
        assert_eq!(relayed.hop_count, 1);

        // b never got its own message back.
        while let Ok(event) = rx_b.try_recv() {
            assert!(
                !matches!(event, LinkEvent::Frame { .. }),
                "message echoed to its arrival peer"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_bound_drops_without_admission() {
        let hub = MemoryHub::new();
        let (router, store) = spawn_router(&hub, "a", "A").await;
        let (link_b, _rx_b) = hub.attach("b", "B").await;
        let (_link_c, mut rx_c) = hub.attach("c", "C").await;
        link_b.start().await.expect("start b");
        _link_c.start().await.expect("start c");
        hub.join("a", "b").await;
        hub.join("a", "c").await;
        settle().await;

        let mut message = raw_broadcast("b");
        for i in 0..MAX_HOPS {
            message.add_hop(format!("relay-{i}"));
        }
        assert_eq!(message.hop_count, MAX_HOPS);
        let frame = lib_protocol::encode(&message).expect("encode");
        link_b
            .send(&frame, &[Peer::new("a", "A")])
            .await
            .expect("send");
        settle().await;

        assert!(store.read().await.is_empty(), "store unchanged");
        assert_eq!(router.stats().await.ttl_dropped, 1);
        while let Ok(event) = rx_c.try_recv() {
            assert!(
                !matches!(event, LinkEvent::Frame { .. }),
                "TTL-expired message must not be forwarded"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn direct_delivery_emits_receipt_to_sender() {
        let hub = MemoryHub::new();
        let (_router, store) = spawn_router(&hub, "a", "A").await;
        let (link_b, mut rx_b) = hub.attach("b", "B").await;
        link_b.start().await.expect("start b");
        hub.join("a", "b").await;
        settle().await;

        let direct = MessageEnvelope::originate(
            "b",
            "B",
            MessagePayload::Direct {
                content: "status?".into(),
            },
            Some("a".into()),
        );
        let direct_id = direct.id.clone();
        let frame = lib_protocol::encode(&direct).expect("encode");
        link_b
            .send(&frame, &[Peer::new("a", "A")])
            .await
            .expect("send");
        settle().await;

        assert!(store.read().await.has_seen(&direct_id));

        let receipt = loop {
            match rx_b.try_recv() {
                Ok(LinkEvent::Frame { bytes, .. }) => {
                    break lib_protocol::decode(&bytes).expect("decode")
                }
                Ok(_) => continue,
                Err(_) => panic!("no receipt frame arrived"),
            }
        };
        match receipt.payload {
            MessagePayload::DeliveryReceipt {
                original_message_id,
                ..
            } => assert_eq!(original_message_id, direct_id),
            other => panic!("expected receipt, got {other:?}"),
        }
        assert_eq!(receipt.target_device_id.as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn ping_gets_pong_with_probe_origin() {
        let hub = MemoryHub::new();
        let (_router, _store) = spawn_router(&hub, "a", "A").await;
        let (link_b, mut rx_b) = hub.attach("b", "B").await;
        link_b.start().await.expect("start b");
        hub.join("a", "b").await;
        settle().await;

        let ping = MessageEnvelope::originate(
            "b",
            "B",
            MessagePayload::Ping {
                original_sender_id: Some("b".into()),
                original_timestamp: Some(Utc::now()),
            },
            None,
        );
        let frame = lib_protocol::encode(&ping).expect("encode");
        link_b
            .send(&frame, &[Peer::new("a", "A")])
            .await
            .expect("send");
        settle().await;

        let mut saw_pong = false;
        while let Ok(event) = rx_b.try_recv() {
            if let LinkEvent::Frame { bytes, .. } = event {
                let reply = lib_protocol::decode(&bytes).expect("decode");
                if let MessagePayload::Pong {
                    original_sender_id, ..
                } = reply.payload
                {
                    assert_eq!(original_sender_id, "b");
                    saw_pong = true;
                }
            }
        }
        assert!(saw_pong, "ping went unanswered");
    }

    #[tokio::test(start_paused = true)]
    async fn discovery_reply_updates_topology() {
        let hub = MemoryHub::new();
        let (router, _store) = spawn_router(&hub, "a", "A").await;
        let (link_b, _rx_b) = hub.attach("b", "B").await;
        link_b.start().await.expect("start b");
        hub.join("a", "b").await;
        settle().await;

        let reply = MessageEnvelope::originate(
            "b",
            "B",
            MessagePayload::DiscoveryReply {
                request_id: "req-1".into(),
                connected_peers: vec!["d".into(), "a".into()],
            },
            None,
        );
        let frame = lib_protocol::encode(&reply).expect("encode");
        link_b
            .send(&frame, &[Peer::new("a", "A")])
            .await
            .expect("send");
        settle().await;

        let devices = router.known_devices().await;
        assert_eq!(devices.get("b"), Some(&1), "reply sender is one hop away");
        assert_eq!(devices.get("d"), Some(&2), "its neighbor is one link beyond");
        assert!(!devices.contains_key("a"), "local node never appears remote");
    }

    #[tokio::test(start_paused = true)]
    async fn origination_registers_pending_receipt() {
        let hub = MemoryHub::new();
        let (router, store) = spawn_router(&hub, "a", "A").await;
        let (link_b, _rx_b) = hub.attach("b", "B").await;
        link_b.start().await.expect("start b");
        hub.join("a", "b").await;
        settle().await;

        let message = router.send_direct("hello", "b").await.expect("send");

        assert!(store.read().await.has_seen(&message.id), "admitted first");
        assert_eq!(router.pending_receipts().await, vec![message.id.clone()]);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_connect_dials_discovered_peers() {
        let hub = MemoryHub::new();
        let (router, _store) = spawn_router(&hub, "a", "A").await;
        let (link_b, _rx_b) = hub.attach("b", "B").await;
        link_b.start().await.expect("start b");
        hub.place_in_range("a", "b").await;

        // First interval tick fires immediately; give it a cycle.
        tokio::time::sleep(AUTO_CONNECT_PERIOD + Duration::from_secs(1)).await;

        let connected = router.connected_peers().await;
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].device_id, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_background_tasks() {
        let hub = MemoryHub::new();
        let (router, _store) = spawn_router(&hub, "a", "A").await;
        settle().await;

        router.stop().await;
        assert!(router.connected_peers().await.is_empty());
    }
}
