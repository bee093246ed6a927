//! Gateway advertisement and opportunistic upload scenarios.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use lib_gateway::{Collector, UploadBatch};
use lib_mesh::{MemoryHub, UploadStatus};
use lib_protocol::{MessagePayload, GATEWAY_SYNC_PERIOD};
use pigeon::MeshContext;

/// Collector fake shared by every node in a scenario.
#[derive(Default)]
struct RecordingCollector {
    failing: AtomicBool,
    batches: Mutex<Vec<UploadBatch>>,
}

impl RecordingCollector {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl Collector for RecordingCollector {
    async fn push(&self, batch: &UploadBatch) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("collector returned 500 Internal Server Error");
        }
        self.batches.lock().unwrap().push(batch.clone());
        Ok(())
    }
}

async fn start_node(
    hub: &MemoryHub,
    id: &str,
    collector: Arc<RecordingCollector>,
) -> MeshContext {
    let (link, link_events) = hub.attach(id, id).await;
    MeshContext::start_ephemeral(id, id, Arc::new(link), link_events, collector)
        .await
        .expect("start node")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn broadcast(i: usize) -> MessagePayload {
    MessagePayload::Broadcast {
        title: format!("notice-{i}"),
        message: "supplies at the school".into(),
        priority: None,
        latitude: None,
        longitude: None,
    }
}

#[tokio::test(start_paused = true)]
async fn gateway_advertisement_propagates_and_goes_stale() {
    let hub = MemoryHub::new();
    let collector = Arc::new(RecordingCollector::default());
    let node_a = start_node(&hub, "a", collector.clone()).await;
    let _node_b = start_node(&hub, "b", collector.clone()).await;
    let node_g = start_node(&hub, "g", collector.clone()).await;
    hub.join("a", "b").await;
    hub.join("b", "g").await;
    settle().await;

    node_g.reachability.set_online(true);
    settle().await;

    let gateways = node_a.router.known_gateways().await;
    let (id, entry) = gateways.first().expect("advertisement reached a");
    assert_eq!(id, "g");
    assert_eq!(entry.hops, 2, "two links away from the gateway");
    assert!(node_a.router.has_reachable_gateway().await);
    assert_eq!(
        node_a.router.nearest_gateway().await,
        Some(("g".to_string(), 2))
    );

    // Take the gateway offline silently; the 30 s re-advertisements stop and
    // the entry ages out of the staleness window.
    node_g.stop().await;
    tokio::time::advance(Duration::from_secs(121)).await;

    assert!(!node_a.router.has_reachable_gateway().await);
    assert!(node_a.router.nearest_gateway().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn gateway_retraction_removes_the_entry() {
    let hub = MemoryHub::new();
    let collector = Arc::new(RecordingCollector::default());
    let node_a = start_node(&hub, "a", collector.clone()).await;
    let node_g = start_node(&hub, "g", collector.clone()).await;
    hub.join("a", "g").await;
    settle().await;

    node_g.reachability.set_online(true);
    settle().await;
    assert!(node_a.router.has_reachable_gateway().await);

    node_g.reachability.set_online(false);
    settle().await;
    assert!(
        !node_a.router.has_reachable_gateway().await,
        "isGateway=false removes the entry immediately"
    );
}

#[tokio::test(start_paused = true)]
async fn upload_retries_until_the_collector_recovers() {
    let hub = MemoryHub::new();
    let collector = Arc::new(RecordingCollector::default());
    let node = start_node(&hub, "g", collector.clone()).await;

    for i in 0..5 {
        node.router
            .originate(broadcast(i), None)
            .await
            .expect("originate");
    }
    node.reachability.set_online(true);
    settle().await;

    assert_eq!(node.uploader.synced_count().await, 5);
    assert_eq!(node.uploader.status().await, UploadStatus::Success(5));
    assert!(node.uploader.last_sync_time().await.is_some());

    // The collector goes down while three more messages accumulate.
    collector.set_failing(true);
    for i in 5..8 {
        node.router
            .originate(broadcast(i), None)
            .await
            .expect("originate");
    }
    tokio::time::sleep(GATEWAY_SYNC_PERIOD + Duration::from_secs(1)).await;

    assert_eq!(
        node.uploader.synced_count().await,
        5,
        "failed upload must not grow the synced set"
    );
    assert!(matches!(
        node.uploader.status().await,
        UploadStatus::Failed(_)
    ));

    // Recovery: the retained slice goes out on the next periodic tick.
    collector.set_failing(false);
    tokio::time::sleep(GATEWAY_SYNC_PERIOD + Duration::from_secs(1)).await;

    assert_eq!(node.uploader.synced_count().await, 8);
    assert_eq!(node.uploader.status().await, UploadStatus::Success(3));
}

#[tokio::test(start_paused = true)]
async fn relayed_messages_reach_the_collector_through_the_gateway() {
    let hub = MemoryHub::new();
    let collector = Arc::new(RecordingCollector::default());
    let node_a = start_node(&hub, "a", collector.clone()).await;
    let node_g = start_node(&hub, "g", collector.clone()).await;
    hub.join("a", "g").await;
    settle().await;

    let message = node_a
        .router
        .originate(broadcast(0), None)
        .await
        .expect("originate");
    settle().await;

    node_g.reachability.set_online(true);
    settle().await;

    assert_eq!(collector.batch_count(), 1);
    let batches = collector.batches.lock().unwrap();
    assert_eq!(batches[0].device_id, "g", "the gateway does the uploading");
    let uploaded_ids: Vec<&str> = batches[0]
        .messages
        .iter()
        .filter_map(|m| m["id"].as_str())
        .collect();
    assert!(
        uploaded_ids.contains(&message.id.as_str()),
        "a's relayed message was uploaded by g"
    );
}

#[tokio::test(start_paused = true)]
async fn synced_count_rides_along_with_the_advertisement() {
    let hub = MemoryHub::new();
    let collector = Arc::new(RecordingCollector::default());
    let node_a = start_node(&hub, "a", collector.clone()).await;
    let node_g = start_node(&hub, "g", collector.clone()).await;
    hub.join("a", "g").await;
    settle().await;

    node_g
        .router
        .originate(broadcast(0), None)
        .await
        .expect("originate");
    node_g.reachability.set_online(true);
    settle().await;

    // The periodic re-advertisement after the first sync carries the count.
    tokio::time::sleep(GATEWAY_SYNC_PERIOD + Duration::from_secs(1)).await;
    let gateways = node_a.router.known_gateways().await;
    let (_, entry) = gateways.first().expect("gateway known");
    assert!(
        entry.synced_count >= 1,
        "advertised synced count lags at {}",
        entry.synced_count
    );
}
