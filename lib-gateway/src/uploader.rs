//! Opportunistic gateway uploader
//!
//! Watches reachability; while online the node is a gateway: every 30
//! seconds it uploads the not-yet-synced slice of the message store to the
//! collector and re-advertises its gateway status into the mesh. Ids enter
//! the persisted synced set only after the collector acknowledges, so a
//! failed upload retries the same slice and every admitted message is
//! uploaded at least once.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use lib_mesh::{EventBus, MeshEvent, MeshRouter, UploadStatus};
use lib_protocol::{MessageEnvelope, GATEWAY_SYNC_PERIOD};
use lib_storage::{KvStore, SharedMessageStore};
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::collector::{Collector, UploadBatch};

/// KV key holding the persisted synced-id set.
pub const SYNCED_IDS_KEY: &str = "uploader.syncedIds";

/// The gateway uploader for one node.
#[derive(Clone)]
pub struct GatewayUploader {
    inner: Arc<UploaderInner>,
}

struct UploaderInner {
    router: MeshRouter,
    store: SharedMessageStore,
    collector: Arc<dyn Collector>,
    kv: Option<KvStore>,
    events: EventBus,
    state: RwLock<UploaderState>,
    /// Stop signal and handle of the currently running gateway loop.
    active_task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct UploaderState {
    active: bool,
    synced_ids: HashSet<String>,
    last_sync_time: Option<DateTime<Utc>>,
    status: UploadStatus,
}

impl GatewayUploader {
    /// Build an uploader over the node's store and router.
    ///
    /// The synced-id set is loaded from the KV store when one is given;
    /// memory-only uploaders start from scratch.
    pub fn new(
        router: MeshRouter,
        store: SharedMessageStore,
        collector: Arc<dyn Collector>,
        kv: Option<KvStore>,
        events: EventBus,
    ) -> Self {
        let synced_ids = match kv
            .as_ref()
            .map(|kv| kv.get::<HashSet<String>>(SYNCED_IDS_KEY))
        {
            Some(Ok(Some(ids))) => ids,
            Some(Err(e)) => {
                warn!("discarding unreadable synced-id snapshot: {e:#}");
                HashSet::new()
            }
            _ => HashSet::new(),
        };
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(UploaderInner {
                router,
                store,
                collector,
                kv,
                events,
                state: RwLock::new(UploaderState {
                    active: false,
                    synced_ids,
                    last_sync_time: None,
                    status: UploadStatus::Idle,
                }),
                active_task: Mutex::new(None),
                shutdown,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Follow the reachability signal, activating on each rising edge.
    pub async fn run(&self, reachability: watch::Receiver<bool>) {
        let task = tokio::spawn(reachability_loop(
            self.inner.clone(),
            reachability,
            self.inner.shutdown.subscribe(),
        ));
        self.inner.tasks.lock().await.push(task);
    }

    /// Cancel all timers and stop following reachability.
    pub async fn stop(&self) {
        let _ = self.inner.shutdown.send(true);
        let mut tasks = self.inner.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        drop(tasks);
        self.inner.stop_gateway_loop().await;
    }

    /// Trigger one sync tick immediately.
    pub async fn sync_now(&self) {
        self.inner.sync_tick().await;
    }

    /// Forget every synced id and retransmit the full log.
    ///
    /// Used to repopulate the collector after data loss on its side.
    pub async fn force_sync_all(&self) {
        {
            let mut state = self.inner.state.write().await;
            state.synced_ids.clear();
            self.inner.persist_synced_ids(&state.synced_ids);
        }
        info!("synced-id set cleared; resending full log");
        self.inner.sync_tick().await;
    }

    pub async fn is_active(&self) -> bool {
        self.inner.state.read().await.active
    }

    pub async fn status(&self) -> UploadStatus {
        self.inner.state.read().await.status.clone()
    }

    pub async fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.inner.state.read().await.last_sync_time
    }

    pub async fn synced_count(&self) -> usize {
        self.inner.state.read().await.synced_ids.len()
    }
}

async fn reachability_loop(
    inner: Arc<UploaderInner>,
    mut reachability: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let online = *reachability.borrow();
    inner.set_online(online).await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            changed = reachability.changed() => match changed {
                Ok(()) => {
                    let online = *reachability.borrow();
                    inner.set_online(online).await;
                }
                Err(_) => break,
            },
        }
    }
}

/// Periodic work while the node is a gateway: sync, then re-advertise with
/// the fresh synced count. The first tick fires immediately on activation.
async fn gateway_loop(inner: Arc<UploaderInner>, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(GATEWAY_SYNC_PERIOD);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                inner.sync_tick().await;
                inner.broadcast_status().await;
            }
        }
    }
}

impl UploaderInner {
    async fn set_online(self: &Arc<Self>, online: bool) {
        let currently_active = self.state.read().await.active;
        if online && !currently_active {
            info!("connectivity gained; acting as gateway");
            self.state.write().await.active = true;
            self.broadcast_status().await;

            let (stop_tx, stop_rx) = watch::channel(false);
            let task = tokio::spawn(gateway_loop(self.clone(), stop_rx));
            *self.active_task.lock().await = Some((stop_tx, task));
        } else if !online && currently_active {
            info!("connectivity lost; ceasing gateway role");
            self.state.write().await.active = false;
            self.stop_gateway_loop().await;
            self.broadcast_status().await;
        }
    }

    async fn stop_gateway_loop(&self) {
        if let Some((stop, task)) = self.active_task.lock().await.take() {
            let _ = stop.send(true);
            let _ = task.await;
        }
    }

    /// One upload attempt over the currently unsynced slice of the log.
    async fn sync_tick(&self) {
        let unsynced: Vec<MessageEnvelope> = {
            let state = self.state.read().await;
            let store = self.store.read().await;
            store
                .all()
                .filter(|m| !state.synced_ids.contains(&m.id))
                .cloned()
                .collect()
        };
        if unsynced.is_empty() {
            self.set_status(UploadStatus::Idle).await;
            return;
        }

        self.set_status(UploadStatus::Syncing).await;
        let messages: Vec<Value> = unsynced
            .iter()
            .filter_map(|m| match lib_protocol::to_value(m) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(id = %m.id, "skipping unencodable message: {e}");
                    None
                }
            })
            .collect();
        let batch = UploadBatch {
            device_id: self.router.device_id().to_string(),
            device_name: self.router.device_name().to_string(),
            timestamp: Utc::now(),
            messages,
        };

        match self.collector.push(&batch).await {
            Ok(()) => {
                {
                    let mut state = self.state.write().await;
                    for message in &unsynced {
                        state.synced_ids.insert(message.id.clone());
                    }
                    state.last_sync_time = Some(Utc::now());
                    self.persist_synced_ids(&state.synced_ids);
                }
                info!(uploaded = unsynced.len(), "sync complete");
                self.set_status(UploadStatus::Success(unsynced.len())).await;
            }
            Err(e) => {
                // Ids stay out of the synced set; the next tick retries.
                warn!("upload failed: {e:#}");
                self.set_status(UploadStatus::Failed(format!("{e:#}"))).await;
            }
        }
    }

    async fn broadcast_status(&self) {
        let (active, count) = {
            let state = self.state.read().await;
            (state.active, state.synced_ids.len() as u64)
        };
        if let Err(e) = self.router.broadcast_gateway_status(active, count).await {
            debug!("gateway status broadcast failed: {e:#}");
        }
    }

    async fn set_status(&self, status: UploadStatus) {
        let mut state = self.state.write().await;
        if state.status == status {
            return;
        }
        state.status = status.clone();
        drop(state);
        self.events.emit(MeshEvent::UploadStatusChanged(status));
    }

    fn persist_synced_ids(&self, ids: &HashSet<String>) {
        let Some(kv) = &self.kv else { return };
        if let Err(e) = kv.put(SYNCED_IDS_KEY, ids) {
            error!("failed to persist synced ids: {e:#}");
        }
    }
}
