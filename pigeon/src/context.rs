//! Mesh context
//!
//! One value owning every component of a running node: store, router,
//! uploader and the reachability handle, wired together at startup and
//! threaded explicitly instead of shared singletons. Tests build several
//! independent contexts over one in-process hub to exercise multi-node
//! scenarios.

use std::sync::Arc;

use anyhow::Result;
use lib_gateway::{Collector, GatewayUploader, ReachabilityMonitor};
use lib_identity::DeviceIdentity;
use lib_mesh::{EventBus, Link, LinkEvent, MeshRouter};
use lib_storage::{new_shared, KvStore, MessageStore, SharedMessageStore};
use tokio::sync::mpsc::UnboundedReceiver;

/// A fully wired mesh node.
pub struct MeshContext {
    pub store: SharedMessageStore,
    pub events: EventBus,
    pub router: MeshRouter,
    pub uploader: GatewayUploader,
    pub reachability: ReachabilityMonitor,
}

impl MeshContext {
    /// Start a persistent node from its stored identity.
    pub async fn start(
        identity: &DeviceIdentity,
        kv: KvStore,
        link: Arc<dyn Link>,
        link_events: UnboundedReceiver<LinkEvent>,
        collector: Arc<dyn Collector>,
    ) -> Result<Self> {
        let store = new_shared(MessageStore::open(kv.clone()));
        Self::assemble(
            identity.device_id(),
            identity.device_name(),
            store,
            Some(kv),
            link,
            link_events,
            collector,
        )
        .await
    }

    /// Start an ephemeral node with an in-memory store.
    ///
    /// Used by the demo mesh and by multi-node tests, which pick their own
    /// device ids.
    pub async fn start_ephemeral(
        device_id: &str,
        device_name: &str,
        link: Arc<dyn Link>,
        link_events: UnboundedReceiver<LinkEvent>,
        collector: Arc<dyn Collector>,
    ) -> Result<Self> {
        let store = new_shared(MessageStore::in_memory());
        Self::assemble(
            device_id,
            device_name,
            store,
            None,
            link,
            link_events,
            collector,
        )
        .await
    }

    async fn assemble(
        device_id: &str,
        device_name: &str,
        store: SharedMessageStore,
        kv: Option<KvStore>,
        link: Arc<dyn Link>,
        link_events: UnboundedReceiver<LinkEvent>,
        collector: Arc<dyn Collector>,
    ) -> Result<Self> {
        let events = EventBus::new();
        let router = MeshRouter::new(device_id, device_name, link, store.clone(), events.clone());
        router.run(link_events).await?;

        let uploader = GatewayUploader::new(
            router.clone(),
            store.clone(),
            collector,
            kv,
            events.clone(),
        );
        let reachability = ReachabilityMonitor::new();
        uploader.run(reachability.watch()).await;

        Ok(Self {
            store,
            events,
            router,
            uploader,
            reachability,
        })
    }

    /// Stop the uploader and the router, draining in-flight work.
    pub async fn stop(&self) {
        self.uploader.stop().await;
        self.router.stop().await;
    }
}
