//! Mesh topology estimation
//!
//! Tracks the hop-distance to every device heard from via probe replies and
//! discovery, and the set of advertised gateways. Gateway entries go stale
//! 120 seconds after their last advertisement and are swept on every
//! mutation. The local node is excluded from both tables so it never shows
//! up as a remote.

use std::collections::HashMap;

use lib_protocol::GATEWAY_STALENESS;
use tokio::time::Instant;
use tracing::debug;

/// A gateway the mesh has advertised to us.
#[derive(Debug, Clone)]
pub struct GatewayEntry {
    pub device_name: String,
    /// Best observed hop-distance during this entry's non-stale lifetime.
    pub hops: u32,
    pub last_seen: Instant,
    pub synced_count: u64,
}

impl GatewayEntry {
    pub fn is_stale(&self) -> bool {
        self.last_seen.elapsed() > GATEWAY_STALENESS
    }
}

/// Hop-distance tables for known devices and gateways.
#[derive(Debug)]
pub struct TopologyTracker {
    self_id: String,
    known_devices: HashMap<String, u32>,
    known_gateways: HashMap<String, GatewayEntry>,
}

impl TopologyTracker {
    pub fn new(self_id: impl Into<String>) -> Self {
        Self {
            self_id: self_id.into(),
            known_devices: HashMap::new(),
            known_gateways: HashMap::new(),
        }
    }

    /// Record a device sighting at the given hop-distance, keeping the best.
    pub fn observe(&mut self, device_id: &str, hops: u32) {
        if device_id == self.self_id {
            return;
        }
        self.known_devices
            .entry(device_id.to_string())
            .and_modify(|current| *current = (*current).min(hops))
            .or_insert(hops);
    }

    /// Apply a gateway advertisement or retraction.
    pub fn observe_gateway(
        &mut self,
        device_id: &str,
        device_name: &str,
        hops: u32,
        is_gateway: bool,
        synced_count: u64,
    ) {
        if device_id != self.self_id {
            if is_gateway {
                self.known_gateways
                    .entry(device_id.to_string())
                    .and_modify(|entry| {
                        entry.hops = entry.hops.min(hops);
                        entry.last_seen = Instant::now();
                        entry.synced_count = synced_count;
                        entry.device_name = device_name.to_string();
                    })
                    .or_insert_with(|| GatewayEntry {
                        device_name: device_name.to_string(),
                        hops,
                        last_seen: Instant::now(),
                        synced_count,
                    });
            } else if self.known_gateways.remove(device_id).is_some() {
                debug!(gateway = device_id, "gateway retracted");
            }
        }
        self.sweep();
    }

    /// Drop gateway entries past the staleness window.
    pub fn sweep(&mut self) {
        self.known_gateways.retain(|id, entry| {
            let keep = !entry.is_stale();
            if !keep {
                debug!(gateway = %id, "gateway advertisement went stale");
            }
            keep
        });
    }

    /// Closest non-stale gateway, if any.
    pub fn nearest_gateway(&self) -> Option<(&str, &GatewayEntry)> {
        self.known_gateways
            .iter()
            .filter(|(_, entry)| !entry.is_stale())
            .min_by_key(|(_, entry)| entry.hops)
            .map(|(id, entry)| (id.as_str(), entry))
    }

    pub fn has_reachable_gateway(&self) -> bool {
        self.known_gateways.values().any(|entry| !entry.is_stale())
    }

    pub fn known_devices(&self) -> &HashMap<String, u32> {
        &self.known_devices
    }

    /// Non-stale gateway entries.
    pub fn known_gateways(&self) -> impl Iterator<Item = (&str, &GatewayEntry)> {
        self.known_gateways
            .iter()
            .filter(|(_, entry)| !entry.is_stale())
            .map(|(id, entry)| (id.as_str(), entry))
    }
}
