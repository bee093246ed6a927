//! Message envelope for store-and-forward relay
//!
//! Every frame on the mesh is one envelope: originator identity, wall-clock
//! timestamp, the hop path traversed so far, and a typed payload. The hop
//! path and count are the only fields a relay may touch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::payload::MessagePayload;

/// Message type discriminator, matching the wire `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    Sos,
    Triage,
    Shelter,
    MissingPerson,
    Broadcast,
    Direct,
    Ping,
    Pong,
    Discovery,
    DiscoveryReply,
    DeliveryReceipt,
    GatewayStatus,
}

/// A mesh message as routed and stored.
///
/// Immutable after decode except for the `hops`/`hop_count` pair, which the
/// router advances on relay. `extra` holds unknown payload fields carried on
/// the wire; they are re-emitted verbatim on forward so relaying a newer
/// peer's message never silently loses data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Originator-assigned unique id; a second appearance is the same message.
    pub id: String,
    /// Original author, never rewritten on relay.
    pub sender_id: String,
    pub sender_name: String,
    /// Originator's wall clock at creation.
    pub timestamp: DateTime<Utc>,
    /// Device ids the message has traversed, starting with `[sender_id]`.
    pub hops: Vec<String>,
    /// Always `hops.len() - 1`; enforced on decode.
    pub hop_count: u32,
    /// Present for `direct` and `deliveryReceipt`.
    pub target_device_id: Option<String>,
    pub payload: MessagePayload,
    /// Unknown wire payload fields, preserved opaquely.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

impl MessageEnvelope {
    /// Create a locally originated message: fresh id, empty path except for
    /// the sender itself, hop count zero.
    pub fn originate(
        sender_id: impl Into<String>,
        sender_name: impl Into<String>,
        payload: MessagePayload,
        target_device_id: Option<String>,
    ) -> Self {
        let sender_id = sender_id.into();
        Self {
            id: Uuid::new_v4().to_string(),
            sender_name: sender_name.into(),
            timestamp: Utc::now(),
            hops: vec![sender_id.clone()],
            hop_count: 0,
            target_device_id,
            payload,
            extra: Map::new(),
            sender_id,
        }
    }

    /// Type discriminator of the payload, as it appears on the wire.
    pub fn message_type(&self) -> MessageType {
        match self.payload {
            MessagePayload::Sos { .. } => MessageType::Sos,
            MessagePayload::Triage { .. } => MessageType::Triage,
            MessagePayload::Shelter { .. } => MessageType::Shelter,
            MessagePayload::MissingPerson { .. } => MessageType::MissingPerson,
            MessagePayload::Broadcast { .. } => MessageType::Broadcast,
            MessagePayload::Direct { .. } => MessageType::Direct,
            MessagePayload::Ping { .. } => MessageType::Ping,
            MessagePayload::Pong { .. } => MessageType::Pong,
            MessagePayload::Discovery { .. } => MessageType::Discovery,
            MessagePayload::DiscoveryReply { .. } => MessageType::DiscoveryReply,
            MessagePayload::DeliveryReceipt { .. } => MessageType::DeliveryReceipt,
            MessagePayload::GatewayStatus { .. } => MessageType::GatewayStatus,
        }
    }

    /// Append a relaying device to the hop path and bump the count.
    ///
    /// Called immediately before an outbound send so downstream peers observe
    /// the updated path.
    pub fn add_hop(&mut self, device_id: impl Into<String>) {
        self.hops.push(device_id.into());
        self.hop_count += 1;
    }

    /// Link-distance to the originator upon arrival of this copy.
    pub fn hop_distance(&self) -> u32 {
        self.hop_count + 1
    }

    /// Whether a direct-addressed message targets the given device.
    pub fn is_for(&self, device_id: &str) -> bool {
        self.target_device_id.as_deref() == Some(device_id)
    }
}
