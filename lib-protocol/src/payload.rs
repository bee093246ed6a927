//! Typed message payloads
//!
//! Internally every mesh message carries a discriminated payload keyed by the
//! envelope's `type`. The permissive all-optional wire schema lives in
//! [`crate::wire`]; this module is the in-memory model the router works with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Urgency of an SOS alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

/// Triage condition of a patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Stable,
    Serious,
    Critical,
    Unknown,
}

/// Priority of a broadcast notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Per-type message payload.
///
/// Required fields of each variant are non-optional here; everything the wire
/// schema marks optional stays `Option`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessagePayload {
    /// Emergency alert from a person in distress.
    Sos {
        description: String,
        urgency: Urgency,
        latitude: Option<f64>,
        longitude: Option<f64>,
        /// Free-text location hint ("3rd floor, east stairwell").
        location: Option<String>,
        /// Percentage, or -1 when the sensor is unavailable.
        battery_level: Option<i32>,
    },
    /// Field triage report for a patient.
    Triage {
        patient_name: String,
        condition: Condition,
        age: Option<u32>,
        injuries: Option<String>,
        conscious: Option<bool>,
        breathing: Option<bool>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    },
    /// Shelter capacity and intake status.
    Shelter {
        shelter_name: String,
        capacity: u32,
        current_occupancy: u32,
        accepting_more: bool,
        supplies: Option<Vec<String>>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    },
    /// Missing-person notice.
    MissingPerson {
        person_name: String,
        physical_description: String,
        last_seen_location: Option<String>,
        last_seen_time: Option<String>,
        contact_info: Option<String>,
        photo_base64: Option<String>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    },
    /// General broadcast notice.
    Broadcast {
        title: String,
        message: String,
        priority: Option<Priority>,
        latitude: Option<f64>,
        longitude: Option<f64>,
    },
    /// Direct message; the envelope's `target_device_id` addresses it.
    Direct { content: String },
    /// Liveness probe flooded through the mesh.
    Ping {
        original_sender_id: Option<String>,
        original_timestamp: Option<DateTime<Utc>>,
    },
    /// Reply to a ping, echoing the probe's origin.
    Pong {
        original_sender_id: String,
        original_timestamp: DateTime<Utc>,
    },
    /// Topology discovery request carrying the sender's neighbor list.
    Discovery {
        request_id: String,
        connected_peers: Option<Vec<String>>,
    },
    /// Reply to a discovery request.
    DiscoveryReply {
        request_id: String,
        connected_peers: Vec<String>,
    },
    /// Acknowledgement that a direct message reached its target.
    DeliveryReceipt {
        original_message_id: String,
        delivered_at: DateTime<Utc>,
    },
    /// Gateway advertisement or retraction.
    GatewayStatus {
        is_gateway: bool,
        gateway_device_id: String,
        gateway_device_name: String,
        synced_count: Option<u64>,
    },
}
