//! Canonical JSON wire codec
//!
//! On the wire every frame is one JSON object with camelCase keys, ISO-8601
//! timestamps and a permissive all-optional `data` object. Decoding bridges
//! that schema into the typed [`MessagePayload`] union, rejecting envelopes
//! that are missing required fields or violate the hop-accounting invariant,
//! while keeping unknown `data` fields so they survive a relay verbatim.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::constants::MAX_ENVELOPE_SIZE;
use crate::envelope::{MessageEnvelope, MessageType};
use crate::payload::MessagePayload;

/// Errors surfaced by the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame of {0} bytes exceeds the {MAX_ENVELOPE_SIZE} byte envelope cap")]
    TooLarge(usize),
    #[error("hop count {hop_count} does not match path length {path_len}")]
    HopMismatch { hop_count: u32, path_len: usize },
    #[error("hop path does not start with sender {0}")]
    PathSenderMismatch(String),
    #[error("missing required field `{0}` for {1:?} message")]
    MissingField(&'static str, MessageType),
    #[error("field `{0}` of {1:?} message has an invalid value")]
    InvalidField(&'static str, MessageType),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    id: String,
    #[serde(rename = "type")]
    kind: MessageType,
    sender_id: String,
    sender_name: String,
    timestamp: DateTime<Utc>,
    hops: Vec<String>,
    hop_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target_device_id: Option<String>,
    #[serde(default)]
    data: Map<String, Value>,
}

/// Encode an envelope to its canonical JSON frame.
///
/// Unknown payload fields captured at decode time are re-emitted, without
/// overriding the typed fields.
pub fn encode(msg: &MessageEnvelope) -> Result<Vec<u8>, WireError> {
    Ok(serde_json::to_vec(&wire_view(msg))?)
}

/// Encode an envelope to its canonical JSON value, for embedding in a larger
/// document such as a collector upload batch.
pub fn to_value(msg: &MessageEnvelope) -> Result<Value, WireError> {
    Ok(serde_json::to_value(wire_view(msg))?)
}

fn wire_view(msg: &MessageEnvelope) -> WireEnvelope {
    let mut data = encode_payload(&msg.payload);
    for (key, value) in &msg.extra {
        data.entry(key.clone()).or_insert_with(|| value.clone());
    }
    WireEnvelope {
        id: msg.id.clone(),
        kind: msg.message_type(),
        sender_id: msg.sender_id.clone(),
        sender_name: msg.sender_name.clone(),
        timestamp: msg.timestamp,
        hops: msg.hops.clone(),
        hop_count: msg.hop_count,
        target_device_id: msg.target_device_id.clone(),
        data,
    }
}

/// Decode one frame into an envelope.
///
/// Rejects frames over the envelope cap, missing required envelope or payload
/// fields, and hop paths inconsistent with the hop count or the sender.
pub fn decode(bytes: &[u8]) -> Result<MessageEnvelope, WireError> {
    if bytes.len() > MAX_ENVELOPE_SIZE {
        return Err(WireError::TooLarge(bytes.len()));
    }
    let wire: WireEnvelope = serde_json::from_slice(bytes)?;

    if wire.hops.len() != wire.hop_count as usize + 1 {
        return Err(WireError::HopMismatch {
            hop_count: wire.hop_count,
            path_len: wire.hops.len(),
        });
    }
    if wire.hops.first().map(String::as_str) != Some(wire.sender_id.as_str()) {
        return Err(WireError::PathSenderMismatch(wire.sender_id));
    }
    if matches!(wire.kind, MessageType::Direct | MessageType::DeliveryReceipt)
        && wire.target_device_id.is_none()
    {
        return Err(WireError::MissingField("targetDeviceId", wire.kind));
    }

    let mut data = wire.data;
    let payload = decode_payload(wire.kind, &mut data)?;

    Ok(MessageEnvelope {
        id: wire.id,
        sender_id: wire.sender_id,
        sender_name: wire.sender_name,
        timestamp: wire.timestamp,
        hops: wire.hops,
        hop_count: wire.hop_count,
        target_device_id: wire.target_device_id,
        payload,
        extra: data,
    })
}

fn encode_payload(payload: &MessagePayload) -> Map<String, Value> {
    let mut data = Map::new();
    match payload {
        MessagePayload::Sos {
            description,
            urgency,
            latitude,
            longitude,
            location,
            battery_level,
        } => {
            data.insert("description".into(), json!(description));
            data.insert("urgency".into(), json!(urgency));
            put_opt(&mut data, "latitude", latitude);
            put_opt(&mut data, "longitude", longitude);
            put_opt(&mut data, "location", location);
            put_opt(&mut data, "batteryLevel", battery_level);
        }
        MessagePayload::Triage {
            patient_name,
            condition,
            age,
            injuries,
            conscious,
            breathing,
            latitude,
            longitude,
        } => {
            data.insert("patientName".into(), json!(patient_name));
            data.insert("condition".into(), json!(condition));
            put_opt(&mut data, "age", age);
            put_opt(&mut data, "injuries", injuries);
            put_opt(&mut data, "conscious", conscious);
            put_opt(&mut data, "breathing", breathing);
            put_opt(&mut data, "latitude", latitude);
            put_opt(&mut data, "longitude", longitude);
        }
        MessagePayload::Shelter {
            shelter_name,
            capacity,
            current_occupancy,
            accepting_more,
            supplies,
            latitude,
            longitude,
        } => {
            data.insert("shelterName".into(), json!(shelter_name));
            data.insert("capacity".into(), json!(capacity));
            data.insert("currentOccupancy".into(), json!(current_occupancy));
            data.insert("acceptingMore".into(), json!(accepting_more));
            put_opt(&mut data, "supplies", supplies);
            put_opt(&mut data, "latitude", latitude);
            put_opt(&mut data, "longitude", longitude);
        }
        MessagePayload::MissingPerson {
            person_name,
            physical_description,
            last_seen_location,
            last_seen_time,
            contact_info,
            photo_base64,
            latitude,
            longitude,
        } => {
            data.insert("personName".into(), json!(person_name));
            data.insert("physicalDescription".into(), json!(physical_description));
            put_opt(&mut data, "lastSeenLocation", last_seen_location);
            put_opt(&mut data, "lastSeenTime", last_seen_time);
            put_opt(&mut data, "contactInfo", contact_info);
            put_opt(&mut data, "photoBase64", photo_base64);
            put_opt(&mut data, "latitude", latitude);
            put_opt(&mut data, "longitude", longitude);
        }
        MessagePayload::Broadcast {
            title,
            message,
            priority,
            latitude,
            longitude,
        } => {
            data.insert("title".into(), json!(title));
            data.insert("message".into(), json!(message));
            put_opt(&mut data, "priority", priority);
            put_opt(&mut data, "latitude", latitude);
            put_opt(&mut data, "longitude", longitude);
        }
        MessagePayload::Direct { content } => {
            data.insert("content".into(), json!(content));
        }
        MessagePayload::Ping {
            original_sender_id,
            original_timestamp,
        } => {
            put_opt(&mut data, "originalSenderId", original_sender_id);
            put_opt(&mut data, "originalTimestamp", original_timestamp);
        }
        MessagePayload::Pong {
            original_sender_id,
            original_timestamp,
        } => {
            data.insert("originalSenderId".into(), json!(original_sender_id));
            data.insert("originalTimestamp".into(), json!(original_timestamp));
        }
        MessagePayload::Discovery {
            request_id,
            connected_peers,
        } => {
            data.insert("requestId".into(), json!(request_id));
            put_opt(&mut data, "connectedPeers", connected_peers);
        }
        MessagePayload::DiscoveryReply {
            request_id,
            connected_peers,
        } => {
            data.insert("requestId".into(), json!(request_id));
            data.insert("connectedPeers".into(), json!(connected_peers));
        }
        MessagePayload::DeliveryReceipt {
            original_message_id,
            delivered_at,
        } => {
            data.insert("originalMessageId".into(), json!(original_message_id));
            data.insert("deliveredAt".into(), json!(delivered_at));
        }
        MessagePayload::GatewayStatus {
            is_gateway,
            gateway_device_id,
            gateway_device_name,
            synced_count,
        } => {
            data.insert("isGateway".into(), json!(is_gateway));
            data.insert("gatewayDeviceId".into(), json!(gateway_device_id));
            data.insert("gatewayDeviceName".into(), json!(gateway_device_name));
            put_opt(&mut data, "syncedCount", synced_count);
        }
    }
    data
}

fn decode_payload(
    kind: MessageType,
    data: &mut Map<String, Value>,
) -> Result<MessagePayload, WireError> {
    let payload = match kind {
        MessageType::Sos => MessagePayload::Sos {
            description: take(data, "description", kind)?,
            urgency: take(data, "urgency", kind)?,
            latitude: take_opt(data, "latitude", kind)?,
            longitude: take_opt(data, "longitude", kind)?,
            location: take_opt(data, "location", kind)?,
            battery_level: take_opt(data, "batteryLevel", kind)?,
        },
        MessageType::Triage => MessagePayload::Triage {
            patient_name: take(data, "patientName", kind)?,
            condition: take(data, "condition", kind)?,
            age: take_opt(data, "age", kind)?,
            injuries: take_opt(data, "injuries", kind)?,
            conscious: take_opt(data, "conscious", kind)?,
            breathing: take_opt(data, "breathing", kind)?,
            latitude: take_opt(data, "latitude", kind)?,
            longitude: take_opt(data, "longitude", kind)?,
        },
        MessageType::Shelter => MessagePayload::Shelter {
            shelter_name: take(data, "shelterName", kind)?,
            capacity: take(data, "capacity", kind)?,
            current_occupancy: take(data, "currentOccupancy", kind)?,
            accepting_more: take(data, "acceptingMore", kind)?,
            supplies: take_opt(data, "supplies", kind)?,
            latitude: take_opt(data, "latitude", kind)?,
            longitude: take_opt(data, "longitude", kind)?,
        },
        MessageType::MissingPerson => MessagePayload::MissingPerson {
            person_name: take(data, "personName", kind)?,
            physical_description: take(data, "physicalDescription", kind)?,
            last_seen_location: take_opt(data, "lastSeenLocation", kind)?,
            last_seen_time: take_opt(data, "lastSeenTime", kind)?,
            contact_info: take_opt(data, "contactInfo", kind)?,
            photo_base64: take_opt(data, "photoBase64", kind)?,
            latitude: take_opt(data, "latitude", kind)?,
            longitude: take_opt(data, "longitude", kind)?,
        },
        MessageType::Broadcast => MessagePayload::Broadcast {
            title: take(data, "title", kind)?,
            message: take(data, "message", kind)?,
            priority: take_opt(data, "priority", kind)?,
            latitude: take_opt(data, "latitude", kind)?,
            longitude: take_opt(data, "longitude", kind)?,
        },
        MessageType::Direct => MessagePayload::Direct {
            content: take(data, "content", kind)?,
        },
        MessageType::Ping => MessagePayload::Ping {
            original_sender_id: take_opt(data, "originalSenderId", kind)?,
            original_timestamp: take_opt(data, "originalTimestamp", kind)?,
        },
        MessageType::Pong => MessagePayload::Pong {
            original_sender_id: take(data, "originalSenderId", kind)?,
            original_timestamp: take(data, "originalTimestamp", kind)?,
        },
        MessageType::Discovery => MessagePayload::Discovery {
            request_id: take(data, "requestId", kind)?,
            connected_peers: take_opt(data, "connectedPeers", kind)?,
        },
        MessageType::DiscoveryReply => MessagePayload::DiscoveryReply {
            request_id: take(data, "requestId", kind)?,
            connected_peers: take(data, "connectedPeers", kind)?,
        },
        MessageType::DeliveryReceipt => MessagePayload::DeliveryReceipt {
            original_message_id: take(data, "originalMessageId", kind)?,
            delivered_at: take(data, "deliveredAt", kind)?,
        },
        MessageType::GatewayStatus => MessagePayload::GatewayStatus {
            is_gateway: take(data, "isGateway", kind)?,
            gateway_device_id: take(data, "gatewayDeviceId", kind)?,
            gateway_device_name: take(data, "gatewayDeviceName", kind)?,
            synced_count: take_opt(data, "syncedCount", kind)?,
        },
    };
    Ok(payload)
}

fn put_opt<T: Serialize>(data: &mut Map<String, Value>, key: &str, value: &Option<T>) {
    if let Some(v) = value {
        data.insert(key.to_string(), json!(v));
    }
}

fn take<T: DeserializeOwned>(
    data: &mut Map<String, Value>,
    key: &'static str,
    kind: MessageType,
) -> Result<T, WireError> {
    match data.remove(key) {
        None | Some(Value::Null) => Err(WireError::MissingField(key, kind)),
        Some(value) => {
            serde_json::from_value(value).map_err(|_| WireError::InvalidField(key, kind))
        }
    }
}

fn take_opt<T: DeserializeOwned>(
    data: &mut Map<String, Value>,
    key: &'static str,
    kind: MessageType,
) -> Result<Option<T>, WireError> {
    match data.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|_| WireError::InvalidField(key, kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::Urgency;

    fn sos_frame() -> Vec<u8> {
        br#"{
            "id": "11111111-1111-1111-1111-111111111111",
            "type": "sos",
            "senderId": "node-a",
            "senderName": "Alice",
            "timestamp": "2025-11-03T08:15:00Z",
            "hops": ["node-a"],
            "hopCount": 0,
            "data": {
                "description": "Trapped under rubble",
                "urgency": "critical",
                "batteryLevel": 41
            }
        }"#
        .to_vec()
    }

    #[test]
    fn decodes_sos_frame() {
        let msg = decode(&sos_frame()).expect("decode");
        assert_eq!(msg.sender_id, "node-a");
        assert_eq!(msg.hop_count, 0);
        match &msg.payload {
            MessagePayload::Sos {
                description,
                urgency,
                battery_level,
                latitude,
                ..
            } => {
                assert_eq!(description, "Trapped under rubble");
                assert_eq!(*urgency, Urgency::Critical);
                assert_eq!(*battery_level, Some(41));
                assert!(latitude.is_none());
            }
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_envelope_field() {
        let frame = br#"{"id":"x","type":"ping","senderName":"A","timestamp":"2025-11-03T08:15:00Z","hops":["a"],"hopCount":0}"#;
        assert!(matches!(decode(frame), Err(WireError::Json(_))));
    }

    #[test]
    fn rejects_missing_required_payload_field() {
        let frame = br#"{
            "id": "x", "type": "sos", "senderId": "a", "senderName": "A",
            "timestamp": "2025-11-03T08:15:00Z", "hops": ["a"], "hopCount": 0,
            "data": {"urgency": "low"}
        }"#;
        assert!(matches!(
            decode(frame),
            Err(WireError::MissingField("description", MessageType::Sos))
        ));
    }

    #[test]
    fn rejects_hop_count_mismatch() {
        let frame = br#"{
            "id": "x", "type": "ping", "senderId": "a", "senderName": "A",
            "timestamp": "2025-11-03T08:15:00Z", "hops": ["a", "b"], "hopCount": 0,
            "data": {}
        }"#;
        assert!(matches!(decode(frame), Err(WireError::HopMismatch { .. })));
    }

    #[test]
    fn rejects_path_not_starting_with_sender() {
        let frame = br#"{
            "id": "x", "type": "ping", "senderId": "a", "senderName": "A",
            "timestamp": "2025-11-03T08:15:00Z", "hops": ["b"], "hopCount": 0,
            "data": {}
        }"#;
        assert!(matches!(
            decode(frame),
            Err(WireError::PathSenderMismatch(_))
        ));
    }

    #[test]
    fn rejects_direct_without_target() {
        let frame = br#"{
            "id": "x", "type": "direct", "senderId": "a", "senderName": "A",
            "timestamp": "2025-11-03T08:15:00Z", "hops": ["a"], "hopCount": 0,
            "data": {"content": "hi"}
        }"#;
        assert!(matches!(
            decode(frame),
            Err(WireError::MissingField("targetDeviceId", MessageType::Direct))
        ));
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut frame = sos_frame();
        frame.extend(std::iter::repeat(b' ').take(MAX_ENVELOPE_SIZE));
        assert!(matches!(decode(&frame), Err(WireError::TooLarge(_))));
    }

    #[test]
    fn unknown_payload_fields_survive_a_relay() {
        let frame = br#"{
            "id": "x", "type": "broadcast", "senderId": "a", "senderName": "A",
            "timestamp": "2025-11-03T08:15:00Z", "hops": ["a"], "hopCount": 0,
            "futureEnvelopeField": true,
            "data": {"title": "t", "message": "m", "futureField": {"nested": 7}}
        }"#;
        let mut msg = decode(frame).expect("decode");
        assert_eq!(msg.extra.get("futureField"), Some(&json!({"nested": 7})));

        msg.add_hop("b");
        let bytes = encode(&msg).expect("encode");
        let reparsed: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(reparsed["data"]["futureField"]["nested"], json!(7));
        assert_eq!(reparsed["hopCount"], json!(1));
    }

    #[test]
    fn encode_then_decode_preserves_gateway_status() {
        let msg = MessageEnvelope::originate(
            "gw-1",
            "Gateway",
            MessagePayload::GatewayStatus {
                is_gateway: true,
                gateway_device_id: "gw-1".into(),
                gateway_device_name: "Gateway".into(),
                synced_count: Some(12),
            },
            None,
        );
        let decoded = decode(&encode(&msg).expect("encode")).expect("decode");
        assert_eq!(decoded.payload, msg.payload);
        assert_eq!(decoded.hops, vec!["gw-1".to_string()]);
    }

    #[test]
    fn timestamps_are_iso_8601() {
        let msg = MessageEnvelope::originate(
            "n",
            "N",
            MessagePayload::Ping {
                original_sender_id: Some("n".into()),
                original_timestamp: Some(Utc::now()),
            },
            None,
        );
        let raw: Value = serde_json::from_slice(&encode(&msg).expect("encode")).expect("json");
        let ts = raw["timestamp"].as_str().expect("timestamp string");
        assert!(ts.contains('T'), "not ISO-8601: {ts}");
        assert!(raw["data"]["originalTimestamp"].is_string());
    }

    #[test]
    fn pong_requires_probe_origin() {
        let frame = br#"{
            "id": "x", "type": "pong", "senderId": "a", "senderName": "A",
            "timestamp": "2025-11-03T08:15:00Z", "hops": ["a"], "hopCount": 0,
            "data": {"originalTimestamp": "2025-11-03T08:14:58Z"}
        }"#;
        assert!(matches!(
            decode(frame),
            Err(WireError::MissingField("originalSenderId", MessageType::Pong))
        ));
    }
}
