//! Pigeon Mesh Wire Protocol
//!
//! Message model and canonical JSON codec for the emergency mesh. Defines the
//! routed envelope, the typed per-message payloads, the permissive wire
//! bridge, and the protocol constants shared across the runtime.

pub mod constants;
pub mod envelope;
pub mod payload;
pub mod wire;

pub use constants::*;
pub use envelope::{MessageEnvelope, MessageType};
pub use payload::{Condition, MessagePayload, Priority, Urgency};
pub use wire::{decode, encode, to_value, WireError};
