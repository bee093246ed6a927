//! Pigeon Mesh Identity
//!
//! Persistent device identity for mesh nodes.

pub mod device;

pub use device::DeviceIdentity;
