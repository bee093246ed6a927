//! Pigeon Mesh Gateway
//!
//! Turns a node with Internet reachability into a gateway: accumulated mesh
//! messages are uploaded to the external collector with at-most-once
//! delivery per sync, and the gateway role is advertised into the mesh.

pub mod collector;
pub mod reachability;
pub mod uploader;

pub use collector::{Collector, HttpCollector, UploadBatch};
pub use reachability::ReachabilityMonitor;
pub use uploader::{GatewayUploader, SYNCED_IDS_KEY};
