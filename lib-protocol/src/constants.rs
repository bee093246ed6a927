//! Protocol constants for the Pigeon mesh
//!
//! Shared constants for relay TTL, store sizing, scheduler cadence and the
//! peer-to-peer wire format. Timers are concrete contracts; implementations
//! may coalesce them but not change the periods.

use std::time::Duration;

/// Maximum hop count a message may reach before it is dropped (TTL).
///
/// Bounds storm amplification of the flooded-dedup relay. A message received
/// with `hop_count >= MAX_HOPS` is dropped without admission; a forward that
/// would push `hop_count` past the bound is skipped.
pub const MAX_HOPS: u32 = 10;

/// Maximum number of messages retained in the store log.
///
/// Beyond the cap the oldest entries are evicted, but their ids stay in the
/// dedup set for the life of the process.
pub const MESSAGE_QUEUE_SIZE: usize = 500;

/// Cadence of the auto-connect sweep over discovered-but-unconnected peers.
pub const AUTO_CONNECT_PERIOD: Duration = Duration::from_secs(10);

/// Cadence of the gateway upload tick while the uploader is active.
pub const GATEWAY_SYNC_PERIOD: Duration = Duration::from_secs(30);

/// Cadence of the gateway-status broadcast while the uploader is active.
pub const GATEWAY_BROADCAST_PERIOD: Duration = Duration::from_secs(30);

/// Age past which a gateway advertisement is considered stale and swept.
pub const GATEWAY_STALENESS: Duration = Duration::from_secs(120);

/// Timeout for a single link connect attempt; AutoConnect retries after.
pub const CONNECT_INVITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Advisory cap on simultaneous link sessions.
pub const MAX_PEERS: usize = 8;

/// Maximum envelope size the node will originate or accept (32 KiB).
///
/// Dominated by optional base64 photos in missing-person notices.
pub const MAX_ENVELOPE_SIZE: usize = 32 * 1024;

/// Minimum timeout for collector uploads.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Link-layer service type token, matching across peers.
pub const SERVICE_TYPE: &str = "pigeon-mesh";
