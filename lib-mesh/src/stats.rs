//! Relay statistics
//!
//! In-memory counters for the admission pipeline. Snapshot reads only; no
//! persistence.

/// Counters over the lifetime of a router.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Messages admitted to the store (local and relayed).
    pub messages_admitted: u64,
    /// Messages originated by this node.
    pub messages_originated: u64,
    /// Messages re-sent to neighbors.
    pub messages_forwarded: u64,
    /// Frames handed to the link across all sends.
    pub frames_sent: u64,
    /// Arrivals dropped as duplicates.
    pub duplicates_dropped: u64,
    /// Arrivals dropped at the TTL bound.
    pub ttl_dropped: u64,
    /// Frames that failed to decode or violated an invariant.
    pub decode_errors: u64,
}
