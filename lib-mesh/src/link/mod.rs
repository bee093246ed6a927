//! Link adapter seam
//!
//! Abstracts the proximity transport (Bluetooth, Wi-Fi Direct, or an
//! in-process hub in tests). The adapter advertises presence, browses for
//! peers, auto-accepts every invitation (open mesh) and moves opaque frames.
//! It imposes no application semantics: framing is the link's reliable
//! per-message delivery, and per-peer frame order must be preserved on the
//! event channel handed over at construction.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

/// A peer as seen by the link layer.
///
/// The link's discovery info carries the remote device id, which doubles as
/// the routing identifier; the display name is cosmetic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    pub device_id: String,
    pub display_name: String,
}

impl Peer {
    pub fn new(device_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Events surfaced upward from the link, in per-peer delivery order.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    PeerDiscovered(Peer),
    PeerLost(Peer),
    Connected(Peer),
    Disconnected(Peer),
    Frame { from: Peer, bytes: Vec<u8> },
}

/// The proximity transport as the router consumes it.
///
/// `send` is reliable and ordered per peer within a session, and atomic per
/// frame: either the whole frame reaches the peer or the send fails. Events
/// flow through the `mpsc` channel an implementation is constructed with.
#[async_trait]
pub trait Link: Send + Sync {
    /// Begin advertising presence and browsing for peers.
    async fn start(&self) -> Result<()>;

    /// Release link resources and close all sessions.
    async fn stop(&self) -> Result<()>;

    /// Attempt a session with a discovered peer.
    async fn connect(&self, peer: &Peer) -> Result<()>;

    /// Deliver one frame to each of the given connected peers.
    async fn send(&self, frame: &[u8], to: &[Peer]) -> Result<()>;
}
