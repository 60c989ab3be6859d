//! Connections to public relays, used when a peer is off the mesh.
//!
//! Each relay URL gets one background task ([`connection`]) that connects,
//! re-issues subscriptions, flushes queued events and reconnects after a
//! fixed delay. [`RelayPool`] is the synchronous front the node talks to.

pub mod connection;
pub mod message;
pub mod pool;

use std::time::Duration;

use bitmesh_protocol::envelope::Event;

pub use message::{ClientMessage, Filter, RelayMessage};
pub use pool::RelayPool;

/// Pause between a disconnect and the next connection attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Bound on TCP connect plus the WebSocket upgrade.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayStatus {
    Connecting,
    Connected,
    Disconnected,
    /// The host does not exist or the URL is unusable; never retried.
    Dead,
}

/// An event delivered on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayEvent {
    pub relay_url: String,
    pub subscription_id: String,
    pub event: Event,
}
