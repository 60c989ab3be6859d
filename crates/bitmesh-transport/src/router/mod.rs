//! Transport-agnostic delivery of private messages.
//!
//! The [`Router`] owns a per-peer FIFO [`Outbox`]. Messages stay queued until
//! the application confirms delivery or they expire; every flush re-sends
//! whatever is not cooling down over the first transport that reports the
//! peer as connected.

pub mod dispatch;
pub mod outbox;

use std::time::Duration;

use bitmesh_core::types::PeerId;

use crate::error::TransportError;

pub use dispatch::{Router, SendOutcome};
pub use outbox::{Outbox, OutboxEntry, OutboxSnapshot};

/// Default minimum gap between two sends of the same queued entry.
pub const RESEND_COOLDOWN: Duration = Duration::from_secs(2);

/// Default age after which an unconfirmed entry is dropped.
pub const MESSAGE_EXPIRY: Duration = Duration::from_secs(300);

/// A link the router can hand messages to.
///
/// `is_peer_connected` means a message sent now will go out directly;
/// `is_peer_reachable` means the peer can be reached some other way
/// (multi-hop or store-and-forward). Only connected peers get queued
/// messages flushed to them.
pub trait Transport {
    /// Short label used in logs and [`RouterEvent::Sent`].
    fn name(&self) -> &'static str;

    fn is_peer_connected(&self, peer: &PeerId) -> bool;

    fn is_peer_reachable(&self, peer: &PeerId) -> bool;

    fn send_private(
        &mut self,
        peer: &PeerId,
        message_id: &str,
        content: &[u8],
    ) -> Result<(), TransportError>;

    fn send_read_receipt(&mut self, peer: &PeerId, message_id: &str)
    -> Result<(), TransportError>;

    fn send_favorite_notification(
        &mut self,
        peer: &PeerId,
        is_favorite: bool,
    ) -> Result<(), TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    Queued {
        peer: PeerId,
        message_id: String,
    },
    Sent {
        peer: PeerId,
        message_id: String,
        attempt: u32,
        via: &'static str,
    },
    Confirmed {
        peer: PeerId,
        message_id: String,
    },
    Expired {
        peer: PeerId,
        message_id: String,
    },
    /// Removed because no transport can ever carry it.
    Dropped {
        peer: PeerId,
        message_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    pub resend_cooldown: Duration,
    pub message_expiry: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            resend_cooldown: RESEND_COOLDOWN,
            message_expiry: MESSAGE_EXPIRY,
        }
    }
}

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
