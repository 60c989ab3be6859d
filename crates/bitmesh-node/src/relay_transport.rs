//! The public relay network as a router [`Transport`].
//!
//! Each payload is gift-wrapped to the peer's public key and published to
//! every relay in the pool. Relays that are down keep the event queued
//! until they reconnect, so a peer with a known key counts as reachable as
//! long as any relay is configured.

use bitmesh_core::identity::Identity;
use bitmesh_core::types::PeerId;
use bitmesh_interfaces::relay::RelayPool;
use bitmesh_protocol::envelope::create_private_message;
use bitmesh_transport::error::TransportError;
use bitmesh_transport::router::Transport;

use crate::payload::Payload;
use crate::peers::PeerDirectory;

pub struct RelayTransport<'a> {
    identity: &'a Identity,
    pool: &'a RelayPool,
    peers: &'a PeerDirectory,
}

impl<'a> RelayTransport<'a> {
    pub fn new(identity: &'a Identity, pool: &'a RelayPool, peers: &'a PeerDirectory) -> Self {
        Self {
            identity,
            pool,
            peers,
        }
    }

    /// Wrap `payload` for `peer` and queue it on every relay.
    pub fn send_payload(&self, peer: &PeerId, payload: &Payload) -> Result<(), TransportError> {
        let recipient = self
            .peers
            .public_key_hex(peer)
            .ok_or(TransportError::UnknownPeer(*peer))?;
        let content = payload
            .to_relay_content()
            .map_err(|e| TransportError::Unsendable(e.to_string()))?;
        let wrap = create_private_message(&content, recipient, self.identity)
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let queued = self
            .pool
            .send_event(&wrap, None)
            .map_err(|e| TransportError::Other(e.to_string()))?;
        if queued == 0 {
            return Err(TransportError::LinkClosed);
        }
        tracing::trace!(peer = %peer, wrap_id = %wrap.id, relays = queued, "published gift wrap");
        Ok(())
    }
}

impl Transport for RelayTransport<'_> {
    fn name(&self) -> &'static str {
        "relay"
    }

    fn is_peer_connected(&self, peer: &PeerId) -> bool {
        self.peers.contains(peer) && self.pool.is_connected()
    }

    fn is_peer_reachable(&self, peer: &PeerId) -> bool {
        self.peers.contains(peer) && self.pool.relay_count() > 0
    }

    fn send_private(
        &mut self,
        peer: &PeerId,
        message_id: &str,
        content: &[u8],
    ) -> Result<(), TransportError> {
        self.send_payload(
            peer,
            &Payload::Message {
                message_id: message_id.to_string(),
                content: content.to_vec(),
            },
        )
    }

    fn send_read_receipt(&mut self, peer: &PeerId, message_id: &str) -> Result<(), TransportError> {
        self.send_payload(
            peer,
            &Payload::ReadReceipt {
                message_id: message_id.to_string(),
            },
        )
    }

    fn send_favorite_notification(
        &mut self,
        peer: &PeerId,
        is_favorite: bool,
    ) -> Result<(), TransportError> {
        self.send_payload(peer, &Payload::Favorite { is_favorite })
    }
}
