//! The radio mesh as a router [`Transport`].
//!
//! Payloads are encrypted under the peer's session, framed as a
//! `NoiseEncrypted` packet addressed to the peer and handed to the radio,
//! point-to-point when the peer is a neighbour and flooded otherwise.

use bitmesh_core::constants::{MessageType, VERSION_2};
use bitmesh_core::packet::wire::Packet;
use bitmesh_core::types::PeerId;
use bitmesh_interfaces::error::InterfaceError;
use bitmesh_interfaces::traits::RadioLink;
use bitmesh_protocol::error::SessionError;
use bitmesh_protocol::session::SessionManager;
use bitmesh_transport::error::TransportError;
use bitmesh_transport::relay::MeshRelay;
use bitmesh_transport::router::{Transport, now_ms};

use crate::payload::Payload;

pub struct MeshTransport<'a> {
    sessions: &'a mut SessionManager,
    relay: &'a mut MeshRelay,
    radio: &'a dyn RadioLink,
    ttl: u8,
}

impl<'a> MeshTransport<'a> {
    pub fn new(
        sessions: &'a mut SessionManager,
        relay: &'a mut MeshRelay,
        radio: &'a dyn RadioLink,
        ttl: u8,
    ) -> Self {
        Self {
            sessions,
            relay,
            radio,
            ttl,
        }
    }

    /// Encrypt `payload` for `peer` and transmit it. Frames too long for a
    /// version 1 length field go out as version 2 packets.
    pub fn send_payload(&mut self, peer: &PeerId, payload: &Payload) -> Result<(), TransportError> {
        let plaintext = payload
            .encode()
            .map_err(|e| TransportError::Unsendable(e.to_string()))?;
        let now = now_ms();
        let frame = self
            .sessions
            .encrypt_at(&plaintext, peer, now)
            .map_err(|e| match e {
                SessionError::NoSession(_) | SessionError::NotEstablished(_) => {
                    TransportError::NoSession(*peer)
                }
                other => TransportError::Other(other.to_string()),
            })?;
        let oversized = frame.len() > u16::MAX as usize;
        let mut packet = Packet::new(
            MessageType::NoiseEncrypted,
            self.sessions.local_peer(),
            frame,
        )
        .with_recipient(*peer)
        .with_timestamp(now)
        .with_ttl(self.ttl);
        if oversized {
            packet = packet.with_version(VERSION_2);
        }
        transmit(self.relay, self.radio, &packet)
    }
}

/// Encode a locally originated packet and put it on the radio.
///
/// Packets for a direct neighbour go point-to-point; anything else is
/// broadcast and left to the mesh to relay.
pub fn transmit(
    relay: &mut MeshRelay,
    radio: &dyn RadioLink,
    packet: &Packet,
) -> Result<(), TransportError> {
    let bytes = relay.originate(packet)?;
    let target = packet.recipient.filter(|peer| radio.is_connected(peer));
    radio.send(&bytes, target.as_ref()).map_err(|e| match e {
        InterfaceError::NotConnected => {
            TransportError::NotConnected(packet.recipient.unwrap_or(PeerId::BROADCAST))
        }
        InterfaceError::Stopped => TransportError::LinkClosed,
        other => TransportError::Other(other.to_string()),
    })
}

impl Transport for MeshTransport<'_> {
    fn name(&self) -> &'static str {
        "mesh"
    }

    /// A neighbour with an established session.
    fn is_peer_connected(&self, peer: &PeerId) -> bool {
        self.sessions.is_established(peer) && self.radio.is_connected(peer)
    }

    /// Reachable over several hops with an established session.
    fn is_peer_reachable(&self, peer: &PeerId) -> bool {
        self.sessions.is_established(peer)
            && (self.radio.is_connected(peer) || self.radio.is_reachable(peer))
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
