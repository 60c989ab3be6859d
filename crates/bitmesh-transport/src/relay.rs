//! Mesh flood relay.
//!
//! Every inbound radio frame passes through [`MeshRelay::process_inbound`],
//! which decodes it, suppresses duplicates, and decides whether the frame is
//! for us, for everyone, or only passing through.

use bitmesh_core::error::{DecodeError, EncodeError};
use bitmesh_core::packet::wire::Packet;
use bitmesh_core::types::PeerId;

use crate::dedup::BloomFilter;

/// What to do with an accepted inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    /// Hand the packet to the local node.
    Deliver(Packet),
    /// Re-broadcast these bytes (already re-encoded with `ttl - 1`).
    Rebroadcast(Vec<u8>),
}

/// Why an inbound frame was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    Malformed(DecodeError),
    Duplicate,
    OwnPacket,
    Expired,
}

pub struct MeshRelay {
    local: PeerId,
    filter: BloomFilter,
}

impl MeshRelay {
    pub fn new(local: PeerId, filter: BloomFilter) -> Self {
        Self { local, filter }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    pub fn filter(&self) -> &BloomFilter {
        &self.filter
    }

    pub fn filter_mut(&mut self) -> &mut BloomFilter {
        &mut self.filter
    }

    /// Classify one inbound frame.
    ///
    /// Addressed to us: deliver. Broadcast: deliver and relay. Addressed to
    /// someone else: relay only. Relaying happens only while `ttl > 1`.
    pub fn process_inbound(&mut self, raw: &[u8]) -> Result<Vec<RelayAction>, DropReason> {
        let packet = Packet::decode(raw).map_err(DropReason::Malformed)?;

        if packet.sender == self.local {
            return Err(DropReason::OwnPacket);
        }
        if packet.ttl == 0 {
            return Err(DropReason::Expired);
        }

        let id = packet.packet_id();
        if !self.filter.check_and_insert(id.as_ref()) {
            tracing::trace!(packet_id = %id, "duplicate packet dropped");
            return Err(DropReason::Duplicate);
        }

        let for_us = packet.recipient == Some(self.local);
        let broadcast = packet.is_broadcast();

        let mut actions = Vec::with_capacity(2);
        if packet.ttl > 1 && !for_us {
            let mut forwarded = packet.clone();
            forwarded.ttl -= 1;
            match forwarded.encode() {
                Ok(bytes) => actions.push(RelayAction::Rebroadcast(bytes)),
                Err(e) => tracing::warn!(packet_id = %id, error = %e, "failed to re-encode relayed packet"),
            }
        }
        if for_us || broadcast {
            actions.push(RelayAction::Deliver(packet));
        }
        Ok(actions)
    }

    /// Encode a locally originated packet and remember it so echoes from
    /// neighbours are dropped.
    pub fn originate(&mut self, packet: &Packet) -> Result<Vec<u8>, EncodeError> {
        let bytes = packet.encode()?;
        self.filter.insert(packet.packet_id().as_ref());
        Ok(bytes)
    }

    /// Rotate the duplicate filter if it is over capacity, and re-size it
    /// for `peer_count`.
    pub fn maintain(&mut self, peer_count: usize) {
        if !self.filter.retune(peer_count) {
            self.filter.maybe_rotate();
        }
    }
}
