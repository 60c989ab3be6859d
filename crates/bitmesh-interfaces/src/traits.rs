//! The seam between the node and a short-range radio driver.

use bitmesh_core::types::PeerId;

use crate::error::InterfaceError;

/// A broadcast radio that can reach nearby peers.
///
/// Methods are synchronous: `send` only hands the frame to the driver's
/// queue. Inbound traffic arrives separately as [`RadioEvent`]s on the
/// channel the driver was built with.
pub trait RadioLink: Send + Sync {
    /// Peers with a live link-layer connection.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Peers heard recently, directly or through the mesh.
    fn reachable_peers(&self) -> Vec<PeerId>;

    /// Transmit one encoded frame. `None` broadcasts to every neighbour.
    fn send(&self, frame: &[u8], peer: Option<&PeerId>) -> Result<(), InterfaceError>;

    fn is_connected(&self, peer: &PeerId) -> bool {
        self.connected_peers().contains(peer)
    }

    fn is_reachable(&self, peer: &PeerId) -> bool {
        self.reachable_peers().contains(peer)
    }
}

/// Something the radio driver observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    PeerConnected(PeerId),
    PeerDisconnected(PeerId),
    /// A raw frame. `from` is the neighbour that transmitted it, which for
    /// relayed traffic is not the packet's original sender.
    FrameReceived { data: Vec<u8>, from: Option<PeerId> },
}
