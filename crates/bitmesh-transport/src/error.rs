//! Transport layer error types.

use bitmesh_core::error::EncodeError;
use bitmesh_core::types::PeerId;

/// Failure reported by a [`crate::router::Transport`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer {0} is not connected")]
    NotConnected(PeerId),

    #[error("no session established with {0}")]
    NoSession(PeerId),

    #[error("no public key known for {0}")]
    UnknownPeer(PeerId),

    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    #[error("link closed")]
    LinkClosed,

    #[error("message cannot be sent: {0}")]
    Unsendable(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// The message itself can never be sent; retrying cannot help.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TransportError::Encode(_) | TransportError::Unsendable(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("no transport can reach {0}")]
    Unreachable(PeerId),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
