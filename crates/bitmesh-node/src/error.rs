//! Error types for the node orchestrator.

use bitmesh_core::error::{EncodeError, IdentityError};
use bitmesh_interfaces::error::RelayError;
use bitmesh_transport::error::RouterError;

/// Errors that can occur during node operation.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),
    #[error("router error: {0}")]
    Router(#[from] RouterError),
    #[error("identity error: {0}")]
    Identity(String),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
    #[error("invalid message: {0}")]
    Payload(#[from] PayloadError),
    #[error("node already running")]
    AlreadyRunning,
    #[error("node is shut down")]
    Stopped,
}

impl From<IdentityError> for NodeError {
    fn from(e: IdentityError) -> Self {
        NodeError::Identity(e.to_string())
    }
}

/// Reasons an application payload inside a mesh or relay frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("empty payload")]
    Empty,
    #[error("unexpected payload type 0x{0:02x}")]
    UnexpectedType(u8),
    #[error("payload truncated")]
    Truncated,
    #[error("message id longer than 255 bytes")]
    IdTooLong,
    #[error("message id is not valid UTF-8")]
    InvalidId,
    #[error("message content is {size} bytes, max {max}")]
    ContentTooLarge { size: usize, max: usize },
    #[error("missing relay content prefix")]
    MissingPrefix,
    #[error("invalid base64 in relay content")]
    InvalidBase64,
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid announce: {0}")]
    InvalidAnnounce(&'static str),
}
