//! Protocol error types.
//!
//! These errors cover the protocol layer: session handshakes, transport
//! encryption, and the relay envelope format.

use bitmesh_core::error::IdentityError;
use bitmesh_core::types::PeerId;
use bitmesh_crypto::CryptoError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    HandshakeFailed(&'static str),

    #[error("unexpected handshake message while awaiting {state}")]
    UnexpectedMessage { state: &'static str },

    #[error("no session with {0}")]
    NoSession(PeerId),

    #[error("session with {0} is not established")]
    NotEstablished(PeerId),

    #[error("frame too short: {len} bytes")]
    FrameTooShort { len: usize },

    #[error("replayed or stale frame counter {counter}")]
    Replay { counter: u64 },

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("send nonce exhausted; re-handshake required")]
    NonceExhausted,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid encoding: {0}")]
    InvalidEncoding(&'static str),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("event id does not match its contents")]
    IdMismatch,

    #[error("event signature verification failed")]
    InvalidSignature,

    #[error("unexpected event kind: expected {expected}, got {actual}")]
    UnexpectedKind { expected: u32, actual: u32 },

    #[error("event expired at {0}")]
    Expired(u64),
}
