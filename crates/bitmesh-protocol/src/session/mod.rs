//! Encrypted point-to-point sessions over the mesh.
//!
//! A session is established by a three-message X25519 handshake and then
//! protects every private payload with ChaCha20-Poly1305 under per-direction
//! keys.

pub mod cipher;
pub mod handshake;
pub mod manager;

pub use cipher::{FRAME_OVERHEAD, ReplayWindow, TransportCipher};
pub use handshake::{
    HandshakeRole, HandshakeState, MESSAGE_1_LEN, MESSAGE_2_LEN, MESSAGE_3_LEN,
};
pub use manager::{HANDSHAKE_TIMEOUT, IDLE_TIMEOUT, SessionConfig, SessionManager, SessionState};
