//! Session and envelope protocols for bitmesh.
//!
//! `session` runs the mesh handshake and transport encryption per peer;
//! `envelope` builds the rumor / seal / gift-wrap layers used on relays.

pub mod envelope;
pub mod error;
pub mod session;
