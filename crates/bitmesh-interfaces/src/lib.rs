//! Network edges of the bitmesh node.
//!
//! [`relay`] keeps WebSocket connections to public relays; [`traits`]
//! defines the seam a radio driver plugs into, with an in-memory
//! implementation in [`testing`].

pub mod error;
pub mod relay;
pub mod shutdown;
pub mod testing;
pub mod traits;
