//! Mesh relaying and message delivery for bitmesh.
//!
//! This crate holds the flood relay with its duplicate filter, and the
//! router that queues private messages per peer until they are confirmed.

pub mod dedup;
pub mod error;
pub mod relay;
pub mod router;
