//! Node orchestration for bitmesh.
//!
//! This crate ties the layers together: a [`Node`] owns the session
//! manager, the mesh relay, the delivery router and the relay pool, and
//! drives them from one event loop. Configuration, storage and logging
//! setup live here too.

pub mod config;
pub mod error;
pub mod logging;
pub mod mesh_transport;
pub mod node;
pub mod payload;
pub mod peers;
pub mod relay_transport;
pub mod storage;

pub use config::NodeConfig;
pub use error::NodeError;
pub use node::{Node, NodeCommand, NodeEvent, NodeHandle};
pub use payload::Payload;
pub use peers::PeerDirectory;
pub use storage::Storage;
