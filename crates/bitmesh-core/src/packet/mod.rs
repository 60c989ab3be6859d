//! Mesh packet wire format.

pub mod compression;
pub mod flags;
pub mod wire;
