//! Core types, constants, and the mesh wire format for the bitmesh transport.
//!
//! This crate defines the packet codec (fixed header, optional recipient and
//! signature sections, transparent LZ4 compression), the node identity, and
//! the newtype wrappers shared by every other bitmesh crate.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod constants;
pub mod error;
pub mod identity;
pub mod packet;
pub mod types;

pub use constants::MessageType;
pub use error::{DecodeError, EncodeError, IdentityError};
pub use identity::Identity;
pub use packet::flags::PacketFlags;
pub use packet::wire::Packet;
pub use types::{Fingerprint, InvalidLength, PacketId, PeerId};
