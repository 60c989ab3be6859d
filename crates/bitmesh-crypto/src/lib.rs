//! Cryptographic primitives for the bitmesh transport.
//!
//! This crate provides the foundational cryptographic operations shared by the
//! session handshake and the relay envelope layers: hashing, HMAC, key
//! derivation, X25519 key agreement, Ed25519 signatures, and
//! ChaCha20-Poly1305 authenticated encryption.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod aead;
pub mod ed25519;
pub mod error;
pub mod hkdf;
pub mod hmac;
pub mod sha;
pub mod x25519;

pub use error::CryptoError;
