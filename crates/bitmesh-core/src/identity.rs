//! Node identity key management.
//!
//! An [`Identity`] pairs an X25519 key (session handshake and envelope key
//! agreement) with an Ed25519 key (packet and envelope signatures). The
//! combined public key is `x25519_public(32) || ed25519_public(32)`, and the
//! mesh [`PeerId`] is the short hash of the X25519 half.

use core::fmt;

use bitmesh_crypto::ed25519::{Ed25519PrivateKey, Ed25519PublicKey, Ed25519Signature};
use bitmesh_crypto::x25519::{X25519PrivateKey, X25519PublicKey};

use crate::constants::{PRIVATE_KEY_SIZE, PUBLIC_KEY_SIZE};
use crate::error::IdentityError;
use crate::types::{Fingerprint, PeerId};

/// A bitmesh identity with optional private keys.
///
/// A full identity can sign and perform key agreement. A public-only
/// identity (recovered from a peer's 64-byte public key) can only verify and
/// be the target of key agreement.
#[derive(Clone)]
#[must_use]
pub struct Identity {
    x25519_private: Option<X25519PrivateKey>,
    ed25519_private: Option<Ed25519PrivateKey>,
    x25519_public: X25519PublicKey,
    ed25519_public: Ed25519PublicKey,
    peer_id: PeerId,
}

impl Identity {
    /// Generate a new random identity with both key pairs.
    pub fn generate() -> Self {
        Self::from_keys(X25519PrivateKey::generate(), Ed25519PrivateKey::generate())
    }

    /// Layout: `x25519_private(32) || ed25519_private(32)`
    pub fn from_private_bytes(bytes: &[u8; PRIVATE_KEY_SIZE]) -> Self {
        let mut x25519_bytes = [0u8; 32];
        let mut ed25519_bytes = [0u8; 32];
        x25519_bytes.copy_from_slice(&bytes[..32]);
        ed25519_bytes.copy_from_slice(&bytes[32..]);
        Self::from_keys(
            X25519PrivateKey::from_bytes(x25519_bytes),
            Ed25519PrivateKey::from_bytes(ed25519_bytes),
        )
    }

    fn from_keys(x25519_private: X25519PrivateKey, ed25519_private: Ed25519PrivateKey) -> Self {
        let x25519_public = x25519_private.public_key();
        let ed25519_public = ed25519_private.public_key();
        Identity {
            peer_id: PeerId::from_static_key(&x25519_public.to_bytes()),
            x25519_private: Some(x25519_private),
            ed25519_private: Some(ed25519_private),
            x25519_public,
            ed25519_public,
        }
    }

    /// Create a public-only identity from the 64-byte combined public key.
    pub fn from_public_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(IdentityError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut x25519_bytes = [0u8; 32];
        let mut ed25519_bytes = [0u8; 32];
        x25519_bytes.copy_from_slice(&bytes[..32]);
        ed25519_bytes.copy_from_slice(&bytes[32..]);

        let x25519_public = X25519PublicKey::from_bytes(x25519_bytes);
        let ed25519_public = Ed25519PublicKey::from_bytes(ed25519_bytes)?;

        Ok(Identity {
            x25519_private: None,
            ed25519_private: None,
            peer_id: PeerId::from_static_key(&x25519_bytes),
            x25519_public,
            ed25519_public,
        })
    }

    #[must_use = "returns a bool without side effects"]
    pub fn has_private_key(&self) -> bool {
        self.x25519_private.is_some() && self.ed25519_private.is_some()
    }

    /// `x25519_private(32) || ed25519_private(32)`, or `None` for public-only
    /// identities.
    #[must_use = "returns the private key bytes without side effects"]
    pub fn private_key_bytes(&self) -> Option<[u8; PRIVATE_KEY_SIZE]> {
        let x25519_prv = self.x25519_private.as_ref()?;
        let ed25519_prv = self.ed25519_private.as_ref()?;
        let mut result = [0u8; PRIVATE_KEY_SIZE];
        result[..32].copy_from_slice(&x25519_prv.to_bytes());
        result[32..].copy_from_slice(&ed25519_prv.to_bytes());
        Some(result)
    }

    #[must_use = "returns the public key bytes without side effects"]
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        let mut result = [0u8; PUBLIC_KEY_SIZE];
        result[..32].copy_from_slice(&self.x25519_public.to_bytes());
        result[32..].copy_from_slice(&self.ed25519_public.to_bytes());
        result
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// SHA-256 of the static X25519 key, matching what peers see after a
    /// handshake.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_key(&self.x25519_public.to_bytes())
    }

    #[must_use = "returns the public key without side effects"]
    pub fn x25519_public(&self) -> &X25519PublicKey {
        &self.x25519_public
    }

    pub fn x25519_private(&self) -> Option<&X25519PrivateKey> {
        self.x25519_private.as_ref()
    }

    #[must_use = "returns the public key without side effects"]
    pub fn ed25519_public(&self) -> &Ed25519PublicKey {
        &self.ed25519_public
    }

    pub fn ed25519_private(&self) -> Option<&Ed25519PrivateKey> {
        self.ed25519_private.as_ref()
    }

    pub fn sign(&self, data: &[u8]) -> Result<Ed25519Signature, IdentityError> {
        let key = self
            .ed25519_private
            .as_ref()
            .ok_or(IdentityError::NoPrivateKey)?;
        Ok(key.sign(data))
    }

    pub fn verify(&self, data: &[u8], signature: &Ed25519Signature) -> Result<(), IdentityError> {
        self.ed25519_public
            .verify(data, signature)
            .map_err(|_| IdentityError::SignatureVerificationFailed)
    }

    /// X25519 agreement between our private key and `their_public`.
    ///
    /// Fails on a missing private key or a low-order peer key.
    pub fn agree(&self, their_public: &X25519PublicKey) -> Result<[u8; 32], IdentityError> {
        let key = self
            .x25519_private
            .as_ref()
            .ok_or(IdentityError::NoPrivateKey)?;
        Ok(key.diffie_hellman_checked(their_public)?)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("peer_id", &self.peer_id)
            .field("has_private_key", &self.has_private_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use bitmesh_crypto::CryptoError;

    fn fixed_identity(seed: u8) -> Identity {
        let mut bytes = [seed; PRIVATE_KEY_SIZE];
        bytes[32] = seed.wrapping_add(1);
        Identity::from_private_bytes(&bytes)
    }

    #[test]
    fn test_private_key_bytes_roundtrip() {
        let identity = Identity::generate();
        assert!(identity.has_private_key());

        let prv_bytes = identity.private_key_bytes().unwrap();
        let restored = Identity::from_private_bytes(&prv_bytes);

        assert_eq!(identity.peer_id(), restored.peer_id());
        assert_eq!(identity.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn test_public_only_identity() {
        let identity = fixed_identity(7);
        let public_only = Identity::from_public_bytes(&identity.public_key_bytes()).unwrap();

        assert!(!public_only.has_private_key());
        assert!(public_only.private_key_bytes().is_none());
        assert_eq!(public_only.peer_id(), identity.peer_id());
        assert_eq!(public_only.fingerprint(), identity.fingerprint());
        assert_eq!(public_only.sign(b"x").unwrap_err(), IdentityError::NoPrivateKey);
        assert_eq!(
            public_only.agree(identity.x25519_public()).unwrap_err(),
            IdentityError::NoPrivateKey
        );
    }

    #[test]
    fn test_from_public_bytes_wrong_length() {
        assert_eq!(
            Identity::from_public_bytes(&[0u8; 63]).unwrap_err(),
            IdentityError::InvalidKeyLength {
                expected: 64,
                actual: 63
            }
        );
    }

    #[test]
    fn test_peer_id_is_short_hash_of_x25519_key() {
        let identity = fixed_identity(3);
        assert_eq!(
            identity.peer_id(),
            PeerId::from_static_key(&identity.x25519_public().to_bytes())
        );
    }

    #[test]
    fn test_sign_verify() {
        let identity = fixed_identity(9);
        let sig = identity.sign(b"announce").unwrap();
        identity.verify(b"announce", &sig).unwrap();
        assert_eq!(
            identity.verify(b"announcE", &sig),
            Err(IdentityError::SignatureVerificationFailed)
        );
    }

    #[test]
    fn test_agreement_is_symmetric() {
        let a = fixed_identity(1);
        let b = fixed_identity(2);
        assert_eq!(
            a.agree(b.x25519_public()).unwrap(),
            b.agree(a.x25519_public()).unwrap()
        );
    }

    #[test]
    fn test_agreement_rejects_low_order_key() {
        let a = fixed_identity(1);
        assert_eq!(
            a.agree(&X25519PublicKey::from_bytes([0u8; 32])),
            Err(IdentityError::CryptoError(CryptoError::WeakSharedSecret))
        );
    }

    #[test]
    fn test_debug_hides_keys() {
        let identity = fixed_identity(5);
        let debug = format!("{identity:?}");
        assert!(debug.contains("peer_id"));
        assert!(!debug.contains(&format!("{:02x}", 5u8).repeat(32)));
    }
}
