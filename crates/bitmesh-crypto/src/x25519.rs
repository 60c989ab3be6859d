//! X25519 Diffie-Hellman key exchange.
//!
//! [`X25519PrivateKey`] and [`X25519PublicKey`] wrap the `x25519-dalek`
//! primitives. Static keys back a node's long-term identity; ephemeral keys
//! are generated per handshake and per envelope.

use x25519_dalek::{PublicKey, StaticSecret};

use crate::CryptoError;

/// An X25519 private key (Curve25519 scalar).
///
/// The underlying library clamps the scalar when it is used, so raw bytes are
/// stored as-is.
pub struct X25519PrivateKey(StaticSecret);

impl X25519PrivateKey {
    /// Generate a random X25519 private key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        Self(StaticSecret::random_from_rng(rand::rngs::OsRng))
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    #[must_use]
    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey(PublicKey::from(&self.0))
    }

    /// Raw X25519 with no validation of the result.
    #[must_use]
    pub fn diffie_hellman(&self, their_public: &X25519PublicKey) -> [u8; 32] {
        *self.0.diffie_hellman(&their_public.0).as_bytes()
    }

    /// X25519 that rejects an all-zero shared secret.
    ///
    /// A zero output means the peer supplied a low-order point; every
    /// handshake and envelope DH goes through this check.
    pub fn diffie_hellman_checked(
        &self,
        their_public: &X25519PublicKey,
    ) -> Result<[u8; 32], CryptoError> {
        let shared = self.0.diffie_hellman(&their_public.0);
        if !shared.was_contributory() {
            return Err(CryptoError::WeakSharedSecret);
        }
        Ok(*shared.as_bytes())
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl Clone for X25519PrivateKey {
    fn clone(&self) -> Self {
        Self::from_bytes(self.to_bytes())
    }
}

/// An X25519 public key (Curve25519 u-coordinate).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct X25519PublicKey(PublicKey);

impl X25519PublicKey {
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(PublicKey::from(bytes))
    }

    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        *self.0.as_bytes()
    }

    /// Parse from a slice, checking the length.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self::from_bytes(arr))
    }
}

impl From<[u8; 32]> for X25519PublicKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl AsRef<[u8]> for X25519PublicKey {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}
