//! Ed25519 digital signature operations.
//!
//! Signing keys authenticate a node's announcements and the envelope layer's
//! events. Verification failures surface as [`CryptoError::InvalidSignature`].

use crate::CryptoError;
use ed25519_dalek::{Signer, Verifier};

/// An Ed25519 private (signing) key wrapping the 32-byte seed.
#[derive(Clone)]
pub struct Ed25519PrivateKey(ed25519_dalek::SigningKey);

impl Ed25519PrivateKey {
    /// Generate a new random Ed25519 private key using the OS random number generator.
    pub fn generate() -> Self {
        let mut csprng = rand::rngs::OsRng;
        Self(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Create a private key from the raw 32-byte seed.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(&bytes))
    }

    /// Derive the corresponding Ed25519 public key.
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.0.verifying_key())
    }

    /// Sign a message and return the 64-byte Ed25519 signature.
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        let sig = self.0.sign(message);
        Ed25519Signature(sig)
    }

    /// Extract the 32-byte seed bytes.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

/// An Ed25519 public (verifying) key, the 32-byte compressed Edwards point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ed25519PublicKey(ed25519_dalek::VerifyingKey);

impl Ed25519PublicKey {
    /// Create a public key from its 32-byte compressed Edwards point representation.
    ///
    /// Returns `CryptoError::InvalidLength` if the bytes do not decode to a
    /// point on the Ed25519 curve.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map(Self)
            .map_err(|_| CryptoError::InvalidLength {
                reason: "not a valid Ed25519 point",
            })
    }

    /// Verify an Ed25519 signature over a message.
    ///
    /// Returns `Ok(())` if the signature is valid, or `CryptoError::InvalidSignature`
    /// if verification fails.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CryptoError> {
        self.0
            .verify(message, &signature.0)
            .map_err(|_| CryptoError::InvalidSignature)
    }

    /// Extract the 32-byte compressed Edwards point representation.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

/// A 64-byte Ed25519 signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ed25519Signature(ed25519_dalek::Signature);

impl Ed25519Signature {
    /// Create a signature from raw 64-byte representation.
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(ed25519_dalek::Signature::from_bytes(&bytes))
    }

    /// Parse from a slice, checking the length.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; 64] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: 64,
            actual: bytes.len(),
        })?;
        Ok(Self::from_bytes(arr))
    }

    /// Extract the raw 64-byte signature.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }
}

impl core::fmt::Debug for Ed25519PrivateKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Ed25519PrivateKey(..)")
    }
}
