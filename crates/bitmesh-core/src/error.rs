//! Error types for the bitmesh-core crate.

use core::fmt;

use bitmesh_crypto::CryptoError;

/// Reasons a byte buffer was rejected by [`crate::Packet::decode`].
///
/// Every variant corresponds to attacker-controllable input; none of them
/// is reachable through a panic path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    TooShort { min: usize, actual: usize },
    UnsupportedVersion(u8),
    UnknownMessageType(u8),
    PayloadOverrun { declared: usize, remaining: usize },
    PayloadTooLarge { declared: usize, max: usize },
    OriginalSizeTooLarge { declared: usize, max: usize },
    Decompression,
    DecompressedSizeMismatch { expected: usize, actual: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::TooShort { min, actual } => {
                write!(f, "packet too short: need at least {min} bytes, got {actual}")
            }
            DecodeError::UnsupportedVersion(v) => write!(f, "unsupported header version: {v}"),
            DecodeError::UnknownMessageType(v) => write!(f, "unknown message type: 0x{v:02x}"),
            DecodeError::PayloadOverrun {
                declared,
                remaining,
            } => write!(
                f,
                "declared payload length {declared} exceeds {remaining} remaining bytes"
            ),
            DecodeError::PayloadTooLarge { declared, max } => {
                write!(f, "declared payload length {declared} exceeds maximum {max}")
            }
            DecodeError::OriginalSizeTooLarge { declared, max } => {
                write!(f, "declared original size {declared} exceeds maximum {max}")
            }
            DecodeError::Decompression => write!(f, "payload decompression failed"),
            DecodeError::DecompressedSizeMismatch { expected, actual } => write!(
                f,
                "decompressed size mismatch: expected {expected}, got {actual}"
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    UnsupportedVersion(u8),
    PayloadTooLarge { size: usize, max: usize },
    LengthFieldOverflow { size: usize, version: u8 },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::UnsupportedVersion(v) => write!(f, "unsupported header version: {v}"),
            EncodeError::PayloadTooLarge { size, max } => {
                write!(f, "payload of {size} bytes exceeds maximum {max}")
            }
            EncodeError::LengthFieldOverflow { size, version } => write!(
                f,
                "payload section of {size} bytes does not fit the version {version} length field"
            ),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EncodeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    NoPrivateKey,
    InvalidKeyLength { expected: usize, actual: usize },
    SignatureVerificationFailed,
    CryptoError(CryptoError),
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::NoPrivateKey => write!(f, "no private key available"),
            IdentityError::InvalidKeyLength { expected, actual } => {
                write!(f, "invalid key length: expected {expected}, got {actual}")
            }
            IdentityError::SignatureVerificationFailed => {
                write!(f, "signature verification failed")
            }
            IdentityError::CryptoError(e) => write!(f, "crypto error: {e}"),
        }
    }
}

impl From<CryptoError> for IdentityError {
    fn from(e: CryptoError) -> Self {
        IdentityError::CryptoError(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for IdentityError {}
