use core::fmt;

/// Failure from one of the primitives in this crate.
///
/// Variants carry no secret material, so they are safe to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// A key or nonce slice had the wrong size.
    InvalidKeyLength { expected: usize, actual: usize },
    /// Ed25519 verification rejected the signature.
    InvalidSignature,
    /// The AEAD tag did not match, or the sealed box was malformed.
    DecryptionFailed,
    /// The AEAD refused the plaintext (only possible for absurd lengths).
    EncryptionFailed,
    /// Constant-time MAC comparison failed.
    InvalidHmac,
    /// X25519 produced the all-zero output of a low-order point.
    WeakSharedSecret,
    /// Input was too short or too long for the operation.
    InvalidLength { reason: &'static str },
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidKeyLength { expected, actual } => {
                write!(f, "key must be {expected} bytes, got {actual}")
            }
            CryptoError::InvalidSignature => f.write_str("signature does not verify"),
            CryptoError::DecryptionFailed => f.write_str("ciphertext failed authentication"),
            CryptoError::EncryptionFailed => f.write_str("plaintext could not be sealed"),
            CryptoError::InvalidHmac => f.write_str("MAC mismatch"),
            CryptoError::WeakSharedSecret => {
                f.write_str("key agreement with a low-order point")
            }
            CryptoError::InvalidLength { reason } => write!(f, "bad input length: {reason}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CryptoError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_length_message_names_both_sizes() {
        let err = CryptoError::InvalidKeyLength {
            expected: 32,
            actual: 16,
        };
        assert_eq!(err.to_string(), "key must be 32 bytes, got 16");
    }

    #[test]
    fn test_messages_are_distinct() {
        let all = [
            CryptoError::InvalidSignature,
            CryptoError::DecryptionFailed,
            CryptoError::EncryptionFailed,
            CryptoError::InvalidHmac,
            CryptoError::WeakSharedSecret,
            CryptoError::InvalidLength { reason: "empty" },
        ];
        let mut seen: Vec<String> = all.iter().map(ToString::to_string).collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), all.len());
    }
}
