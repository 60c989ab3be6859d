//! HMAC-SHA256 message authentication.
//!
//! Provides HMAC-SHA256 computation and constant-time verification using the
//! `hmac` crate with `sha2::Sha256`.

use crate::CryptoError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the HMAC-SHA256 of `data` using the given `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .unwrap_or_else(|_| unreachable!("HMAC-SHA256 accepts keys of any length"));
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Verify that the HMAC-SHA256 of `data` under `key` matches `expected`.
///
/// Returns `Ok(())` if the MAC is valid, or `Err(CryptoError::InvalidHmac)` if
/// it does not match. The comparison is performed in constant time by the
/// underlying `hmac` crate.
pub fn hmac_sha256_verify(key: &[u8], data: &[u8], expected: &[u8; 32]) -> Result<(), CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength {
        expected: 32,
        actual: key.len(),
    })?;
    mac.update(data);
    mac.verify_slice(expected).map_err(|_| CryptoError::InvalidHmac)
}
