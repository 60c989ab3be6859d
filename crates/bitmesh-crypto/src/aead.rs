//! ChaCha20-Poly1305 authenticated encryption.
//!
//! Session transport frames use an explicit 64-bit counter nonce
//! ([`counter_nonce`]); envelope payloads use a random 96-bit nonce
//! ([`seal_random`]) that travels alongside the ciphertext.

use alloc::vec::Vec;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::RngCore;

use crate::CryptoError;

/// Key length in bytes.
pub const KEY_LEN: usize = 32;
/// Nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// Poly1305 tag length appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Build a 96-bit nonce from a message counter: four zero bytes followed by
/// the little-endian counter.
#[must_use]
pub fn counter_nonce(counter: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[4..].copy_from_slice(&counter.to_le_bytes());
    nonce
}

/// Encrypt `plaintext` under `key` and `nonce`, authenticating `aad`.
///
/// Output is `ciphertext || tag`.
pub fn seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)
}

/// Decrypt and authenticate `ciphertext || tag`.
pub fn open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::InvalidLength {
            reason: "ciphertext shorter than tag",
        });
    }
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt with a fresh random nonce. Output is `nonce || ciphertext || tag`.
pub fn seal_random(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let ciphertext = seal(key, &nonce, &[], plaintext)?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`seal_random`].
pub fn open_random(key: &[u8; KEY_LEN], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::InvalidLength {
            reason: "sealed data shorter than nonce and tag",
        });
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    let nonce: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| CryptoError::InvalidLength {
        reason: "nonce",
    })?;
    open(key, &nonce, &[], ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];

    #[test]
    fn test_seal_open_roundtrip() {
        let nonce = counter_nonce(7);
        let ct = seal(&KEY, &nonce, b"header", b"hello mesh").unwrap();
        assert_eq!(ct.len(), b"hello mesh".len() + TAG_LEN);
        let pt = open(&KEY, &nonce, b"header", &ct).unwrap();
        assert_eq!(pt, b"hello mesh");
    }

    #[test]
    fn test_open_rejects_tampering() {
        let nonce = counter_nonce(1);
        let mut ct = seal(&KEY, &nonce, &[], b"payload").unwrap();
        ct[0] ^= 0x01;
        assert_eq!(open(&KEY, &nonce, &[], &ct), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_open_rejects_wrong_aad_and_nonce() {
        let ct = seal(&KEY, &counter_nonce(1), b"a", b"payload").unwrap();
        assert!(open(&KEY, &counter_nonce(1), b"b", &ct).is_err());
        assert!(open(&KEY, &counter_nonce(2), b"a", &ct).is_err());
    }

    #[test]
    fn test_open_short_input() {
        assert!(matches!(
            open(&KEY, &counter_nonce(0), &[], &[0u8; 15]),
            Err(CryptoError::InvalidLength { .. })
        ));
        assert!(matches!(
            open_random(&KEY, &[0u8; 27]),
            Err(CryptoError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_counter_nonce_layout() {
        let nonce = counter_nonce(0x0102_0304_0506_0708);
        assert_eq!(nonce[..4], [0, 0, 0, 0]);
        assert_eq!(nonce[4..], [8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_seal_random_uses_fresh_nonces() {
        let a = seal_random(&KEY, b"same").unwrap();
        let b = seal_random(&KEY, b"same").unwrap();
        assert_ne!(a, b);
        assert_eq!(open_random(&KEY, &a).unwrap(), b"same");
        assert_eq!(open_random(&KEY, &b).unwrap(), b"same");
    }
}
