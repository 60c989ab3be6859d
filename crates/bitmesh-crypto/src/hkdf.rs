//! HKDF-SHA256 key derivation (RFC 5869).
//!
//! Built directly on [`crate::hmac::hmac_sha256`]. Besides the generic
//! extract/expand pair, this module provides [`hkdf2`], the two-output form
//! used by the handshake's chaining-key updates.
//!
//! # Subtleties
//!
//! - **Empty salt**: If salt is `None` or an empty slice, 32 zero bytes are used.
//! - **Output length**: at most 255 blocks (8160 bytes); longer requests are truncated
//!   to that bound.
//! - **Extract argument order**: `HMAC(salt, ikm)` -- salt is the HMAC key, ikm is the data.

use alloc::vec::Vec;

use crate::hmac::hmac_sha256;

/// The SHA-256 hash output length in bytes.
const HASH_LEN: usize = 32;

/// RFC 5869 limit on the number of expand blocks.
const MAX_BLOCKS: usize = 255;

/// HKDF-SHA256 extract step.
///
/// Computes `PRK = HMAC-SHA256(salt, ikm)`. If `salt` is `None` or empty, 32
/// zero bytes are used as the salt.
pub fn hkdf_extract(salt: Option<&[u8]>, ikm: &[u8]) -> [u8; 32] {
    let effective_salt: &[u8] = match salt {
        Some(s) if !s.is_empty() => s,
        _ => &[0u8; HASH_LEN],
    };
    hmac_sha256(effective_salt, ikm)
}

/// HKDF-SHA256 expand step.
///
/// Expands a pseudorandom key (`prk`) with optional `info` context to produce
/// `length` bytes of output keying material.
pub fn hkdf_expand(prk: &[u8; 32], info: &[u8], length: usize) -> Vec<u8> {
    let length = length.min(MAX_BLOCKS * HASH_LEN);
    let num_blocks = length.div_ceil(HASH_LEN);
    let mut derived = Vec::with_capacity(num_blocks * HASH_LEN);
    let mut block = Vec::new();

    for i in 0..num_blocks {
        // T(i+1) = HMAC(PRK, T(i) || info || counter_byte)
        let counter = (i + 1) as u8;
        let mut input = Vec::with_capacity(block.len() + info.len() + 1);
        input.extend_from_slice(&block);
        input.extend_from_slice(info);
        input.push(counter);

        let output = hmac_sha256(prk, &input);
        block = output.to_vec();
        derived.extend_from_slice(&output);
    }

    derived.truncate(length);
    derived
}

/// All-in-one HKDF-SHA256: extract then expand.
///
/// Derives `length` bytes from `derive_from` (the input keying material) using
/// an optional `salt` and optional `context` (info).
///
/// If `salt` is `None` or `Some(&[])`, 32 zero bytes are used. If `context` is
/// `None`, an empty byte slice is used.
pub fn hkdf(
    length: usize,
    derive_from: &[u8],
    salt: Option<&[u8]>,
    context: Option<&[u8]>,
) -> Vec<u8> {
    let prk = hkdf_extract(salt, derive_from);
    let info = context.unwrap_or(b"");
    hkdf_expand(&prk, info, length)
}


/// Derive two 32-byte outputs from a chaining key and input keying material.
///
/// Equivalent to `HKDF(ck, ikm)` with empty info, split into the first and
/// second 32-byte blocks. This is the `HKDF(ck, ikm, 2)` step of a Noise
/// symmetric state.
pub fn hkdf2(chaining_key: &[u8; 32], ikm: &[u8]) -> ([u8; 32], [u8; 32]) {
    let prk = hmac_sha256(chaining_key, ikm);
    let first = hmac_sha256(&prk, &[0x01]);
    let mut second_input = [0u8; HASH_LEN + 1];
    second_input[..HASH_LEN].copy_from_slice(&first);
    second_input[HASH_LEN] = 0x02;
    let second = hmac_sha256(&prk, &second_input);
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 5869 test case 1.
    const IKM: [u8; 22] = [0x0b; 22];
    const SALT: &str = "000102030405060708090a0b0c";
    const INFO: &str = "f0f1f2f3f4f5f6f7f8f9";
    const PRK: &str = "077709362c2e32df0ddc3f0dc47bba6390b6c73bb50f9c3122ec844ad7c2b3e5";
    const OKM: &str = "3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865";

    #[test]
    fn test_hkdf_rfc5869_case1() {
        let salt = hex::decode(SALT).unwrap();
        let info = hex::decode(INFO).unwrap();

        let prk = hkdf_extract(Some(&salt), &IKM);
        assert_eq!(hex::encode(prk), PRK, "HKDF extract PRK mismatch");

        let okm = hkdf_expand(&prk, &info, 42);
        assert_eq!(hex::encode(&okm), OKM, "HKDF expand OKM mismatch");

        let result = hkdf(42, &IKM, Some(&salt), Some(&info));
        assert_eq!(hex::encode(result), OKM, "HKDF all-in-one OKM mismatch");
    }

    #[test]
    fn test_hkdf_empty_salt() {
        let ikm = b"test input keying material";
        let info = b"test context";

        let result_none = hkdf(64, ikm, None, Some(info));
        let result_empty = hkdf(64, ikm, Some(&[]), Some(info));
        assert_eq!(
            result_none, result_empty,
            "HKDF with None salt and empty salt should produce identical output"
        );
    }

    #[test]
    fn test_hkdf2_matches_generic_expand() {
        let ck = [0x11u8; 32];
        let ikm = [0x22u8; 32];
        let (a, b) = hkdf2(&ck, &ikm);
        let generic = hkdf(64, &ikm, Some(&ck), None);
        assert_eq!(&generic[..32], &a);
        assert_eq!(&generic[32..], &b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hkdf_output_capped_at_rfc_limit() {
        let result = hkdf(10_000, b"cap test", None, None);
        assert_eq!(result.len(), 255 * 32);
    }

    #[test]
    fn test_hkdf_zero_length_output() {
        let result = hkdf(0, b"zero length", None, None);
        assert!(result.is_empty());
    }
}
