//! Digests: SHA-256 for handshake transcripts and peer ids, SHA-512 for
//! the Bloom filter's index bits.

use sha2::{Digest, Sha256, Sha512};

#[must_use]
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

#[must_use]
pub fn sha512(data: &[u8]) -> [u8; 64] {
    Sha512::digest(data).into()
}

/// First eight bytes of `sha256(data)`. A peer id is the short hash of the
/// peer's X25519 static key.
#[must_use]
pub fn short_hash(data: &[u8]) -> [u8; 8] {
    let mut id = [0u8; 8];
    id.copy_from_slice(&sha256(data)[..8]);
    id
}

/// Incremental SHA-256, for hashing a value assembled from several parts
/// without concatenating them first.
#[derive(Clone, Default)]
pub struct Sha256Hasher {
    inner: Sha256,
}

impl Sha256Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    #[must_use]
    pub fn finalize(self) -> [u8; 32] {
        self.inner.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
    const ABC_SHA512: &str = "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
                              2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f";

    #[test]
    fn test_sha256_known_digest() {
        assert_eq!(hex::encode(sha256(b"abc")), ABC_SHA256);
    }

    #[test]
    fn test_sha512_known_digest() {
        let expected: String = ABC_SHA512.split_whitespace().collect();
        assert_eq!(hex::encode(sha512(b"abc")), expected);
    }

    #[test]
    fn test_short_hash_is_sha256_prefix() {
        let full = sha256(b"static public key");
        let short = short_hash(b"static public key");
        assert_eq!(short.as_slice(), &full[..8]);
    }

    #[test]
    fn test_sha256_streaming() {
        let input = vec![0x5Au8; 1000];
        let expected = sha256(&input);

        let mid = input.len() / 2;
        let mut hasher = Sha256Hasher::new();
        hasher.update(&input[..mid]);
        hasher.update(&input[mid..]);
        assert_eq!(hasher.finalize(), expected, "streaming SHA-256 mismatch");
    }

    #[test]
    fn test_sha256_empty_input() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
