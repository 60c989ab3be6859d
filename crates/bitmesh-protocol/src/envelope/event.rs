//! The shared event record and its content encryption.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bitmesh_core::identity::Identity;
use bitmesh_crypto::aead;
use bitmesh_crypto::ed25519::Ed25519Signature;
use bitmesh_crypto::hkdf::hkdf;
use bitmesh_crypto::sha::sha256;
use bitmesh_crypto::x25519::X25519PublicKey;
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;

pub const KIND_SEAL: u32 = 13;
pub const KIND_RUMOR: u32 = 14;
pub const KIND_GIFT_WRAP: u32 = 1059;

/// HKDF info string for envelope content keys.
pub const ENVELOPE_KDF_INFO: &[u8] = b"bitmesh-envelope-v1";

/// A relay event. Rumors leave `sig` empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u32,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// SHA-256 over `[0, pubkey, created_at, kind, tags, content]`, hex.
    pub fn compute_id(
        pubkey: &str,
        created_at: u64,
        kind: u32,
        tags: &[Vec<String>],
        content: &str,
    ) -> Result<String, EnvelopeError> {
        let canonical =
            serde_json::to_string(&serde_json::json!([0, pubkey, created_at, kind, tags, content]))?;
        Ok(hex::encode(sha256(canonical.as_bytes())))
    }

    pub fn unsigned(
        pubkey: String,
        created_at: u64,
        kind: u32,
        tags: Vec<Vec<String>>,
        content: String,
    ) -> Result<Self, EnvelopeError> {
        let id = Self::compute_id(&pubkey, created_at, kind, &tags, &content)?;
        Ok(Self {
            id,
            pubkey,
            created_at,
            kind,
            tags,
            content,
            sig: String::new(),
        })
    }

    /// Build an event authored and signed by `author`.
    pub fn signed(
        author: &Identity,
        created_at: u64,
        kind: u32,
        tags: Vec<Vec<String>>,
        content: String,
    ) -> Result<Self, EnvelopeError> {
        let mut event = Self::unsigned(
            hex::encode(author.public_key_bytes()),
            created_at,
            kind,
            tags,
            content,
        )?;
        let id = decode_hex(&event.id, "event id")?;
        event.sig = hex::encode(author.sign(&id)?.to_bytes());
        Ok(event)
    }

    pub fn verify_id(&self) -> Result<(), EnvelopeError> {
        let expected = Self::compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if expected != self.id {
            return Err(EnvelopeError::IdMismatch);
        }
        Ok(())
    }

    /// Check the id, then the Ed25519 signature by `pubkey` over the id.
    pub fn verify(&self) -> Result<(), EnvelopeError> {
        self.verify_id()?;
        let author = self.author()?;
        let id = decode_hex(&self.id, "event id")?;
        let sig = Ed25519Signature::try_from_slice(&decode_hex(&self.sig, "signature")?)
            .map_err(|_| EnvelopeError::InvalidSignature)?;
        author
            .verify(&id, &sig)
            .map_err(|_| EnvelopeError::InvalidSignature)
    }

    pub fn expect_kind(&self, expected: u32) -> Result<(), EnvelopeError> {
        if self.kind != expected {
            return Err(EnvelopeError::UnexpectedKind {
                expected,
                actual: self.kind,
            });
        }
        Ok(())
    }

    /// Public-only identity for `pubkey`.
    pub fn author(&self) -> Result<Identity, EnvelopeError> {
        Ok(Identity::from_public_bytes(&decode_hex(&self.pubkey, "pubkey")?)?)
    }

    /// First value of the first tag named `name`.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().is_some_and(|t| t == name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// Unix seconds from the `expiration` tag, if present and numeric.
    pub fn expiration(&self) -> Option<u64> {
        self.tag_value("expiration")?.parse().ok()
    }

    #[must_use]
    pub fn is_expired_at(&self, now_secs: u64) -> bool {
        self.expiration().is_some_and(|exp| now_secs >= exp)
    }

    pub fn to_json(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_str(json)?)
    }
}

pub(crate) fn decode_hex(value: &str, what: &'static str) -> Result<Vec<u8>, EnvelopeError> {
    hex::decode(value).map_err(|_| EnvelopeError::InvalidEncoding(what))
}

fn content_key(shared: &[u8; 32], ephemeral_public: &[u8; 32]) -> Result<[u8; 32], EnvelopeError> {
    let derived = hkdf(32, shared, Some(ephemeral_public), Some(ENVELOPE_KDF_INFO));
    derived
        .as_slice()
        .try_into()
        .map_err(|_| EnvelopeError::InvalidEncoding("derived key length"))
}

/// Encrypt `plaintext` from `ephemeral` to `recipient`.
///
/// `base64(nonce(12) || ciphertext || tag(16))`, keyed by
/// HKDF(ECDH(ephemeral, recipient), salt = ephemeral public key).
pub fn encrypt_content(
    ephemeral: &Identity,
    recipient: &X25519PublicKey,
    plaintext: &[u8],
) -> Result<String, EnvelopeError> {
    let shared = ephemeral.agree(recipient)?;
    let key = content_key(&shared, &ephemeral.x25519_public().to_bytes())?;
    Ok(STANDARD.encode(aead::seal_random(&key, plaintext)?))
}

/// Inverse of [`encrypt_content`], run by the recipient against the sender's
/// ephemeral public key.
pub fn decrypt_content(
    recipient: &Identity,
    ephemeral_public: &X25519PublicKey,
    content: &str,
) -> Result<Vec<u8>, EnvelopeError> {
    let sealed = STANDARD
        .decode(content)
        .map_err(|_| EnvelopeError::InvalidEncoding("content base64"))?;
    let shared = recipient.agree(ephemeral_public)?;
    let key = content_key(&shared, &ephemeral_public.to_bytes())?;
    Ok(aead::open_random(&key, &sealed)?)
}
