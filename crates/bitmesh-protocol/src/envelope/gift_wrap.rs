//! Gift wrap: the outer layer that relays see.
//!
//! Only the recipient key is visible. The author is a second one-time key,
//! and `created_at` is shifted randomly so publication time does not reveal
//! when the message was written.

use bitmesh_core::identity::Identity;
use bitmesh_crypto::x25519::X25519PublicKey;
use rand::Rng;

use super::event::{Event, KIND_GIFT_WRAP, KIND_SEAL, decrypt_content, encrypt_content};
use crate::error::EnvelopeError;

/// Maximum shift applied to a gift wrap's `created_at`, in seconds.
pub const TIMESTAMP_JITTER_SECS: u64 = 15 * 60;

/// Lifetime advertised in the `expiration` tag, in seconds.
pub const EXPIRATION_SECS: u64 = 30 * 24 * 60 * 60;

/// Wrap `seal` for the recipient with hex public key `recipient_hex`.
pub fn create_gift_wrap(
    seal: &Event,
    recipient_hex: &str,
    recipient: &X25519PublicKey,
    now: u64,
) -> Result<Event, EnvelopeError> {
    let ephemeral = Identity::generate();
    let content = encrypt_content(&ephemeral, recipient, seal.to_json()?.as_bytes())?;
    let tags = vec![
        vec!["p".to_string(), recipient_hex.to_string()],
        vec!["expiration".to_string(), (now + EXPIRATION_SECS).to_string()],
    ];
    Event::signed(&ephemeral, jittered(now), KIND_GIFT_WRAP, tags, content)
}

fn jittered(now: u64) -> u64 {
    let offset = rand::thread_rng().gen_range(0..=2 * TIMESTAMP_JITTER_SECS);
    (now + offset).saturating_sub(TIMESTAMP_JITTER_SECS)
}

/// Verify the wrap and recover the seal inside it.
pub fn open_gift_wrap(wrap: &Event, recipient: &Identity) -> Result<Event, EnvelopeError> {
    wrap.expect_kind(KIND_GIFT_WRAP)?;
    wrap.verify()?;
    let ephemeral = wrap.author()?;
    let plaintext = decrypt_content(recipient, ephemeral.x25519_public(), &wrap.content)?;
    let seal = Event::from_json(
        std::str::from_utf8(&plaintext).map_err(|_| EnvelopeError::InvalidEncoding("seal utf-8"))?,
    )?;
    seal.expect_kind(KIND_SEAL)?;
    Ok(seal)
}
