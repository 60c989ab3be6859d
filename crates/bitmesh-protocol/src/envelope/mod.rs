//! Three-layer private message envelopes for the relay network.
//!
//! A rumor (the real message) is sealed to the recipient under one
//! ephemeral key, and the seal is gift-wrapped under a second one. Relays
//! see only the recipient key, a jittered timestamp and an expiry.

pub mod event;
pub mod gift_wrap;
pub mod rumor;
pub mod seal;

use bitmesh_core::identity::Identity;

use crate::error::EnvelopeError;

pub use event::{Event, KIND_GIFT_WRAP, KIND_RUMOR, KIND_SEAL};
pub use gift_wrap::{create_gift_wrap, open_gift_wrap};
pub use rumor::{create_rumor, parse_rumor};
pub use seal::{create_seal, open_seal};

/// Content and hex author key recovered from a gift wrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateMessage {
    pub content: String,
    pub sender_pubkey: String,
    pub created_at: u64,
    pub rumor_id: String,
}

pub fn create_private_message(
    content: &str,
    recipient_pubkey: &str,
    sender: &Identity,
) -> Result<Event, EnvelopeError> {
    create_private_message_at(content, recipient_pubkey, sender, now_secs())
}

/// Rumor, seal and gift-wrap `content` for the recipient with hex public
/// key `recipient_pubkey`.
pub fn create_private_message_at(
    content: &str,
    recipient_pubkey: &str,
    sender: &Identity,
    now: u64,
) -> Result<Event, EnvelopeError> {
    let recipient_bytes = event::decode_hex(recipient_pubkey, "recipient pubkey")?;
    let recipient = Identity::from_public_bytes(&recipient_bytes)?;

    let rumor = create_rumor(content, &hex::encode(sender.public_key_bytes()), now)?;
    let seal = create_seal(&rumor, recipient.x25519_public(), now)?;
    let wrap = create_gift_wrap(&seal, recipient_pubkey, recipient.x25519_public(), now)?;
    tracing::trace!(wrap_id = %wrap.id, "created private message");
    Ok(wrap)
}

pub fn decrypt_private_message(
    gift_wrap: &Event,
    recipient: &Identity,
) -> Result<PrivateMessage, EnvelopeError> {
    decrypt_private_message_at(gift_wrap, recipient, now_secs())
}

/// Unwrap all three layers. Any id, signature or decryption failure
/// rejects the whole message.
pub fn decrypt_private_message_at(
    gift_wrap: &Event,
    recipient: &Identity,
    now: u64,
) -> Result<PrivateMessage, EnvelopeError> {
    if let Some(expiration) = gift_wrap.expiration()
        && now >= expiration
    {
        return Err(EnvelopeError::Expired(expiration));
    }
    let seal = open_gift_wrap(gift_wrap, recipient)?;
    let rumor = open_seal(&seal, recipient)?;
    Ok(PrivateMessage {
        content: rumor.content,
        sender_pubkey: rumor.pubkey,
        created_at: rumor.created_at,
        rumor_id: rumor.id,
    })
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
