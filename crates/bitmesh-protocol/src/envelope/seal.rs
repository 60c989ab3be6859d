//! Seal: the rumor encrypted to the recipient under a one-time key.

use bitmesh_core::identity::Identity;
use bitmesh_crypto::x25519::X25519PublicKey;

use super::event::{Event, KIND_SEAL, decrypt_content, encrypt_content};
use super::rumor::parse_rumor;
use crate::error::EnvelopeError;

/// Encrypt `rumor` to `recipient` under a fresh ephemeral key, which also
/// signs the seal.
pub fn create_seal(
    rumor: &Event,
    recipient: &X25519PublicKey,
    created_at: u64,
) -> Result<Event, EnvelopeError> {
    let ephemeral = Identity::generate();
    let content = encrypt_content(&ephemeral, recipient, rumor.to_json()?.as_bytes())?;
    Event::signed(&ephemeral, created_at, KIND_SEAL, Vec::new(), content)
}

/// Verify the seal and recover the rumor inside it.
pub fn open_seal(seal: &Event, recipient: &Identity) -> Result<Event, EnvelopeError> {
    seal.expect_kind(KIND_SEAL)?;
    seal.verify()?;
    let ephemeral = seal.author()?;
    let plaintext = decrypt_content(recipient, ephemeral.x25519_public(), &seal.content)?;
    let json = String::from_utf8(plaintext)
        .map_err(|_| EnvelopeError::InvalidEncoding("rumor utf-8"))?;
    parse_rumor(&json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::rumor::create_rumor;

    #[test]
    fn test_seal_round_trip() {
        let sender = Identity::generate();
        let recipient = Identity::generate();
        let rumor = create_rumor("hi", &hex::encode(sender.public_key_bytes()), 10).unwrap();

        let seal = create_seal(&rumor, recipient.x25519_public(), 10).unwrap();
        assert_ne!(seal.pubkey, rumor.pubkey);
        assert_eq!(open_seal(&seal, &recipient).unwrap(), rumor);
    }

    #[test]
    fn test_seal_with_forged_signature_rejected() {
        let recipient = Identity::generate();
        let rumor = create_rumor("hi", "ab", 10).unwrap();
        let mut seal = create_seal(&rumor, recipient.x25519_public(), 10).unwrap();
        let other = create_seal(&rumor, recipient.x25519_public(), 10).unwrap();
        seal.sig = other.sig;
        assert!(matches!(
            open_seal(&seal, &recipient),
            Err(EnvelopeError::InvalidSignature)
        ));
    }
}
