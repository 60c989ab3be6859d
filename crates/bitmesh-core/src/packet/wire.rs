//! Mesh packet encoding and defensive decoding.
//!
//! Wire layout (all integers big-endian):
//!
//! ```text
//! version(1) type(1) ttl(1) timestamp(8) flags(1) length(2 for v1 | 4 for v2)
//! sender(8) [recipient(8)] payload-section(length) [signature(64)]
//! ```
//!
//! When the compressed flag is set the payload section is an original-size
//! prefix (as wide as the length field) followed by an LZ4 block. Compression
//! is a wire detail: [`Packet`] always holds the uncompressed payload.

use alloc::vec::Vec;

use bitmesh_crypto::ed25519::{Ed25519PrivateKey, Ed25519PublicKey, Ed25519Signature};
use bitmesh_crypto::sha::Sha256Hasher;

use crate::constants::{
    DEFAULT_TTL, MAX_PAYLOAD_SIZE, MessageType, PEER_ID_SIZE, SIGNATURE_SIZE, VERSION_1,
    header_size,
};
use crate::error::{DecodeError, EncodeError};
use crate::packet::compression;
use crate::packet::flags::PacketFlags;
use crate::types::{PacketId, PeerId};

/// A decoded mesh packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub message_type: MessageType,
    pub ttl: u8,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub sender: PeerId,
    pub recipient: Option<PeerId>,
    pub payload: Vec<u8>,
    pub signature: Option<[u8; SIGNATURE_SIZE]>,
}

impl Packet {
    /// A version 1 packet with the default TTL and no recipient.
    pub fn new(message_type: MessageType, sender: PeerId, payload: Vec<u8>) -> Self {
        Packet {
            version: VERSION_1,
            message_type,
            ttl: DEFAULT_TTL,
            timestamp: 0,
            sender,
            recipient: None,
            payload,
            signature: None,
        }
    }

    #[must_use]
    pub fn with_recipient(mut self, recipient: PeerId) -> Self {
        self.recipient = Some(recipient);
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp = timestamp_ms;
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Select the header layout. Version 2 lifts the 64 KiB payload limit.
    #[must_use]
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Whether the packet is addressed to every peer.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none_or(|r| r.is_broadcast())
    }

    /// Serialize the packet to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let header = header_size(self.version)
            .map_err(|_| EncodeError::UnsupportedVersion(self.version))?;
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(EncodeError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let (section, compressed) = self.payload_section();
        let length_field_max = if self.version == VERSION_1 {
            u16::MAX as usize
        } else {
            u32::MAX as usize
        };
        if section.len() > length_field_max {
            return Err(EncodeError::LengthFieldOverflow {
                size: section.len(),
                version: self.version,
            });
        }

        let flags = PacketFlags {
            has_recipient: self.recipient.is_some(),
            has_signature: self.signature.is_some(),
            is_compressed: compressed,
        };

        let mut out = Vec::with_capacity(
            header + PEER_ID_SIZE * 2 + section.len() + SIGNATURE_SIZE,
        );
        out.push(self.version);
        out.push(self.message_type as u8);
        out.push(self.ttl);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.push(flags.to_byte());
        if self.version == VERSION_1 {
            out.extend_from_slice(&(section.len() as u16).to_be_bytes());
        } else {
            out.extend_from_slice(&(section.len() as u32).to_be_bytes());
        }
        out.extend_from_slice(self.sender.as_ref());
        if let Some(recipient) = &self.recipient {
            out.extend_from_slice(recipient.as_ref());
        }
        out.extend_from_slice(&section);
        if let Some(signature) = &self.signature {
            out.extend_from_slice(signature);
        }
        Ok(out)
    }

    /// Build the payload section, compressing when it pays off.
    fn payload_section(&self) -> (Vec<u8>, bool) {
        let prefix_width = prefix_width(self.version);
        let fits_prefix = prefix_width == 4 || self.payload.len() <= u16::MAX as usize;
        if fits_prefix
            && compression::should_compress(&self.payload)
            && let Some(compressed) = compression::compress(&self.payload, prefix_width)
        {
            let mut section = Vec::with_capacity(prefix_width + compressed.len());
            if prefix_width == 2 {
                section.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
            } else {
                section.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
            }
            section.extend_from_slice(&compressed);
            return (section, true);
        }
        (self.payload.clone(), false)
    }

    /// Parse wire bytes into a packet.
    ///
    /// Every length field is checked against the bytes actually present
    /// before it is used. Bytes after the signature (or after the payload
    /// section when unsigned) are treated as padding and ignored.
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        let version = *raw.first().ok_or(DecodeError::TooShort {
            min: 1,
            actual: 0,
        })?;
        let header = header_size(version)?;
        let fixed = header + PEER_ID_SIZE;
        if raw.len() < fixed {
            return Err(DecodeError::TooShort {
                min: fixed,
                actual: raw.len(),
            });
        }

        let message_type = MessageType::from_u8(raw[1])?;
        let ttl = raw[2];
        let timestamp = u64::from_be_bytes(read_array(raw, 3));
        let flags = PacketFlags::from_byte(raw[11]);
        let declared = if version == VERSION_1 {
            u16::from_be_bytes(read_array(raw, 12)) as usize
        } else {
            u32::from_be_bytes(read_array(raw, 12)) as usize
        };

        let mut offset = header;
        let sender = PeerId::new(read_array(raw, offset));
        offset += PEER_ID_SIZE;

        let recipient = if flags.has_recipient {
            if raw.len() < offset + PEER_ID_SIZE {
                return Err(DecodeError::TooShort {
                    min: offset + PEER_ID_SIZE,
                    actual: raw.len(),
                });
            }
            let id = PeerId::new(read_array(raw, offset));
            offset += PEER_ID_SIZE;
            Some(id)
        } else {
            None
        };

        let trailer = if flags.has_signature { SIGNATURE_SIZE } else { 0 };
        let available = raw.len() - offset;
        let remaining = available.saturating_sub(trailer);
        if declared > remaining {
            return Err(DecodeError::PayloadOverrun {
                declared,
                remaining,
            });
        }
        if available < declared + trailer {
            return Err(DecodeError::TooShort {
                min: offset + declared + trailer,
                actual: raw.len(),
            });
        }
        if declared > MAX_PAYLOAD_SIZE {
            return Err(DecodeError::PayloadTooLarge {
                declared,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let section = &raw[offset..offset + declared];
        offset += declared;

        let payload = if flags.is_compressed {
            let width = prefix_width(version);
            if section.len() < width {
                return Err(DecodeError::TooShort {
                    min: width,
                    actual: section.len(),
                });
            }
            let original_size = if width == 2 {
                u16::from_be_bytes(read_array(section, 0)) as usize
            } else {
                u32::from_be_bytes(read_array(section, 0)) as usize
            };
            compression::decompress(&section[width..], original_size)?
        } else {
            section.to_vec()
        };

        let signature = if flags.has_signature {
            Some(read_array::<SIGNATURE_SIZE>(raw, offset))
        } else {
            None
        };

        Ok(Packet {
            version,
            message_type,
            ttl,
            timestamp,
            sender,
            recipient,
            payload,
            signature,
        })
    }

    /// Bytes covered by the packet signature: the encoding with `ttl = 0`
    /// and no signature, so relays can decrement the TTL freely.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let mut unsigned = self.clone();
        unsigned.ttl = 0;
        unsigned.signature = None;
        unsigned.encode()
    }

    /// Attach an Ed25519 signature over [`Self::signing_bytes`].
    pub fn sign(&mut self, key: &Ed25519PrivateKey) -> Result<(), EncodeError> {
        let data = self.signing_bytes()?;
        self.signature = Some(key.sign(&data).to_bytes());
        Ok(())
    }

    /// Check the attached signature. Unsigned packets never verify.
    #[must_use]
    pub fn verify(&self, key: &Ed25519PublicKey) -> bool {
        let Some(signature) = self.signature else {
            return false;
        };
        let Ok(data) = self.signing_bytes() else {
            return false;
        };
        key.verify(&data, &Ed25519Signature::from_bytes(signature))
            .is_ok()
    }

    /// Identity used for duplicate suppression: SHA-256 over type, sender,
    /// recipient, timestamp and payload. TTL and signature are excluded.
    pub fn packet_id(&self) -> PacketId {
        let mut hasher = Sha256Hasher::new();
        hasher.update(&[self.message_type as u8]);
        hasher.update(self.sender.as_ref());
        if let Some(recipient) = &self.recipient {
            hasher.update(recipient.as_ref());
        }
        hasher.update(&self.timestamp.to_be_bytes());
        hasher.update(&self.payload);
        PacketId::new(hasher.finalize())
    }
}

fn prefix_width(version: u8) -> usize {
    if version == VERSION_1 { 2 } else { 4 }
}

/// Copy `N` bytes starting at `offset`. Callers bounds-check first.
fn read_array<const N: usize>(raw: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&raw[offset..offset + N]);
    out
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::constants::VERSION_2;
    use proptest::prelude::*;

    const TYPES: [MessageType; 5] = [
        MessageType::Announce,
        MessageType::Message,
        MessageType::DeliveryAck,
        MessageType::NoiseEncrypted,
        MessageType::FavoriteNotification,
    ];

    fn arb_packet() -> impl Strategy<Value = Packet> {
        (
            prop_oneof![Just(VERSION_1), Just(VERSION_2)],
            0..TYPES.len(),
            any::<u8>(),
            any::<u64>(),
            any::<[u8; 8]>(),
            proptest::option::of(any::<[u8; 8]>()),
            prop_oneof![
                proptest::collection::vec(any::<u8>(), 0..600),
                proptest::collection::vec(0u8..4, 100..600),
            ],
            any::<bool>(),
        )
            .prop_map(
                |(version, ty, ttl, timestamp, sender, recipient, payload, signed)| Packet {
                    version,
                    message_type: TYPES[ty],
                    ttl,
                    timestamp,
                    sender: PeerId::new(sender),
                    recipient: recipient.map(PeerId::new),
                    payload,
                    signature: signed.then_some([0x5A; SIGNATURE_SIZE]),
                },
            )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn decode_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let _ = Packet::decode(&data);
        }

        #[test]
        fn encode_decode_roundtrip(packet in arb_packet()) {
            let bytes = packet.encode().unwrap();
            prop_assert_eq!(Packet::decode(&bytes).unwrap(), packet);
        }

        #[test]
        fn truncation_always_fails(packet in arb_packet(), cut in 1usize..64) {
            let bytes = packet.encode().unwrap();
            let keep = bytes.len().saturating_sub(cut);
            prop_assert!(Packet::decode(&bytes[..keep]).is_err());
        }
    }
}
