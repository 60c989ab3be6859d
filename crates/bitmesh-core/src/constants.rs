//! Protocol constants and enumerations for the bitmesh wire format.

use crate::error::DecodeError;

// Header layout versions
pub const VERSION_1: u8 = 1;
pub const VERSION_2: u8 = 2;

// Fixed header: version(1) + type(1) + ttl(1) + timestamp(8) + flags(1) + length(2|4)
pub const HEADER_V1_SIZE: usize = 14;
pub const HEADER_V2_SIZE: usize = 16;

// Address and signature sizes
pub const PEER_ID_SIZE: usize = 8;
pub const SIGNATURE_SIZE: usize = 64;
pub const PUBLIC_KEY_SIZE: usize = 64;
pub const PRIVATE_KEY_SIZE: usize = 64;

/// Hard cap on the payload section and on any declared original size.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Payloads shorter than this are never compressed.
pub const COMPRESSION_THRESHOLD: usize = 100;

/// Unique-byte ratio at or above which a payload is treated as incompressible.
pub const COMPRESSION_ENTROPY_RATIO: f64 = 0.9;

/// Number of leading bytes sampled by the entropy heuristic.
pub const COMPRESSION_SAMPLE_SIZE: usize = 256;

/// Hop budget assigned to freshly created packets.
pub const DEFAULT_TTL: u8 = 7;

/// Size of the fixed header (without the sender id) for a given version.
pub fn header_size(version: u8) -> Result<usize, DecodeError> {
    match version {
        VERSION_1 => Ok(HEADER_V1_SIZE),
        VERSION_2 => Ok(HEADER_V2_SIZE),
        other => Err(DecodeError::UnsupportedVersion(other)),
    }
}

/// Application message kinds carried in the `type` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Announce = 0x01,
    Leave = 0x03,
    Message = 0x04,
    DeliveryAck = 0x0A,
    ReadReceipt = 0x0C,
    NoiseHandshakeInit = 0x10,
    NoiseHandshakeResponse = 0x11,
    NoiseHandshakeFinish = 0x12,
    NoiseEncrypted = 0x13,
    FavoriteNotification = 0x14,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Result<Self, DecodeError> {
        match v {
            0x01 => Ok(MessageType::Announce),
            0x03 => Ok(MessageType::Leave),
            0x04 => Ok(MessageType::Message),
            0x0A => Ok(MessageType::DeliveryAck),
            0x0C => Ok(MessageType::ReadReceipt),
            0x10 => Ok(MessageType::NoiseHandshakeInit),
            0x11 => Ok(MessageType::NoiseHandshakeResponse),
            0x12 => Ok(MessageType::NoiseHandshakeFinish),
            0x13 => Ok(MessageType::NoiseEncrypted),
            0x14 => Ok(MessageType::FavoriteNotification),
            _ => Err(DecodeError::UnknownMessageType(v)),
        }
    }

    /// Whether this type carries one of the three handshake messages.
    #[must_use]
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            MessageType::NoiseHandshakeInit
                | MessageType::NoiseHandshakeResponse
                | MessageType::NoiseHandshakeFinish
        )
    }
}
