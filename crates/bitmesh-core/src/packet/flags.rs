//! Packet flag byte encoding and decoding.
//!
//! ```text
//! Bits 7-3: reserved (ignored on decode, zero on encode)
//! Bit 2:    is_compressed
//! Bit 1:    has_signature
//! Bit 0:    has_recipient
//! ```

pub const HAS_RECIPIENT: u8 = 0x01;
pub const HAS_SIGNATURE: u8 = 0x02;
pub const IS_COMPRESSED: u8 = 0x04;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags {
    pub has_recipient: bool,
    pub has_signature: bool,
    pub is_compressed: bool,
}

impl PacketFlags {
    pub fn from_byte(byte: u8) -> Self {
        PacketFlags {
            has_recipient: byte & HAS_RECIPIENT != 0,
            has_signature: byte & HAS_SIGNATURE != 0,
            is_compressed: byte & IS_COMPRESSED != 0,
        }
    }

    pub fn to_byte(&self) -> u8 {
        (self.has_recipient as u8 * HAS_RECIPIENT)
            | (self.has_signature as u8 * HAS_SIGNATURE)
            | (self.is_compressed as u8 * IS_COMPRESSED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_bits() {
        let flags = PacketFlags {
            has_recipient: true,
            has_signature: false,
            is_compressed: true,
        };
        assert_eq!(flags.to_byte(), 0x05);
        assert_eq!(PacketFlags::default().to_byte(), 0x00);
    }

    #[test]
    fn test_exhaustive_low_bits_roundtrip() {
        for byte in 0u8..8 {
            assert_eq!(PacketFlags::from_byte(byte).to_byte(), byte);
        }
    }

    #[test]
    fn test_reserved_bits_ignored() {
        let flags = PacketFlags::from_byte(0xF8 | HAS_SIGNATURE);
        assert!(flags.has_signature);
        assert!(!flags.has_recipient);
        assert!(!flags.is_compressed);
        assert_eq!(flags.to_byte(), HAS_SIGNATURE);
    }
}
