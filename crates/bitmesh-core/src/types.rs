//! Newtype wrappers for protocol byte-array fields.
//!
//! These types keep peer addresses, packet identities and key fingerprints
//! from being mixed up even though they are all plain byte arrays underneath.

use core::fmt;
use core::str::FromStr;

use bitmesh_crypto::sha::{sha256, short_hash};

/// Helper to write lowercase hex without the `hex` crate.
fn fmt_hex(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in bytes {
        write!(f, "{:02x}", byte)?;
    }
    Ok(())
}

fn parse_hex<const N: usize>(s: &str) -> Result<[u8; N], InvalidLength> {
    let invalid = InvalidLength {
        expected: N,
        actual: s.len() / 2,
    };
    if s.len() != N * 2 || !s.is_ascii() {
        return Err(invalid);
    }
    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| invalid.clone())?;
    }
    Ok(out)
}

/// An 8-byte mesh peer address.
///
/// Derived from a node's static X25519 key with [`PeerId::from_static_key`].
/// The all-`0xFF` value addresses every peer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub struct PeerId(pub(crate) [u8; 8]);

impl PeerId {
    pub const BROADCAST: PeerId = PeerId([0xFF; 8]);

    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    /// First 8 bytes of SHA-256 over the static public key.
    pub fn from_static_key(public_key: &[u8]) -> Self {
        Self(short_hash(public_key))
    }

    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    #[must_use]
    pub const fn to_bytes(&self) -> [u8; 8] {
        self.0
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for PeerId {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| InvalidLength {
            expected: 8,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl FromStr for PeerId {
    type Err = InvalidLength;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_hex::<8>(s).map(Self)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId(")?;
        fmt_hex(&self.0, f)?;
        write!(f, ")")
    }
}

/// A 32-byte packet identity used for duplicate suppression.
///
/// Covers everything except the TTL, so the same packet relayed over
/// different hop counts maps to the same id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct PacketId(pub(crate) [u8; 32]);

impl PacketId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for PacketId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketId(")?;
        fmt_hex(&self.0[..4], f)?;
        write!(f, "..)")
    }
}

/// SHA-256 fingerprint of a static public key, shown to users for
/// out-of-band verification.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct Fingerprint(pub(crate) [u8; 32]);

impl Fingerprint {
    pub fn of_key(public_key: &[u8]) -> Self {
        Self(sha256(public_key))
    }
}

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_hex(&self.0, f)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint(")?;
        fmt_hex(&self.0[..4], f)?;
        write!(f, "..)")
    }
}

/// Error returned when a byte slice has the wrong length for a newtype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidLength {
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for InvalidLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid length: expected {} bytes, got {}",
            self.expected, self.actual
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidLength {}

#[cfg(feature = "serde")]
mod serde_impls {
    use super::PeerId;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    impl Serialize for PeerId {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(self)
        }
    }

    impl<'de> Deserialize<'de> for PeerId {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        }
    }
}
