//! Public keys and nicknames of peers this node has heard of.
//!
//! Mesh peers are learned from signed announces; relay peers from the
//! sender key inside a decrypted envelope. The relay path needs the
//! 64-byte key to wrap a message, so a peer is only reachable over relays
//! once it is in the directory.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use serde::{Deserialize, Serialize};

use bitmesh_core::constants::{MessageType, PUBLIC_KEY_SIZE};
use bitmesh_core::identity::Identity;
use bitmesh_core::packet::wire::Packet;
use bitmesh_core::types::PeerId;

use crate::error::{NodeError, PayloadError};

/// Longest nickname carried in an announce, in bytes.
pub const MAX_NICKNAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownPeer {
    /// Hex of `x25519_public || ed25519_public`.
    pub public_key: String,
    pub nickname: Option<String>,
    /// Unix milliseconds of the last announce or envelope.
    pub last_seen: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerDirectory {
    peers: HashMap<PeerId, KnownPeer>,
}

/// A signed broadcast carrying `public_key(64) || nickname`.
pub fn build_announce(
    identity: &Identity,
    nickname: Option<&str>,
    ttl: u8,
    now: u64,
) -> Result<Packet, NodeError> {
    let signing_key = identity
        .ed25519_private()
        .ok_or_else(|| NodeError::Identity("announce requires a private key".into()))?;

    let mut payload = identity.public_key_bytes().to_vec();
    if let Some(name) = nickname {
        payload.extend_from_slice(truncate_nickname(name).as_bytes());
    }

    let mut packet = Packet::new(MessageType::Announce, identity.peer_id(), payload)
        .with_timestamp(now)
        .with_ttl(ttl);
    packet.sign(signing_key)?;
    Ok(packet)
}

fn truncate_nickname(name: &str) -> &str {
    if name.len() <= MAX_NICKNAME_LEN {
        return name;
    }
    let mut end = MAX_NICKNAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Decode a 64-byte hex public key.
pub fn parse_public_key(hex_key: &str) -> Result<[u8; PUBLIC_KEY_SIZE], PayloadError> {
    let bytes = hex::decode(hex_key).map_err(|_| PayloadError::InvalidPublicKey)?;
    bytes.try_into().map_err(|_| PayloadError::InvalidPublicKey)
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `public_key`. A `None` nickname keeps the one already known.
    ///
    /// Returns the peer id and whether anything changed.
    pub fn learn(
        &mut self,
        public_key: &[u8; PUBLIC_KEY_SIZE],
        nickname: Option<String>,
        now: u64,
    ) -> Result<(PeerId, bool), PayloadError> {
        let identity =
            Identity::from_public_bytes(public_key).map_err(|_| PayloadError::InvalidPublicKey)?;
        let peer = identity.peer_id();
        let key_hex = hex::encode(public_key);

        let changed = match self.peers.get_mut(&peer) {
            Some(known) => {
                let mut changed = false;
                if known.public_key != key_hex {
                    known.public_key = key_hex;
                    changed = true;
                }
                if nickname.is_some() && known.nickname != nickname {
                    known.nickname = nickname;
                    changed = true;
                }
                known.last_seen = known.last_seen.max(now);
                changed
            }
            None => {
                self.peers.insert(
                    peer,
                    KnownPeer {
                        public_key: key_hex,
                        nickname,
                        last_seen: now,
                    },
                );
                true
            }
        };
        Ok((peer, changed))
    }

    /// Verify and record an announce packet.
    pub fn record_announce(
        &mut self,
        packet: &Packet,
        now: u64,
    ) -> Result<(PeerId, bool), PayloadError> {
        if packet.message_type != MessageType::Announce {
            return Err(PayloadError::UnexpectedType(packet.message_type as u8));
        }
        if packet.payload.len() < PUBLIC_KEY_SIZE {
            return Err(PayloadError::Truncated);
        }
        let (key, name) = packet.payload.split_at(PUBLIC_KEY_SIZE);
        let identity =
            Identity::from_public_bytes(key).map_err(|_| PayloadError::InvalidPublicKey)?;
        if identity.peer_id() != packet.sender {
            return Err(PayloadError::InvalidAnnounce("sender does not match key"));
        }
        if !packet.verify(identity.ed25519_public()) {
            return Err(PayloadError::InvalidAnnounce("bad signature"));
        }
        if name.len() > MAX_NICKNAME_LEN {
            return Err(PayloadError::InvalidAnnounce("nickname too long"));
        }
        let nickname = std::str::from_utf8(name)
            .map_err(|_| PayloadError::InvalidAnnounce("nickname is not UTF-8"))?;
        let nickname = (!nickname.is_empty()).then(|| nickname.to_string());

        self.learn(&identity.public_key_bytes(), nickname, now)
    }

    /// Add every peer from `other` not already known here. Returns how
    /// many were added.
    pub fn merge(&mut self, other: PeerDirectory) -> usize {
        let mut added = 0;
        for (peer, known) in other.peers {
            if let Entry::Vacant(slot) = self.peers.entry(peer) {
                slot.insert(known);
                added += 1;
            }
        }
        added
    }

    pub fn get(&self, peer: &PeerId) -> Option<&KnownPeer> {
        self.peers.get(peer)
    }

    pub fn public_key_hex(&self, peer: &PeerId) -> Option<&str> {
        self.peers.get(peer).map(|p| p.public_key.as_str())
    }

    /// A public-only identity for verifying the peer's signatures.
    pub fn identity(&self, peer: &PeerId) -> Option<Identity> {
        let key = parse_public_key(self.public_key_hex(peer)?).ok()?;
        Identity::from_public_bytes(&key).ok()
    }

    pub fn nickname(&self, peer: &PeerId) -> Option<&str> {
        self.peers.get(peer)?.nickname.as_deref()
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Known peers, sorted by id.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        let mut ids: Vec<PeerId> = self.peers.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announce_roundtrip() {
        let alice = Identity::generate();
        let packet = build_announce(&alice, Some("alice"), 3, 1_000).unwrap();
        assert_eq!(packet.ttl, 3);
        assert!(packet.signature.is_some());

        let decoded = Packet::decode(&packet.encode().unwrap()).unwrap();
        let mut dir = PeerDirectory::new();
        let (peer, changed) = dir.record_announce(&decoded, 1_000).unwrap();
        assert_eq!(peer, alice.peer_id());
        assert!(changed);
        assert_eq!(dir.nickname(&peer), Some("alice"));
        assert_eq!(
            dir.public_key_hex(&peer),
            Some(hex::encode(alice.public_key_bytes()).as_str())
        );

        let (_, changed) = dir.record_announce(&decoded, 2_000).unwrap();
        assert!(!changed);
        assert_eq!(dir.get(&peer).unwrap().last_seen, 2_000);
    }

    #[test]
    fn test_announce_without_nickname() {
        let alice = Identity::generate();
        let packet = build_announce(&alice, None, 7, 1).unwrap();
        assert_eq!(packet.payload.len(), PUBLIC_KEY_SIZE);

        let mut dir = PeerDirectory::new();
        let (peer, _) = dir.record_announce(&packet, 1).unwrap();
        assert_eq!(dir.nickname(&peer), None);
    }

    #[test]
    fn test_announce_rejects_forgeries() {
        let alice = Identity::generate();
        let mallory = Identity::generate();
        let mut dir = PeerDirectory::new();

        let mut tampered = build_announce(&alice, Some("alice"), 7, 1).unwrap();
        tampered.payload.push(b'!');
        assert_eq!(
            dir.record_announce(&tampered, 1),
            Err(PayloadError::InvalidAnnounce("bad signature"))
        );

        let mut spoofed = build_announce(&alice, None, 7, 1).unwrap();
        spoofed.sender = mallory.peer_id();
        assert_eq!(
            dir.record_announce(&spoofed, 1),
            Err(PayloadError::InvalidAnnounce("sender does not match key"))
        );

        let short = Packet::new(MessageType::Announce, alice.peer_id(), vec![0; 10]);
        assert_eq!(dir.record_announce(&short, 1), Err(PayloadError::Truncated));

        let wrong_type = Packet::new(MessageType::Leave, alice.peer_id(), vec![]);
        assert_eq!(
            dir.record_announce(&wrong_type, 1),
            Err(PayloadError::UnexpectedType(0x03))
        );
        assert!(dir.is_empty());
    }

    #[test]
    fn test_long_nickname_is_truncated_on_char_boundary() {
        let alice = Identity::generate();
        let name = "é".repeat(40);
        let packet = build_announce(&alice, Some(&name), 7, 1).unwrap();
        let nickname_len = packet.payload.len() - PUBLIC_KEY_SIZE;
        assert!(nickname_len <= MAX_NICKNAME_LEN);

        let mut dir = PeerDirectory::new();
        let (peer, _) = dir.record_announce(&packet, 1).unwrap();
        assert_eq!(dir.nickname(&peer).unwrap().chars().count(), 32);
    }

    #[test]
    fn test_learn_keeps_nickname_when_none_given() {
        let bob = Identity::generate();
        let mut dir = PeerDirectory::new();
        dir.learn(&bob.public_key_bytes(), Some("bob".into()), 1).unwrap();
        let (peer, changed) = dir.learn(&bob.public_key_bytes(), None, 2).unwrap();
        assert!(!changed);
        assert_eq!(dir.nickname(&peer), Some("bob"));
        assert_eq!(
            dir.identity(&peer).unwrap().public_key_bytes(),
            bob.public_key_bytes()
        );
    }

    #[test]
    fn test_merge_keeps_existing_entries() {
        let bob = Identity::generate();
        let carol = Identity::generate();
        let mut current = PeerDirectory::new();
        current.learn(&bob.public_key_bytes(), Some("bob".into()), 10).unwrap();

        let mut stored = PeerDirectory::new();
        stored.learn(&bob.public_key_bytes(), Some("old bob".into()), 1).unwrap();
        stored.learn(&carol.public_key_bytes(), None, 1).unwrap();

        assert_eq!(current.merge(stored), 1);
        assert_eq!(current.len(), 2);
        assert_eq!(current.nickname(&bob.peer_id()), Some("bob"));
        assert!(current.contains(&carol.peer_id()));
    }

    #[test]
    fn test_parse_public_key() {
        let bob = Identity::generate();
        let hex_key = hex::encode(bob.public_key_bytes());
        assert_eq!(parse_public_key(&hex_key).unwrap(), bob.public_key_bytes());
        assert_eq!(parse_public_key("abcd"), Err(PayloadError::InvalidPublicKey));
        assert_eq!(parse_public_key("zz"), Err(PayloadError::InvalidPublicKey));
    }

    #[test]
    fn test_directory_serde_roundtrip() {
        let bob = Identity::generate();
        let mut dir = PeerDirectory::new();
        dir.learn(&bob.public_key_bytes(), Some("bob".into()), 5).unwrap();

        let json = serde_json::to_string(&dir).unwrap();
        assert!(json.contains(&bob.peer_id().to_string()));
        let restored: PeerDirectory = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, dir);
        assert_eq!(restored.peer_ids(), vec![bob.peer_id()]);
    }
}
