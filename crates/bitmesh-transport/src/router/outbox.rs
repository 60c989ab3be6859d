//! Per-peer FIFO outbox of unconfirmed private messages.

use std::collections::{HashMap, VecDeque};

use bitmesh_core::types::PeerId;
use serde::{Deserialize, Serialize};

/// One pending private message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub message_id: String,
    pub destination: PeerId,
    pub content: Vec<u8>,
    /// Unix milliseconds at which the entry was queued.
    pub enqueued_at: u64,
    pub attempts: u32,
    /// Unix milliseconds of the last transmission; not persisted.
    #[serde(skip)]
    pub last_sent_at: Option<u64>,
}

impl OutboxEntry {
    pub fn new(message_id: String, destination: PeerId, content: Vec<u8>, now: u64) -> Self {
        Self {
            message_id,
            destination,
            content,
            enqueued_at: now,
            attempts: 0,
            last_sent_at: None,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: u64, expiry_ms: u64) -> bool {
        now.saturating_sub(self.enqueued_at) > expiry_ms
    }

    /// Whether the entry was sent within the last `cooldown_ms`.
    #[must_use]
    pub fn in_cooldown(&self, now: u64, cooldown_ms: u64) -> bool {
        self.last_sent_at
            .is_some_and(|sent| now.saturating_sub(sent) < cooldown_ms)
    }
}

/// Serializable view of every queued entry, oldest first per peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxSnapshot {
    pub entries: Vec<OutboxEntry>,
}

#[derive(Debug, Default)]
pub struct Outbox {
    queues: HashMap<PeerId, VecDeque<OutboxEntry>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to the destination's queue. Returns `false` (and leaves the
    /// queue untouched) if the message id is already queued.
    pub fn push(&mut self, entry: OutboxEntry) -> bool {
        if self.contains(&entry.message_id) {
            return false;
        }
        self.queues
            .entry(entry.destination)
            .or_default()
            .push_back(entry);
        true
    }

    pub fn contains(&self, message_id: &str) -> bool {
        self.queues
            .values()
            .any(|q| q.iter().any(|e| e.message_id == message_id))
    }

    /// Remove an entry from whichever queue holds it.
    pub fn remove(&mut self, message_id: &str) -> Option<OutboxEntry> {
        let (peer, idx) = self.queues.iter().find_map(|(peer, q)| {
            q.iter()
                .position(|e| e.message_id == message_id)
                .map(|idx| (*peer, idx))
        })?;
        let queue = self.queues.get_mut(&peer)?;
        let entry = queue.remove(idx);
        if queue.is_empty() {
            self.queues.remove(&peer);
        }
        entry
    }

    pub fn queue(&self, peer: &PeerId) -> Option<&VecDeque<OutboxEntry>> {
        self.queues.get(peer)
    }

    pub fn queue_mut(&mut self, peer: &PeerId) -> Option<&mut VecDeque<OutboxEntry>> {
        self.queues.get_mut(peer)
    }

    /// Drop the queue for `peer` if it has become empty.
    pub fn prune(&mut self, peer: &PeerId) {
        if self.queues.get(peer).is_some_and(VecDeque::is_empty) {
            self.queues.remove(peer);
        }
    }

    /// Remove and return every entry older than `expiry_ms`.
    pub fn take_expired(&mut self, now: u64, expiry_ms: u64) -> Vec<OutboxEntry> {
        let mut expired = Vec::new();
        for queue in self.queues.values_mut() {
            let mut kept = VecDeque::with_capacity(queue.len());
            for entry in queue.drain(..) {
                if entry.is_expired(now, expiry_ms) {
                    expired.push(entry);
                } else {
                    kept.push_back(entry);
                }
            }
            *queue = kept;
        }
        self.queues.retain(|_, q| !q.is_empty());
        expired
    }

    pub fn reset_send_state(&mut self, peer: &PeerId) {
        if let Some(queue) = self.queues.get_mut(peer) {
            queue.iter_mut().for_each(|e| e.last_sent_at = None);
        }
    }

    /// Peers with at least one unconfirmed entry, in stable order.
    pub fn pending_peer_ids(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.queues.keys().copied().collect();
        peers.sort();
        peers
    }

    pub fn len(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn snapshot(&self) -> OutboxSnapshot {
        let mut entries: Vec<OutboxEntry> = Vec::with_capacity(self.len());
        for peer in self.pending_peer_ids() {
            if let Some(queue) = self.queues.get(&peer) {
                entries.extend(queue.iter().cloned());
            }
        }
        OutboxSnapshot { entries }
    }

    /// Append every entry of `snapshot`, preserving per-peer order.
    /// Returns the number of entries added.
    pub fn restore(&mut self, snapshot: OutboxSnapshot) -> usize {
        snapshot
            .entries
            .into_iter()
            .map(|e| self.push(e))
            .filter(|added| *added)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOB: PeerId = PeerId::new([0xB0; 8]);
    const CAROL: PeerId = PeerId::new([0xC0; 8]);

    fn entry(id: &str, to: PeerId, at: u64) -> OutboxEntry {
        OutboxEntry::new(id.to_string(), to, id.as_bytes().to_vec(), at)
    }

    fn ids(outbox: &Outbox, peer: &PeerId) -> Vec<String> {
        outbox
            .queue(peer)
            .map(|q| q.iter().map(|e| e.message_id.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_push_keeps_fifo_order() {
        let mut outbox = Outbox::new();
        outbox.push(entry("m1", BOB, 0));
        outbox.push(entry("m2", BOB, 1));
        outbox.push(entry("m3", CAROL, 2));
        assert_eq!(ids(&outbox, &BOB), ["m1", "m2"]);
        assert_eq!(outbox.len(), 3);
    }

    #[test]
    fn test_duplicate_message_id_rejected() {
        let mut outbox = Outbox::new();
        assert!(outbox.push(entry("m1", BOB, 0)));
        assert!(!outbox.push(entry("m1", CAROL, 5)));
        assert_eq!(outbox.len(), 1);
    }

    #[test]
    fn test_remove_from_any_queue() {
        let mut outbox = Outbox::new();
        outbox.push(entry("m1", BOB, 0));
        outbox.push(entry("m2", CAROL, 0));
        assert_eq!(outbox.remove("m2").unwrap().destination, CAROL);
        assert!(outbox.remove("m2").is_none());
        assert_eq!(outbox.pending_peer_ids(), vec![BOB]);
    }

    #[test]
    fn test_take_expired() {
        let mut outbox = Outbox::new();
        outbox.push(entry("old", BOB, 0));
        outbox.push(entry("new", BOB, 1_000));
        let expired = outbox.take_expired(300_500, 300_000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].message_id, "old");
        assert_eq!(ids(&outbox, &BOB), ["new"]);
    }

    #[test]
    fn test_cooldown_window() {
        let mut e = entry("m1", BOB, 0);
        assert!(!e.in_cooldown(0, 2_000));
        e.last_sent_at = Some(1_000);
        assert!(e.in_cooldown(2_999, 2_000));
        assert!(!e.in_cooldown(3_000, 2_000));
    }

    #[test]
    fn test_reset_send_state() {
        let mut outbox = Outbox::new();
        let mut e = entry("m1", BOB, 0);
        e.last_sent_at = Some(10);
        outbox.push(e);
        outbox.reset_send_state(&BOB);
        assert!(outbox.queue(&BOB).unwrap()[0].last_sent_at.is_none());
    }

    #[test]
    fn test_snapshot_restore_preserves_order() {
        let mut outbox = Outbox::new();
        outbox.push(entry("m1", BOB, 0));
        outbox.push(entry("m2", CAROL, 1));
        outbox.push(entry("m3", BOB, 2));

        let json = serde_json::to_string(&outbox.snapshot()).unwrap();
        let snapshot: OutboxSnapshot = serde_json::from_str(&json).unwrap();

        let mut restored = Outbox::new();
        assert_eq!(restored.restore(snapshot), 3);
        assert_eq!(ids(&restored, &BOB), ["m1", "m3"]);
        assert_eq!(ids(&restored, &CAROL), ["m2"]);
    }
}
