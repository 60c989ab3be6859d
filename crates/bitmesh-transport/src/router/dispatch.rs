//! Router operations over a set of transports.

use bitmesh_core::types::PeerId;
use tokio::sync::mpsc::UnboundedSender;

use super::outbox::{Outbox, OutboxEntry, OutboxSnapshot};
use super::{RouterConfig, RouterEvent, Transport, now_ms};
use crate::error::RouterError;

/// Result of [`Router::send_private`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Went out on a connected transport (and stays queued until confirmed).
    Sent,
    /// No transport could send it yet.
    Queued,
}

pub struct Router {
    config: RouterConfig,
    outbox: Outbox,
    events: Option<UnboundedSender<RouterEvent>>,
}

impl Router {
    pub fn new(config: RouterConfig, events: Option<UnboundedSender<RouterEvent>>) -> Self {
        Self {
            config,
            outbox: Outbox::new(),
            events,
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    fn emit(&self, event: RouterEvent) {
        if let Some(tx) = &self.events
            && tx.send(event).is_err()
        {
            tracing::trace!("router event receiver dropped");
        }
    }

    fn cooldown_ms(&self) -> u64 {
        self.config.resend_cooldown.as_millis() as u64
    }

    fn expiry_ms(&self) -> u64 {
        self.config.message_expiry.as_millis() as u64
    }

    pub fn send_private(
        &mut self,
        transports: &mut [&mut dyn Transport],
        peer: &PeerId,
        message_id: &str,
        content: &[u8],
    ) -> SendOutcome {
        self.send_private_at(transports, peer, message_id, content, now_ms())
    }

    /// Queue a private message and flush the peer's outbox if any transport
    /// has the peer connected.
    ///
    /// The message always joins the back of the queue first, so it can never
    /// overtake older pending entries for the same peer. A message id that is
    /// already queued is not queued twice.
    pub fn send_private_at(
        &mut self,
        transports: &mut [&mut dyn Transport],
        peer: &PeerId,
        message_id: &str,
        content: &[u8],
        now: u64,
    ) -> SendOutcome {
        let entry = OutboxEntry::new(message_id.to_string(), *peer, content.to_vec(), now);
        if self.outbox.push(entry) {
            tracing::debug!(peer = %peer, message_id, "queued private message");
            self.emit(RouterEvent::Queued {
                peer: *peer,
                message_id: message_id.to_string(),
            });
        }

        self.flush_outbox_at(transports, peer, now);

        let sent = self
            .outbox
            .queue(peer)
            .and_then(|q| q.iter().find(|e| e.message_id == message_id))
            .is_some_and(|e| e.last_sent_at.is_some());
        if sent {
            SendOutcome::Sent
        } else {
            SendOutcome::Queued
        }
    }

    pub fn flush_outbox(&mut self, transports: &mut [&mut dyn Transport], peer: &PeerId) -> usize {
        self.flush_outbox_at(transports, peer, now_ms())
    }

    /// Send every eligible entry queued for `peer`, oldest first.
    ///
    /// Expired entries are dropped, entries sent within the resend cooldown
    /// are skipped. An entry the transport rejects permanently is removed so
    /// it cannot hold up the rest of the queue; any other error stops the
    /// flush. Returns the number of entries sent.
    pub fn flush_outbox_at(
        &mut self,
        transports: &mut [&mut dyn Transport],
        peer: &PeerId,
        now: u64,
    ) -> usize {
        let Some(idx) = transports.iter().position(|t| t.is_peer_connected(peer)) else {
            return 0;
        };
        let transport = &mut *transports[idx];

        let cooldown = self.cooldown_ms();
        let expiry = self.expiry_ms();
        let mut events = Vec::new();

        if let Some(queue) = self.outbox.queue_mut(peer) {
            let mut i = 0;
            while i < queue.len() {
                if queue[i].is_expired(now, expiry) {
                    if let Some(entry) = queue.remove(i) {
                        tracing::debug!(peer = %peer, message_id = %entry.message_id, "outbox entry expired");
                        events.push(RouterEvent::Expired {
                            peer: *peer,
                            message_id: entry.message_id,
                        });
                    }
                    continue;
                }

                let entry = &mut queue[i];
                if entry.in_cooldown(now, cooldown) {
                    i += 1;
                    continue;
                }

                match transport.send_private(peer, &entry.message_id, &entry.content) {
                    Ok(()) => {
                        entry.attempts += 1;
                        entry.last_sent_at = Some(now);
                        tracing::debug!(
                            peer = %peer,
                            message_id = %entry.message_id,
                            attempt = entry.attempts,
                            via = transport.name(),
                            "sent private message"
                        );
                        events.push(RouterEvent::Sent {
                            peer: *peer,
                            message_id: entry.message_id.clone(),
                            attempt: entry.attempts,
                            via: transport.name(),
                        });
                        i += 1;
                    }
                    Err(e) if e.is_permanent() => {
                        tracing::warn!(
                            peer = %peer,
                            message_id = %entry.message_id,
                            via = transport.name(),
                            error = %e,
                            "dropping unsendable message"
                        );
                        if let Some(entry) = queue.remove(i) {
                            events.push(RouterEvent::Dropped {
                                peer: *peer,
                                message_id: entry.message_id,
                                reason: e.to_string(),
                            });
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            peer = %peer,
                            message_id = %entry.message_id,
                            via = transport.name(),
                            error = %e,
                            "send failed; leaving outbox queued"
                        );
                        break;
                    }
                }
            }
        }
        self.outbox.prune(peer);

        let sent = events
            .iter()
            .filter(|e| matches!(e, RouterEvent::Sent { .. }))
            .count();
        for event in events {
            self.emit(event);
        }
        sent
    }

    pub fn flush_all_outbox(&mut self, transports: &mut [&mut dyn Transport]) -> usize {
        self.flush_all_outbox_at(transports, now_ms())
    }

    pub fn flush_all_outbox_at(&mut self, transports: &mut [&mut dyn Transport], now: u64) -> usize {
        self.pending_peer_ids()
            .iter()
            .map(|peer| self.flush_outbox_at(transports, peer, now))
            .sum()
    }

    /// Remove a confirmed message from whichever queue holds it.
    pub fn confirm_delivery(&mut self, message_id: &str) -> bool {
        match self.outbox.remove(message_id) {
            Some(entry) => {
                tracing::debug!(peer = %entry.destination, message_id, "delivery confirmed");
                self.emit(RouterEvent::Confirmed {
                    peer: entry.destination,
                    message_id: entry.message_id,
                });
                true
            }
            None => false,
        }
    }

    /// Forget cooldowns for `peer` so the next flush re-sends everything.
    pub fn reset_send_state(&mut self, peer: &PeerId) {
        self.outbox.reset_send_state(peer);
    }

    pub fn pending_peer_ids(&self) -> Vec<PeerId> {
        self.outbox.pending_peer_ids()
    }

    pub fn cleanup_expired(&mut self) -> usize {
        self.cleanup_expired_at(now_ms())
    }

    pub fn cleanup_expired_at(&mut self, now: u64) -> usize {
        let expired = self.outbox.take_expired(now, self.expiry_ms());
        let count = expired.len();
        for entry in expired {
            tracing::debug!(peer = %entry.destination, message_id = %entry.message_id, "outbox entry expired");
            self.emit(RouterEvent::Expired {
                peer: entry.destination,
                message_id: entry.message_id,
            });
        }
        count
    }

    pub fn send_read_receipt(
        &mut self,
        transports: &mut [&mut dyn Transport],
        peer: &PeerId,
        message_id: &str,
    ) -> Result<(), RouterError> {
        let idx = first_route(transports, peer).ok_or(RouterError::Unreachable(*peer))?;
        let transport = &mut *transports[idx];
        transport.send_read_receipt(peer, message_id)?;
        tracing::debug!(peer = %peer, message_id, via = transport.name(), "sent read receipt");
        Ok(())
    }

    pub fn send_favorite_notification(
        &mut self,
        transports: &mut [&mut dyn Transport],
        peer: &PeerId,
        is_favorite: bool,
    ) -> Result<(), RouterError> {
        let idx = first_route(transports, peer).ok_or(RouterError::Unreachable(*peer))?;
        let transport = &mut *transports[idx];
        transport.send_favorite_notification(peer, is_favorite)?;
        tracing::debug!(peer = %peer, is_favorite, via = transport.name(), "sent favorite notification");
        Ok(())
    }

    pub fn snapshot(&self) -> OutboxSnapshot {
        self.outbox.snapshot()
    }

    pub fn restore(&mut self, snapshot: OutboxSnapshot) -> usize {
        let restored = self.outbox.restore(snapshot);
        if restored > 0 {
            tracing::info!(restored, "restored outbox entries");
        }
        restored
    }
}

/// Index of the first transport reporting `peer` as connected or reachable.
fn first_route(transports: &[&mut dyn Transport], peer: &PeerId) -> Option<usize> {
    transports
        .iter()
        .position(|t| t.is_peer_connected(peer) || t.is_peer_reachable(peer))
}
