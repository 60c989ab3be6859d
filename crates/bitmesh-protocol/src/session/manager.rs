//! Per-peer session table.

use std::collections::HashMap;
use std::time::Duration;

use bitmesh_core::types::{Fingerprint, PeerId};
use bitmesh_crypto::x25519::{X25519PrivateKey, X25519PublicKey};

use super::cipher::TransportCipher;
use super::handshake::{HandshakeRole, HandshakeState, MESSAGE_1_LEN};
use crate::error::SessionError;

/// Handshakes (and failed sessions) idle longer than this are evicted.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Established sessions idle longer than this are evicted.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    None,
    Handshaking(HandshakeRole),
    Established,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub handshake_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: HANDSHAKE_TIMEOUT,
            idle_timeout: IDLE_TIMEOUT,
        }
    }
}

#[derive(Debug)]
struct Session {
    state: SessionState,
    /// In-flight handshake. For an established session this is a
    /// re-handshake; the current cipher stays in use until it completes.
    handshake: Option<HandshakeState>,
    handshake_started: u64,
    cipher: Option<TransportCipher>,
    remote_static: Option<X25519PublicKey>,
    created_at: u64,
    last_activity: u64,
}

impl Session {
    fn handshaking(handshake: HandshakeState, now: u64) -> Self {
        Self {
            state: SessionState::Handshaking(handshake.role()),
            handshake: Some(handshake),
            handshake_started: now,
            cipher: None,
            remote_static: None,
            created_at: now,
            last_activity: now,
        }
    }

    fn is_established(&self) -> bool {
        self.state == SessionState::Established && self.cipher.is_some()
    }

    /// Install a new handshake. An established session keeps its cipher.
    fn begin(&mut self, handshake: HandshakeState, now: u64) {
        if !self.is_established() {
            self.state = SessionState::Handshaking(handshake.role());
            self.last_activity = now;
        }
        self.handshake = Some(handshake);
        self.handshake_started = now;
    }

    fn awaiting_message_1(&self) -> bool {
        self.handshake
            .as_ref()
            .is_some_and(|hs| hs.expected_len() == Some(MESSAGE_1_LEN))
    }

    fn initiating(&self) -> bool {
        self.handshake
            .as_ref()
            .is_some_and(|hs| hs.role() == HandshakeRole::Initiator)
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            SessionState::None => "none",
            SessionState::Handshaking(_) => "handshake",
            SessionState::Established => "established",
            SessionState::Failed => "failed",
        }
    }

    /// Abandon the handshake. Only a session without a working cipher
    /// becomes [`SessionState::Failed`].
    fn abort_handshake(&mut self, now: u64) {
        self.handshake = None;
        if !self.is_established() {
            self.state = SessionState::Failed;
            self.cipher = None;
            self.last_activity = now;
        }
    }
}

/// Owns every session of the local identity, keyed by remote peer.
pub struct SessionManager {
    local_static: X25519PrivateKey,
    local_peer: PeerId,
    config: SessionConfig,
    sessions: HashMap<PeerId, Session>,
    completed: u64,
}

impl SessionManager {
    pub fn new(local_static: X25519PrivateKey, config: SessionConfig) -> Self {
        let local_peer = PeerId::from_static_key(&local_static.public_key().to_bytes());
        Self {
            local_static,
            local_peer,
            config,
            sessions: HashMap::new(),
            completed: 0,
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn local_fingerprint(&self) -> Fingerprint {
        Fingerprint::of_key(&self.local_static.public_key().to_bytes())
    }

    /// Handshakes completed since this manager was created, re-handshakes
    /// included.
    pub fn handshakes_completed(&self) -> u64 {
        self.completed
    }

    pub fn start_handshake(
        &mut self,
        peer: &PeerId,
        is_initiator: bool,
    ) -> Result<Option<Vec<u8>>, SessionError> {
        self.start_handshake_at(peer, is_initiator, now_ms())
    }

    /// Begin a handshake with `peer`.
    ///
    /// As initiator, returns message 1. As responder, prepares to receive
    /// message 1 and returns `None`. An established session keeps carrying
    /// traffic until the new handshake completes.
    pub fn start_handshake_at(
        &mut self,
        peer: &PeerId,
        is_initiator: bool,
        now: u64,
    ) -> Result<Option<Vec<u8>>, SessionError> {
        let static_key = self.local_static.clone();
        let (hs, message) = if is_initiator {
            let mut hs = HandshakeState::initiator(static_key);
            let message = hs.write_message()?;
            (hs, Some(message))
        } else {
            (HandshakeState::responder(static_key), None)
        };

        match self.sessions.get_mut(peer) {
            Some(session) => {
                tracing::debug!(peer = %peer, state = session.state_name(), "restarting handshake");
                session.begin(hs, now);
            }
            None => {
                self.sessions.insert(*peer, Session::handshaking(hs, now));
            }
        }
        if is_initiator {
            tracing::debug!(peer = %peer, "handshake initiated");
        } else {
            tracing::debug!(peer = %peer, "awaiting handshake as responder");
        }
        Ok(message)
    }

    pub fn process_handshake_message(
        &mut self,
        message: &[u8],
        from: &PeerId,
    ) -> Result<Option<Vec<u8>>, SessionError> {
        self.process_handshake_message_at(message, from, now_ms())
    }

    /// Advance the handshake with `from` by one message.
    ///
    /// Returns the reply to send, if this side speaks next. A message 1 from
    /// a peer with no session (or one that restarted) opens a responder.
    /// The handshake only completes if the authenticated static key hashes
    /// to `from`. A failed handshake moves a session without a working
    /// cipher to [`SessionState::Failed`]; an established session is left
    /// untouched.
    pub fn process_handshake_message_at(
        &mut self,
        message: &[u8],
        from: &PeerId,
        now: u64,
    ) -> Result<Option<Vec<u8>>, SessionError> {
        let is_message_1 = message.len() == MESSAGE_1_LEN;

        match self.sessions.get(from) {
            None if !is_message_1 => return Err(SessionError::NoSession(*from)),
            Some(session) if is_message_1 && !session.awaiting_message_1() => {
                // Both sides initiated at once: the lower peer id keeps the
                // initiator role and the other side answers its message 1.
                if session.initiating() && self.local_peer < *from {
                    tracing::debug!(peer = %from, "simultaneous handshake; keeping initiator role");
                    return Ok(None);
                }
                self.open_responder(from, now);
            }
            None => self.open_responder(from, now),
            Some(_) => {}
        }

        let Some(session) = self.sessions.get_mut(from) else {
            return Err(SessionError::NoSession(*from));
        };
        let Some(hs) = session.handshake.as_mut() else {
            return Err(SessionError::UnexpectedMessage {
                state: session.state_name(),
            });
        };

        let step = hs.read_message(message).and_then(|()| {
            if hs.is_my_turn() {
                hs.write_message().map(Some)
            } else {
                Ok(None)
            }
        });
        let reply = match step {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(peer = %from, error = %e, "handshake failed");
                session.abort_handshake(now);
                return Err(e);
            }
        };

        if !session.handshake.as_ref().is_some_and(HandshakeState::is_complete) {
            if !session.is_established() {
                session.last_activity = now;
            }
            return Ok(reply);
        }
        let Some(hs) = session.handshake.take() else {
            return Ok(reply);
        };

        let (cipher, remote_static) = match hs.into_transport() {
            Ok(keys) => keys,
            Err(e) => {
                session.abort_handshake(now);
                return Err(e);
            }
        };
        if PeerId::from_static_key(&remote_static.to_bytes()) != *from {
            tracing::warn!(
                peer = %from,
                fingerprint = %Fingerprint::of_key(&remote_static.to_bytes()),
                "handshake key does not belong to claimed peer"
            );
            session.abort_handshake(now);
            return Err(SessionError::HandshakeFailed("static key does not match peer id"));
        }

        let rekeyed = session.is_established();
        session.cipher = Some(cipher);
        session.remote_static = Some(remote_static);
        session.state = SessionState::Established;
        session.last_activity = now;
        self.completed += 1;
        tracing::info!(
            peer = %from,
            fingerprint = %Fingerprint::of_key(&remote_static.to_bytes()),
            rekeyed,
            "session established"
        );
        Ok(reply)
    }

    fn open_responder(&mut self, peer: &PeerId, now: u64) {
        let hs = HandshakeState::responder(self.local_static.clone());
        match self.sessions.get_mut(peer) {
            Some(session) => session.begin(hs, now),
            None => {
                self.sessions.insert(*peer, Session::handshaking(hs, now));
            }
        }
        tracing::debug!(peer = %peer, "inbound handshake; opened responder");
    }

    fn established_mut(&mut self, peer: &PeerId) -> Result<&mut Session, SessionError> {
        let session = self
            .sessions
            .get_mut(peer)
            .ok_or(SessionError::NoSession(*peer))?;
        if !session.is_established() {
            return Err(SessionError::NotEstablished(*peer));
        }
        Ok(session)
    }

    pub fn encrypt(&mut self, plaintext: &[u8], peer: &PeerId) -> Result<Vec<u8>, SessionError> {
        self.encrypt_at(plaintext, peer, now_ms())
    }

    pub fn encrypt_at(
        &mut self,
        plaintext: &[u8],
        peer: &PeerId,
        now: u64,
    ) -> Result<Vec<u8>, SessionError> {
        let session = self.established_mut(peer)?;
        let cipher = session
            .cipher
            .as_mut()
            .ok_or(SessionError::NotEstablished(*peer))?;
        let frame = cipher.encrypt(plaintext)?;
        session.last_activity = now;
        Ok(frame)
    }

    pub fn decrypt(&mut self, frame: &[u8], peer: &PeerId) -> Result<Vec<u8>, SessionError> {
        self.decrypt_at(frame, peer, now_ms())
    }

    /// Decrypt a transport frame from `peer`. A bad frame is rejected without
    /// tearing the session down.
    pub fn decrypt_at(
        &mut self,
        frame: &[u8],
        peer: &PeerId,
        now: u64,
    ) -> Result<Vec<u8>, SessionError> {
        let session = self.established_mut(peer)?;
        let cipher = session
            .cipher
            .as_mut()
            .ok_or(SessionError::NotEstablished(*peer))?;
        let plaintext = cipher.decrypt(frame)?;
        session.last_activity = now;
        Ok(plaintext)
    }

    pub fn remove_session(&mut self, peer: &PeerId) -> bool {
        let removed = self.sessions.remove(peer).is_some();
        if removed {
            tracing::debug!(peer = %peer, "session removed");
        }
        removed
    }

    pub fn cleanup_stale_sessions(&mut self) -> Vec<PeerId> {
        self.cleanup_stale_sessions_at(now_ms())
    }

    /// Evict handshakes and failed sessions idle past the handshake timeout,
    /// and established sessions idle past the idle timeout. A re-handshake
    /// older than the handshake timeout is dropped from an established
    /// session.
    pub fn cleanup_stale_sessions_at(&mut self, now: u64) -> Vec<PeerId> {
        let handshake_ms = self.config.handshake_timeout.as_millis() as u64;
        let idle_ms = self.config.idle_timeout.as_millis() as u64;

        let mut stale: Vec<PeerId> = self
            .sessions
            .iter()
            .filter(|(_, s)| {
                let idle = now.saturating_sub(s.last_activity);
                match s.state {
                    SessionState::Established => idle > idle_ms,
                    _ => idle > handshake_ms,
                }
            })
            .map(|(peer, _)| *peer)
            .collect();
        stale.sort();

        for peer in &stale {
            self.sessions.remove(peer);
            tracing::debug!(peer = %peer, "evicted stale session");
        }

        for (peer, session) in &mut self.sessions {
            if session.is_established()
                && session.handshake.is_some()
                && now.saturating_sub(session.handshake_started) > handshake_ms
            {
                session.handshake = None;
                tracing::debug!(peer = %peer, "abandoned stale re-handshake");
            }
        }
        stale
    }

    pub fn session_state(&self, peer: &PeerId) -> SessionState {
        self.sessions
            .get(peer)
            .map_or(SessionState::None, |s| s.state)
    }

    #[must_use]
    pub fn is_established(&self, peer: &PeerId) -> bool {
        self.session_state(peer) == SessionState::Established
    }

    /// `true` while a handshake is in flight, including a re-handshake of an
    /// established session.
    pub fn is_handshaking(&self, peer: &PeerId) -> bool {
        self.sessions
            .get(peer)
            .is_some_and(|s| s.handshake.is_some())
    }

    /// SHA-256 of the peer's authenticated static key.
    pub fn remote_fingerprint(&self, peer: &PeerId) -> Option<Fingerprint> {
        let session = self.sessions.get(peer)?;
        if session.state != SessionState::Established {
            return None;
        }
        session
            .remote_static
            .as_ref()
            .map(|key| Fingerprint::of_key(&key.to_bytes()))
    }

    pub fn established_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.state == SessionState::Established)
            .map(|(peer, _)| *peer)
            .collect();
        peers.sort();
        peers
    }

    pub fn session_created_at(&self, peer: &PeerId) -> Option<u64> {
        self.sessions.get(peer).map(|s| s.created_at)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
