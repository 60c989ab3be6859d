//! Core Node struct and async event loop.
//!
//! The node owns every piece of control-plane state (sessions, the mesh
//! relay and its duplicate filter, the router outbox, the peer directory)
//! and mutates it from a single task. Radio frames, relay events,
//! application commands and timer ticks all arrive through one
//! `tokio::select!` loop.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use bitmesh_core::constants::{MessageType, PUBLIC_KEY_SIZE, VERSION_2};
use bitmesh_core::identity::Identity;
use bitmesh_core::packet::wire::Packet;
use bitmesh_core::types::PeerId;
use bitmesh_interfaces::relay::{Filter, RelayEvent, RelayPool};
use bitmesh_interfaces::traits::{RadioEvent, RadioLink};
use bitmesh_protocol::envelope::decrypt_private_message;
use bitmesh_protocol::session::{SessionManager, SessionState};
use bitmesh_transport::dedup::BloomFilter;
use bitmesh_transport::relay::{MeshRelay, RelayAction};
use bitmesh_transport::router::{Router, RouterEvent, SendOutcome, Transport, now_ms};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::mesh_transport::{MeshTransport, transmit};
use crate::error::PayloadError;
use crate::payload::{MAX_MESSAGE_ID_LEN, Payload, check_message};
use crate::peers::{PeerDirectory, build_announce, parse_public_key};
use crate::relay_transport::RelayTransport;
use crate::storage::Storage;

/// How many message ids and gift-wrap ids are remembered for duplicate
/// suppression.
const RECENT_ID_CAPACITY: usize = 4096;

/// How far back the gift-wrap subscription asks relays to replay.
const SUBSCRIPTION_LOOKBACK_SECS: u64 = 24 * 60 * 60;

/// Work requested by the application through a [`NodeHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeCommand {
    SendPrivate {
        peer: PeerId,
        message_id: String,
        content: Vec<u8>,
    },
    SendReadReceipt {
        peer: PeerId,
        message_id: String,
    },
    SendFavorite {
        peer: PeerId,
        is_favorite: bool,
    },
    SendBroadcast {
        message_id: String,
        content: Vec<u8>,
    },
    ConfirmDelivery {
        message_id: String,
    },
    Announce,
}

/// Things the application should know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    MessageReceived {
        from: PeerId,
        message_id: String,
        content: Vec<u8>,
        via: &'static str,
    },
    /// A signed public message flooded across the mesh.
    BroadcastReceived {
        from: PeerId,
        message_id: String,
        content: Vec<u8>,
    },
    ReadReceipt {
        from: PeerId,
        message_id: String,
    },
    FavoriteChanged {
        from: PeerId,
        is_favorite: bool,
    },
    PeerAnnounced {
        peer: PeerId,
        nickname: Option<String>,
    },
    PeerLeft {
        peer: PeerId,
    },
    SessionEstablished {
        peer: PeerId,
    },
    Router(RouterEvent),
}

/// Cloneable front for a running [`Node`].
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::UnboundedSender<NodeCommand>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl NodeHandle {
    fn command(&self, command: NodeCommand) -> Result<(), NodeError> {
        self.commands.send(command).map_err(|_| NodeError::Stopped)
    }

    /// Queue a private message. Ids over 255 bytes and bodies too large for
    /// one mesh packet are refused here rather than stuck in the outbox.
    pub fn send_private(
        &self,
        peer: PeerId,
        message_id: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Result<(), NodeError> {
        let (message_id, content) = (message_id.into(), content.into());
        check_message(&message_id, &content)?;
        self.command(NodeCommand::SendPrivate {
            peer,
            message_id,
            content,
        })
    }

    /// Flood a signed public message to every peer on the mesh.
    pub fn send_broadcast(
        &self,
        message_id: impl Into<String>,
        content: impl Into<Vec<u8>>,
    ) -> Result<(), NodeError> {
        let (message_id, content) = (message_id.into(), content.into());
        check_message(&message_id, &content)?;
        self.command(NodeCommand::SendBroadcast {
            message_id,
            content,
        })
    }

    pub fn send_read_receipt(
        &self,
        peer: PeerId,
        message_id: impl Into<String>,
    ) -> Result<(), NodeError> {
        let message_id = message_id.into();
        if message_id.len() > MAX_MESSAGE_ID_LEN {
            return Err(PayloadError::IdTooLong.into());
        }
        self.command(NodeCommand::SendReadReceipt { peer, message_id })
    }

    pub fn send_favorite(&self, peer: PeerId, is_favorite: bool) -> Result<(), NodeError> {
        self.command(NodeCommand::SendFavorite { peer, is_favorite })
    }

    pub fn confirm_delivery(&self, message_id: impl Into<String>) -> Result<(), NodeError> {
        self.command(NodeCommand::ConfirmDelivery {
            message_id: message_id.into(),
        })
    }

    pub fn announce(&self) -> Result<(), NodeError> {
        self.command(NodeCommand::Announce)
    }

    /// Make [`Node::run`] return.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Bounded set of recently seen ids, oldest evicted first.
struct RecentIds {
    order: VecDeque<String>,
    set: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            set: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// `true` if `id` was not seen before.
    fn insert(&mut self, id: String) -> bool {
        if self.set.contains(&id) {
            return false;
        }
        if self.order.len() >= self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.set.remove(&oldest);
        }
        self.order.push_back(id.clone());
        self.set.insert(id);
        true
    }
}

/// A bitmesh node: one identity, one radio, a relay pool.
pub struct Node {
    config: NodeConfig,
    identity: Identity,
    sessions: SessionManager,
    mesh: MeshRelay,
    router: Router,
    router_events: mpsc::UnboundedReceiver<RouterEvent>,
    radio: Box<dyn RadioLink>,
    radio_events: mpsc::UnboundedReceiver<RadioEvent>,
    relays: RelayPool,
    relay_tx: mpsc::UnboundedSender<RelayEvent>,
    relay_rx: mpsc::UnboundedReceiver<RelayEvent>,
    subscription: Option<String>,
    peers: PeerDirectory,
    storage: Option<Storage>,
    seen_messages: RecentIds,
    seen_wraps: RecentIds,
    command_tx: mpsc::UnboundedSender<NodeCommand>,
    command_rx: mpsc::UnboundedReceiver<NodeCommand>,
    event_tx: mpsc::UnboundedSender<NodeEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<NodeEvent>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    started: bool,
}

impl Node {
    /// Open storage per the config, load or create the identity, and build
    /// the node. Storage problems are logged and the node runs without it.
    pub async fn open(
        config: NodeConfig,
        radio: Box<dyn RadioLink>,
        radio_events: mpsc::UnboundedReceiver<RadioEvent>,
    ) -> Result<Self, NodeError> {
        let storage = if config.node.enable_storage {
            let result = match config.storage_path() {
                Some(path) => Storage::new(path),
                None => Storage::default_path(),
            };
            match result {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!("failed to initialize storage: {e}");
                    None
                }
            }
        } else {
            None
        };

        let identity = match &storage {
            Some(storage) => match storage.load_or_generate_identity().await {
                Ok(identity) => identity,
                Err(e) => {
                    tracing::warn!("failed to load identity, using an ephemeral one: {e}");
                    Identity::generate()
                }
            },
            None => Identity::generate(),
        };

        let mut node = Self::with_identity(config, identity, radio, radio_events)?;
        node.storage = storage;
        Ok(node)
    }

    /// Build a node around an existing identity, without storage.
    pub fn with_identity(
        config: NodeConfig,
        identity: Identity,
        radio: Box<dyn RadioLink>,
        radio_events: mpsc::UnboundedReceiver<RadioEvent>,
    ) -> Result<Self, NodeError> {
        let static_key = identity
            .x25519_private()
            .ok_or_else(|| NodeError::Identity("node identity has no private key".into()))?
            .clone();
        let sessions = SessionManager::new(static_key, config.session_config());

        let filter = if config.filter.expected_items == 0 {
            BloomFilter::adaptive(0)
        } else {
            BloomFilter::new(config.filter.expected_items, config.filter.false_positive_rate)
        };
        let mesh = MeshRelay::new(identity.peer_id(), filter);

        let (router_tx, router_events) = mpsc::unbounded_channel();
        let router = Router::new(config.router_config(), Some(router_tx));

        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            identity,
            sessions,
            mesh,
            router,
            router_events,
            radio,
            radio_events,
            relays: RelayPool::new(),
            relay_tx,
            relay_rx,
            subscription: None,
            peers: PeerDirectory::new(),
            storage: None,
            seen_messages: RecentIds::new(RECENT_ID_CAPACITY),
            seen_wraps: RecentIds::new(RECENT_ID_CAPACITY),
            command_tx,
            command_rx,
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            started: false,
        })
    }

    pub fn handle(&self) -> NodeHandle {
        NodeHandle {
            commands: self.command_tx.clone(),
            shutdown: Arc::clone(&self.shutdown_tx),
        }
    }

    /// The application event stream. Only the first call returns it.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<NodeEvent>> {
        self.event_rx.take()
    }

    pub fn local_peer(&self) -> PeerId {
        self.identity.peer_id()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.identity.public_key_bytes())
    }

    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    pub fn relay_pool(&self) -> &RelayPool {
        &self.relays
    }

    pub fn session_state(&self, peer: &PeerId) -> SessionState {
        self.sessions.session_state(peer)
    }

    /// Unconfirmed messages across every peer.
    pub fn pending_messages(&self) -> usize {
        self.router.outbox().len()
    }

    /// Add a contact whose key was obtained out of band, so it can be
    /// reached over relays before it is ever heard on the mesh.
    pub fn add_peer(
        &mut self,
        public_key: &[u8; PUBLIC_KEY_SIZE],
        nickname: Option<String>,
    ) -> Result<PeerId, NodeError> {
        let (peer, _) = self
            .peers
            .learn(public_key, nickname, now_ms())
            .map_err(|e| NodeError::Identity(e.to_string()))?;
        Ok(peer)
    }

    /// Restore persisted state, connect relays, subscribe for our gift
    /// wraps and announce ourselves.
    pub async fn start(&mut self) -> Result<(), NodeError> {
        if self.started {
            return Err(NodeError::AlreadyRunning);
        }

        if let Some(ref storage) = self.storage {
            match storage.load_outbox().await {
                Ok(snapshot) => {
                    self.router.restore(snapshot);
                }
                Err(e) => tracing::warn!("failed to load outbox: {e}"),
            }
            match storage.load_peers().await {
                Ok(peers) => {
                    let added = self.peers.merge(peers);
                    if added > 0 {
                        tracing::info!("loaded {added} known peer(s)");
                    }
                }
                Err(e) => tracing::warn!("failed to load peers: {e}"),
            }
        }

        let urls = self.config.relay_urls();
        if !urls.is_empty() {
            if let Err(e) = self.relays.connect(urls.as_slice()) {
                tracing::warn!("some relays were not added: {e}");
            }
            let since = (now_ms() / 1000).saturating_sub(SUBSCRIPTION_LOOKBACK_SECS);
            let filter = Filter::gift_wraps_for(&self.public_key_hex()).since(since);
            self.subscription = Some(self.relays.subscribe(vec![filter], self.relay_tx.clone())?);
        }

        self.announce();
        self.started = true;
        tracing::info!(
            peer = %self.local_peer(),
            relays = self.relays.relay_count(),
            "node started"
        );
        Ok(())
    }

    /// Run the main event loop. Returns when shutdown is signalled.
    pub async fn run(&mut self) {
        if *self.shutdown_rx.borrow() {
            return;
        }

        let mut flush_interval =
            tokio::time::interval(Duration::from_millis(self.config.router.flush_interval_ms));
        let mut maintenance_interval = tokio::time::interval(Duration::from_secs(
            self.config.filter.maintenance_interval_secs,
        ));

        let announce_secs = self.config.node.announce_interval_secs;
        let announce_enabled = announce_secs > 0;
        let mut announce_interval = tokio::time::interval(Duration::from_secs(if announce_enabled {
            announce_secs
        } else {
            3600
        }));

        let persist_secs = self.config.node.persist_interval_secs;
        let persist_enabled = persist_secs > 0 && self.storage.is_some();
        let mut persist_interval = tokio::time::interval(Duration::from_secs(if persist_enabled {
            persist_secs
        } else {
            3600
        }));

        // Don't fire immediately
        flush_interval.tick().await;
        maintenance_interval.tick().await;
        announce_interval.tick().await;
        persist_interval.tick().await;

        tracing::info!("entering event loop");

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    tracing::info!("shutdown signal received");
                    break;
                }

                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command);
                }

                Some(event) = self.radio_events.recv() => {
                    self.handle_radio_event(event);
                }

                Some(event) = self.relay_rx.recv() => {
                    self.handle_relay_event(event);
                }

                Some(event) = self.router_events.recv() => {
                    self.emit(NodeEvent::Router(event));
                }

                _ = flush_interval.tick() => {
                    self.flush_all();
                }

                _ = maintenance_interval.tick() => {
                    self.run_maintenance();
                }

                _ = announce_interval.tick(), if announce_enabled => {
                    self.announce();
                }

                _ = persist_interval.tick(), if persist_enabled => {
                    self.persist_state().await;
                }
            }
        }
    }

    /// Signal the node to shut down.
    pub fn trigger_shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Say goodbye on the mesh, persist state and close relay sockets.
    pub async fn shutdown(mut self) {
        tracing::info!("shutting down node");
        self.trigger_shutdown();

        if self.started {
            self.send_leave();
        }
        self.persist_state().await;

        if let Some(id) = self.subscription.take() {
            self.relays.unsubscribe(&id);
        }
        self.relays.shutdown().await;

        tracing::info!("node shutdown complete");
    }

    fn emit(&self, event: NodeEvent) {
        if self.event_tx.send(event).is_err() {
            tracing::trace!("node event receiver dropped");
        }
    }

    /// Run `f` with the router and the transports in preference order:
    /// mesh first, relays second.
    fn route<R>(&mut self, f: impl FnOnce(&mut Router, &mut [&mut dyn Transport]) -> R) -> R {
        let mut mesh = MeshTransport::new(
            &mut self.sessions,
            &mut self.mesh,
            self.radio.as_ref(),
            self.config.node.ttl,
        );
        let mut relay = RelayTransport::new(&self.identity, &self.relays, &self.peers);
        let mut transports: [&mut dyn Transport; 2] = [&mut mesh, &mut relay];
        f(&mut self.router, &mut transports)
    }

    fn handle_command(&mut self, command: NodeCommand) {
        match command {
            NodeCommand::SendPrivate {
                peer,
                message_id,
                content,
            } => {
                self.send_private(peer, &message_id, &content);
            }
            NodeCommand::SendReadReceipt { peer, message_id } => {
                let result =
                    self.route(|router, transports| router.send_read_receipt(transports, &peer, &message_id));
                if let Err(e) = result {
                    tracing::warn!(peer = %peer, message_id = %message_id, "read receipt not sent: {e}");
                }
            }
            NodeCommand::SendFavorite { peer, is_favorite } => {
                let result = self.route(|router, transports| {
                    router.send_favorite_notification(transports, &peer, is_favorite)
                });
                if let Err(e) = result {
                    tracing::warn!(peer = %peer, "favorite notification not sent: {e}");
                }
            }
            NodeCommand::SendBroadcast {
                message_id,
                content,
            } => self.send_broadcast(message_id, content),
            NodeCommand::ConfirmDelivery { message_id } => {
                self.router.confirm_delivery(&message_id);
            }
            NodeCommand::Announce => self.announce(),
        }
    }

    fn send_private(&mut self, peer: PeerId, message_id: &str, content: &[u8]) -> SendOutcome {
        self.ensure_session(&peer);
        self.route(|router, transports| router.send_private(transports, &peer, message_id, content))
    }

    fn send_broadcast(&mut self, message_id: String, content: Vec<u8>) {
        let payload = Payload::Message {
            message_id,
            content,
        };
        let body = match payload.encode() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("broadcast not sent: {e}");
                return;
            }
        };
        let oversized = body.len() > u16::MAX as usize;
        let mut packet = Packet::new(MessageType::Message, self.local_peer(), body)
            .with_timestamp(now_ms())
            .with_ttl(self.config.node.ttl);
        if oversized {
            packet = packet.with_version(VERSION_2);
        }
        let Some(key) = self.identity.ed25519_private() else {
            tracing::warn!("broadcast not sent: no signing key");
            return;
        };
        if let Err(e) = packet.sign(key) {
            tracing::warn!("broadcast not signed: {e}");
            return;
        }
        match transmit(&mut self.mesh, self.radio.as_ref(), &packet) {
            Ok(()) => tracing::debug!("broadcast sent"),
            Err(e) => tracing::debug!("broadcast not sent: {e}"),
        }
    }

    /// Start a handshake if the peer is on the mesh and has no session.
    fn ensure_session(&mut self, peer: &PeerId) {
        let on_mesh = self.radio.is_connected(peer) || self.radio.is_reachable(peer);
        if on_mesh
            && matches!(
                self.sessions.session_state(peer),
                SessionState::None | SessionState::Failed
            )
        {
            self.initiate_handshake(peer);
        }
    }

    fn initiate_handshake(&mut self, peer: &PeerId) {
        match self.sessions.start_handshake_at(peer, true, now_ms()) {
            Ok(Some(message)) => {
                self.send_mesh_packet(peer, MessageType::NoiseHandshakeInit, message);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(peer = %peer, "failed to start handshake: {e}"),
        }
    }

    fn send_mesh_packet(&mut self, peer: &PeerId, message_type: MessageType, payload: Vec<u8>) {
        let packet = Packet::new(message_type, self.local_peer(), payload)
            .with_recipient(*peer)
            .with_timestamp(now_ms())
            .with_ttl(self.config.node.ttl);
        if let Err(e) = transmit(&mut self.mesh, self.radio.as_ref(), &packet) {
            tracing::warn!(peer = %peer, ?message_type, "mesh transmit failed: {e}");
        }
    }

    fn announce(&mut self) {
        let packet = match build_announce(
            &self.identity,
            self.config.node.nickname.as_deref(),
            self.config.node.ttl,
            now_ms(),
        ) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("failed to build announce: {e}");
                return;
            }
        };
        match transmit(&mut self.mesh, self.radio.as_ref(), &packet) {
            Ok(()) => tracing::debug!("announced"),
            Err(e) => tracing::debug!("announce not sent: {e}"),
        }
    }

    fn send_leave(&mut self) {
        let mut packet = Packet::new(MessageType::Leave, self.local_peer(), Vec::new())
            .with_timestamp(now_ms())
            .with_ttl(self.config.node.ttl);
        let signed = match self.identity.ed25519_private() {
            Some(key) => packet.sign(key).is_ok(),
            None => false,
        };
        if signed && let Err(e) = transmit(&mut self.mesh, self.radio.as_ref(), &packet) {
            tracing::debug!("leave not sent: {e}");
        }
    }

    fn handle_radio_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::PeerConnected(peer) => {
                tracing::debug!(peer = %peer, "radio peer connected");
                // The lower id opens the handshake; the other side waits.
                if self.local_peer() < peer {
                    self.ensure_session(&peer);
                }
                self.announce();
            }
            RadioEvent::PeerDisconnected(peer) => {
                tracing::debug!(peer = %peer, "radio peer disconnected");
            }
            RadioEvent::FrameReceived { data, from } => self.handle_frame(&data, from),
        }
    }

    fn handle_frame(&mut self, data: &[u8], from: Option<PeerId>) {
        let actions = match self.mesh.process_inbound(data) {
            Ok(actions) => actions,
            Err(reason) => {
                tracing::trace!(from = ?from, ?reason, "frame dropped");
                return;
            }
        };
        for action in actions {
            match action {
                RelayAction::Rebroadcast(bytes) => {
                    if let Err(e) = self.radio.send(&bytes, None) {
                        tracing::debug!("rebroadcast failed: {e}");
                    }
                }
                RelayAction::Deliver(packet) => self.handle_packet(packet),
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) {
        let addressed_to_us = packet.recipient == Some(self.local_peer());
        match packet.message_type {
            MessageType::Announce => self.handle_announce(&packet),
            MessageType::Leave => self.handle_leave(&packet),
            ty if ty.is_handshake() && addressed_to_us => self.handle_handshake(packet),
            MessageType::NoiseEncrypted if addressed_to_us => self.handle_encrypted(packet),
            MessageType::Message if packet.is_broadcast() => self.handle_broadcast(&packet),
            other => {
                tracing::trace!(sender = %packet.sender, message_type = ?other, "ignoring packet");
            }
        }
    }

    fn handle_announce(&mut self, packet: &Packet) {
        match self.peers.record_announce(packet, now_ms()) {
            Ok((peer, true)) => {
                let nickname = self.peers.nickname(&peer).map(str::to_string);
                tracing::info!(peer = %peer, nickname = ?nickname, "peer announced");
                self.emit(NodeEvent::PeerAnnounced { peer, nickname });
            }
            Ok((_, false)) => {}
            Err(e) => tracing::debug!(sender = %packet.sender, "rejected announce: {e}"),
        }
    }

    fn handle_leave(&mut self, packet: &Packet) {
        let peer = packet.sender;
        let Some(identity) = self.peers.identity(&peer) else {
            tracing::trace!(peer = %peer, "leave from unknown peer");
            return;
        };
        if !packet.verify(identity.ed25519_public()) {
            tracing::debug!(peer = %peer, "leave with bad signature");
            return;
        }
        self.sessions.remove_session(&peer);
        tracing::info!(peer = %peer, "peer left");
        self.emit(NodeEvent::PeerLeft { peer });
    }

    /// Public messages must be signed by a peer whose key we know.
    fn handle_broadcast(&mut self, packet: &Packet) {
        let from = packet.sender;
        let Some(identity) = self.peers.identity(&from) else {
            tracing::trace!(peer = %from, "broadcast from unknown peer");
            return;
        };
        if !packet.verify(identity.ed25519_public()) {
            tracing::debug!(peer = %from, "broadcast with bad signature");
            return;
        }
        let (message_id, content) = match Payload::decode(&packet.payload) {
            Ok(Payload::Message {
                message_id,
                content,
            }) => (message_id, content),
            Ok(other) => {
                tracing::debug!(peer = %from, message_type = ?other.message_type(), "unexpected broadcast payload");
                return;
            }
            Err(e) => {
                tracing::debug!(peer = %from, "malformed broadcast: {e}");
                return;
            }
        };
        if !self.seen_messages.insert(format!("broadcast/{from}/{message_id}")) {
            return;
        }
        tracing::debug!(peer = %from, message_id = %message_id, "broadcast received");
        self.emit(NodeEvent::BroadcastReceived {
            from,
            message_id,
            content,
        });
    }

    fn handle_handshake(&mut self, packet: Packet) {
        let peer = packet.sender;
        let completed = self.sessions.handshakes_completed();
        let reply = match self
            .sessions
            .process_handshake_message_at(&packet.payload, &peer, now_ms())
        {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(peer = %peer, "handshake message rejected: {e}");
                return;
            }
        };

        if let Some(reply) = reply {
            let reply_type = match packet.message_type {
                MessageType::NoiseHandshakeInit => MessageType::NoiseHandshakeResponse,
                _ => MessageType::NoiseHandshakeFinish,
            };
            self.send_mesh_packet(&peer, reply_type, reply);
        }

        if self.sessions.handshakes_completed() != completed {
            self.on_session_established(peer);
        }
    }

    fn on_session_established(&mut self, peer: PeerId) {
        self.emit(NodeEvent::SessionEstablished { peer });
        self.router.reset_send_state(&peer);
        let sent = self.route(|router, transports| router.flush_outbox(transports, &peer));
        if sent > 0 {
            tracing::debug!(peer = %peer, sent, "flushed outbox on new session");
        }
    }

    fn handle_encrypted(&mut self, packet: Packet) {
        let peer = packet.sender;
        let plaintext = match self.sessions.decrypt_at(&packet.payload, &peer, now_ms()) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::debug!(peer = %peer, "dropping undecryptable frame: {e}");
                return;
            }
        };
        match Payload::decode(&plaintext) {
            Ok(payload) => self.handle_payload(peer, payload, "mesh"),
            Err(e) => tracing::debug!(peer = %peer, "malformed mesh payload: {e}"),
        }
    }

    fn handle_relay_event(&mut self, relay_event: RelayEvent) {
        let RelayEvent {
            relay_url, event, ..
        } = relay_event;
        if !self.seen_wraps.insert(event.id.clone()) {
            tracing::trace!(relay = %relay_url, wrap_id = %event.id, "duplicate gift wrap");
            return;
        }

        let message = match decrypt_private_message(&event, &self.identity) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(relay = %relay_url, wrap_id = %event.id, "dropping gift wrap: {e}");
                return;
            }
        };
        let peer = match parse_public_key(&message.sender_pubkey)
            .and_then(|key| self.peers.learn(&key, None, now_ms()))
        {
            Ok((peer, _)) => peer,
            Err(e) => {
                tracing::debug!(relay = %relay_url, "bad sender key in gift wrap: {e}");
                return;
            }
        };
        match Payload::from_relay_content(&message.content) {
            Ok(payload) => self.handle_payload(peer, payload, "relay"),
            Err(e) => tracing::debug!(peer = %peer, "malformed relay payload: {e}"),
        }
    }

    fn handle_payload(&mut self, from: PeerId, payload: Payload, via: &'static str) {
        match payload {
            Payload::Message {
                message_id,
                content,
            } => {
                if self.seen_messages.insert(format!("{from}/{message_id}")) {
                    tracing::debug!(peer = %from, message_id = %message_id, via, "private message received");
                    self.emit(NodeEvent::MessageReceived {
                        from,
                        message_id: message_id.clone(),
                        content,
                        via,
                    });
                } else {
                    tracing::debug!(peer = %from, message_id = %message_id, "duplicate message, re-acking");
                }
                self.send_ack(&from, message_id);
            }
            Payload::DeliveryAck { message_id } => {
                let pending = self
                    .router
                    .outbox()
                    .queue(&from)
                    .is_some_and(|q| q.iter().any(|e| e.message_id == message_id));
                if pending {
                    self.router.confirm_delivery(&message_id);
                } else {
                    tracing::trace!(peer = %from, message_id = %message_id, "ack for unknown message");
                }
            }
            Payload::ReadReceipt { message_id } => {
                self.emit(NodeEvent::ReadReceipt { from, message_id });
            }
            Payload::Favorite { is_favorite } => {
                self.emit(NodeEvent::FavoriteChanged { from, is_favorite });
            }
        }
    }

    /// Acks are not queued: a lost ack is repaired by the sender's next
    /// resend, which is acked again.
    fn send_ack(&mut self, peer: &PeerId, message_id: String) {
        let ack = Payload::DeliveryAck { message_id };
        let mut mesh = MeshTransport::new(
            &mut self.sessions,
            &mut self.mesh,
            self.radio.as_ref(),
            self.config.node.ttl,
        );
        let result = if mesh.is_peer_reachable(peer) {
            mesh.send_payload(peer, &ack)
        } else {
            RelayTransport::new(&self.identity, &self.relays, &self.peers).send_payload(peer, &ack)
        };
        if let Err(e) = result {
            tracing::debug!(peer = %peer, "delivery ack not sent: {e}");
        }
    }

    fn flush_all(&mut self) {
        let sent = self.route(|router, transports| router.flush_all_outbox(transports));
        if sent > 0 {
            tracing::debug!(sent, "outbox flush");
        }
    }

    /// Evict stale sessions, expire old outbox entries, keep the duplicate
    /// filter sized, and retry handshakes for peers with queued messages.
    fn run_maintenance(&mut self) {
        let evicted = self.sessions.cleanup_stale_sessions_at(now_ms());
        if !evicted.is_empty() {
            tracing::debug!(count = evicted.len(), "evicted stale sessions");
        }
        self.router.cleanup_expired();

        if self.config.filter.expected_items == 0 {
            let peer_count = self.radio.reachable_peers().len();
            self.mesh.maintain(peer_count);
        } else {
            self.mesh.filter_mut().maybe_rotate();
        }

        for peer in self.router.pending_peer_ids() {
            self.ensure_session(&peer);
        }
    }

    /// Persist the outbox and peer directory to storage.
    async fn persist_state(&self) {
        if let Some(ref storage) = self.storage {
            if let Err(e) = storage.save_outbox(&self.router.snapshot()).await {
                tracing::warn!("failed to persist outbox: {e}");
            }
            if let Err(e) = storage.save_peers(&self.peers).await {
                tracing::warn!("failed to persist peers: {e}");
            }
            tracing::debug!("persisted state to storage");
        }
    }
}
