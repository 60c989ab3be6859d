//! The set of relays the node publishes to and subscribes on.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bitmesh_protocol::envelope::Event;
use rand::RngCore;
use tokio::sync::{mpsc, watch};
use url::Url;

use super::connection::{Command, RelayConnection, Subscription, Subscriptions};
use super::message::{ClientMessage, Filter};
use super::{RECONNECT_DELAY, RelayEvent, RelayStatus};
use crate::error::RelayError;
use crate::shutdown::ShutdownToken;

struct RelayHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<RelayStatus>,
}

/// WebSocket connections to a set of relays.
///
/// Every method except [`shutdown`](Self::shutdown) is synchronous and
/// only enqueues work for the per-relay tasks, so the node's control loop
/// can call them while holding its state. Relays must be added from
/// inside a tokio runtime.
pub struct RelayPool {
    relays: HashMap<String, RelayHandle>,
    subscriptions: Subscriptions,
    shutdown: ShutdownToken,
    reconnect_delay: Duration,
}

/// Parse a relay URL, accepting only `ws` and `wss`.
pub fn normalize_url(url: &str) -> Result<Url, RelayError> {
    let parsed = Url::parse(url).map_err(|_| RelayError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(RelayError::InvalidUrl(url.to_string())),
    }
}

impl RelayPool {
    pub fn new() -> Self {
        Self::with_reconnect_delay(RECONNECT_DELAY)
    }

    pub fn with_reconnect_delay(reconnect_delay: Duration) -> Self {
        Self {
            relays: HashMap::new(),
            subscriptions: Arc::default(),
            shutdown: ShutdownToken::new(),
            reconnect_delay,
        }
    }

    /// Start a connection task for `url`. Adding a relay twice is a no-op.
    pub fn add_relay(&mut self, url: &str) -> Result<(), RelayError> {
        if self.shutdown.is_stopped() {
            return Err(RelayError::Closed);
        }
        let url = normalize_url(url)?;
        let key = url.to_string();
        if self.relays.contains_key(&key) {
            return Ok(());
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(RelayStatus::Connecting);
        let connection = RelayConnection::new(
            url,
            command_rx,
            status_tx,
            Arc::clone(&self.subscriptions),
            self.reconnect_delay,
            self.shutdown.subscribe(),
        );
        self.shutdown.add_task(tokio::spawn(connection.run()));

        tracing::debug!(relay = %key, "relay added");
        self.relays.insert(
            key,
            RelayHandle {
                commands: command_tx,
                status: status_rx,
            },
        );
        Ok(())
    }

    /// Add every URL, returning the first error after trying them all.
    pub fn connect<S: AsRef<str>>(&mut self, urls: &[S]) -> Result<(), RelayError> {
        let mut first_error = None;
        for url in urls {
            if let Err(e) = self.add_relay(url.as_ref()) {
                tracing::warn!(relay = %url.as_ref(), error = %e, "skipping relay");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Publish `event` to `relay_urls`, or to every relay when `None`.
    ///
    /// Connected relays get it immediately; the others hold it until they
    /// connect. Returns how many relays the event was queued for.
    pub fn send_event(
        &self,
        event: &Event,
        relay_urls: Option<&[String]>,
    ) -> Result<usize, RelayError> {
        let frame = ClientMessage::Event(event.clone()).to_json()?;
        let targets: Vec<&RelayHandle> = match relay_urls {
            None => self.relays.values().collect(),
            Some(urls) => urls
                .iter()
                .map(|u| {
                    let key = normalize_url(u)?.to_string();
                    self.relays.get(&key).ok_or(RelayError::UnknownRelay(key))
                })
                .collect::<Result<_, _>>()?,
        };

        let queued = targets
            .into_iter()
            .filter(|relay| relay.commands.send(Command::Publish(frame.clone())).is_ok())
            .count();
        tracing::debug!(event_id = %event.id, relays = queued, "event queued");
        Ok(queued)
    }

    /// Subscribe on every relay. Matching events arrive on `handler`. The
    /// `REQ` is re-sent each time a relay reconnects.
    pub fn subscribe(
        &self,
        filters: Vec<Filter>,
        handler: mpsc::UnboundedSender<RelayEvent>,
    ) -> Result<String, RelayError> {
        let mut id_bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        let subscription_id = hex::encode(id_bytes);

        let frame = ClientMessage::Req {
            subscription_id: subscription_id.clone(),
            filters: filters.clone(),
        }
        .to_json()?;
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subscription_id.clone(), Subscription { filters, handler });
        self.broadcast(Command::Control, &frame);
        Ok(subscription_id)
    }

    /// Drop a subscription and send `CLOSE`. Returns `false` if unknown.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let removed = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(subscription_id)
            .is_some();
        if removed
            && let Ok(frame) = ClientMessage::Close(subscription_id.to_string()).to_json()
        {
            self.broadcast(Command::Control, &frame);
        }
        removed
    }

    fn broadcast(&self, make: fn(String) -> Command, frame: &str) {
        for relay in self.relays.values() {
            let _ = relay.commands.send(make(frame.to_string()));
        }
    }

    pub fn relay_status(&self, url: &str) -> Option<RelayStatus> {
        let key = normalize_url(url).ok()?.to_string();
        self.relays.get(&key).map(|r| *r.status.borrow())
    }

    /// A receiver that observes status changes of one relay.
    pub fn watch_status(&self, url: &str) -> Option<watch::Receiver<RelayStatus>> {
        let key = normalize_url(url).ok()?.to_string();
        self.relays.get(&key).map(|r| r.status.clone())
    }

    /// URLs of relays with an open socket, sorted.
    pub fn connected_relays(&self) -> Vec<String> {
        let mut urls: Vec<String> = self
            .relays
            .iter()
            .filter(|(_, r)| *r.status.borrow() == RelayStatus::Connected)
            .map(|(url, _)| url.clone())
            .collect();
        urls.sort();
        urls
    }

    pub fn is_connected(&self) -> bool {
        self.relays
            .values()
            .any(|r| *r.status.borrow() == RelayStatus::Connected)
    }

    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Close every socket and wait for the connection tasks to finish.
    pub async fn shutdown(&self) {
        self.shutdown.stop_and_join().await;
    }
}

impl Default for RelayPool {
    fn default() -> Self {
        Self::new()
    }
}
