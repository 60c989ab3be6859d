//! One relay's connect / serve / reconnect loop.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, client_async_tls};
use tracing::{debug, info, warn};
use url::Url;

use super::message::{ClientMessage, Filter, RelayMessage};
use super::{CONNECT_TIMEOUT, RelayEvent, RelayStatus};
use crate::error::RelayError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type Lookup = BoxFuture<'static, std::io::Result<Vec<SocketAddr>>>;

/// Host lookup run before every connect attempt.
pub(crate) type Resolver = Arc<dyn Fn(String, u16) -> Lookup + Send + Sync>;

pub(crate) fn system_resolver() -> Resolver {
    Arc::new(|host: String, port: u16| -> Lookup {
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((host.as_str(), port)).await?;
            Ok(addrs.collect())
        })
    })
}

/// A live subscription, shared by every connection so each can re-issue
/// the `REQ` after reconnecting.
pub(crate) struct Subscription {
    pub(crate) filters: Vec<Filter>,
    pub(crate) handler: mpsc::UnboundedSender<RelayEvent>,
}

pub(crate) type Subscriptions = Arc<Mutex<HashMap<String, Subscription>>>;

/// Work handed to a connection task by the pool.
#[derive(Debug)]
pub(crate) enum Command {
    /// A serialized `EVENT`; kept until it has been written to a socket.
    Publish(String),
    /// A serialized `REQ` or `CLOSE`; dropped while disconnected, since
    /// subscriptions are re-sent from the shared map on connect.
    Control(String),
}

enum SessionEnd {
    Stopped,
    Closed,
}

pub(crate) struct RelayConnection {
    url: Url,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<RelayStatus>,
    subscriptions: Subscriptions,
    pending: VecDeque<String>,
    reconnect_delay: Duration,
    stop_rx: watch::Receiver<bool>,
    resolver: Resolver,
}

impl RelayConnection {
    pub(crate) fn new(
        url: Url,
        commands: mpsc::UnboundedReceiver<Command>,
        status: watch::Sender<RelayStatus>,
        subscriptions: Subscriptions,
        reconnect_delay: Duration,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            url,
            commands,
            status,
            subscriptions,
            pending: VecDeque::new(),
            reconnect_delay,
            stop_rx,
            resolver: system_resolver(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_resolver(mut self, resolver: Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    fn set_status(&self, status: RelayStatus) {
        self.status.send_replace(status);
    }

    /// Run until the pool stops, the pool is dropped, or the host turns out
    /// not to exist. Lookup failures that may clear up are retried like any
    /// other connect error.
    pub(crate) async fn run(mut self) {
        loop {
            if *self.stop_rx.borrow() {
                break;
            }
            self.set_status(RelayStatus::Connecting);

            match self.connect().await {
                Ok(ws) => {
                    info!(relay = %self.url, "relay connected");
                    self.set_status(RelayStatus::Connected);
                    if let SessionEnd::Stopped = self.serve(ws).await {
                        break;
                    }
                    info!(
                        relay = %self.url,
                        pending = self.pending.len(),
                        "relay disconnected, reconnecting in {:?}",
                        self.reconnect_delay
                    );
                }
                Err(e) if e.is_permanent() => {
                    warn!(relay = %self.url, error = %e, "relay unusable, giving up");
                    self.set_status(RelayStatus::Dead);
                    return;
                }
                Err(e) => {
                    debug!(relay = %self.url, error = %e, "relay connect failed");
                }
            }

            self.set_status(RelayStatus::Disconnected);
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = self.stop_rx.changed() => break,
            }
        }
        self.set_status(RelayStatus::Disconnected);
    }

    async fn connect(&self) -> Result<WsStream, RelayError> {
        let host = self
            .url
            .host_str()
            .ok_or_else(|| RelayError::InvalidUrl(self.url.to_string()))?;
        let port = self
            .url
            .port_or_known_default()
            .ok_or_else(|| RelayError::InvalidUrl(self.url.to_string()))?;

        let addr = (self.resolver)(host.to_string(), port)
            .await
            .map_err(|e| RelayError::from_lookup(host, e))?
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Resolve {
                host: host.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses"),
            })?;

        let handshake = async {
            let stream = TcpStream::connect(addr).await?;
            let _ = stream.set_nodelay(true);
            let (ws, _response) = client_async_tls(self.url.as_str(), stream).await?;
            Ok::<_, RelayError>(ws)
        };
        tokio::time::timeout(CONNECT_TIMEOUT, handshake)
            .await
            .map_err(|_| RelayError::Timeout)?
    }

    /// Commands that piled up while disconnected: keep events, drop
    /// controls.
    fn absorb_backlog(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Publish(frame) = command {
                self.pending.push_back(frame);
            }
        }
    }

    fn subscription_requests(&self) -> Vec<String> {
        let subscriptions = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscriptions
            .iter()
            .filter_map(|(id, sub)| {
                ClientMessage::Req {
                    subscription_id: id.clone(),
                    filters: sub.filters.clone(),
                }
                .to_json()
                .ok()
            })
            .collect()
    }

    async fn serve(&mut self, mut ws: WsStream) -> SessionEnd {
        self.absorb_backlog();

        for request in self.subscription_requests() {
            if let Err(e) = ws.send(Message::Text(request)).await {
                debug!(relay = %self.url, error = %e, "failed to re-issue subscription");
                return SessionEnd::Closed;
            }
        }
        while let Some(frame) = self.pending.pop_front() {
            if let Err(e) = ws.send(Message::Text(frame.clone())).await {
                debug!(relay = %self.url, error = %e, "failed to flush queued event");
                self.pending.push_front(frame);
                return SessionEnd::Closed;
            }
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Publish(frame)) => {
                        if let Err(e) = ws.send(Message::Text(frame.clone())).await {
                            debug!(relay = %self.url, error = %e, "publish failed, queued for reconnect");
                            self.pending.push_back(frame);
                            return SessionEnd::Closed;
                        }
                    }
                    Some(Command::Control(frame)) => {
                        if let Err(e) = ws.send(Message::Text(frame)).await {
                            debug!(relay = %self.url, error = %e, "control write failed");
                            return SessionEnd::Closed;
                        }
                    }
                    None => {
                        let _ = ws.close(None).await;
                        return SessionEnd::Stopped;
                    }
                },
                inbound = ws.next() => match inbound {
                    Some(Ok(Message::Text(text))) => self.handle_inbound(&text),
                    Some(Ok(Message::Close(_))) | None => return SessionEnd::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(relay = %self.url, error = %e, "relay read failed");
                        return SessionEnd::Closed;
                    }
                },
                _ = self.stop_rx.changed() => {
                    let _ = ws.close(None).await;
                    return SessionEnd::Stopped;
                }
            }
        }
    }

    fn handle_inbound(&self, text: &str) {
        let message = match RelayMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(relay = %self.url, error = %e, "dropping unparseable relay message");
                return;
            }
        };

        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                let subscriptions = self
                    .subscriptions
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let Some(sub) = subscriptions.get(&subscription_id) else {
                    debug!(relay = %self.url, subscription = %subscription_id, "event for unknown subscription");
                    return;
                };
                let delivered = sub.handler.send(RelayEvent {
                    relay_url: self.url.to_string(),
                    subscription_id,
                    event,
                });
                if delivered.is_err() {
                    debug!(relay = %self.url, "subscription handler dropped");
                }
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                if accepted {
                    debug!(relay = %self.url, event_id = %event_id, "event accepted");
                } else {
                    warn!(relay = %self.url, event_id = %event_id, reason = %message, "event rejected");
                }
            }
            RelayMessage::Eose(subscription_id) => {
                debug!(relay = %self.url, subscription = %subscription_id, "end of stored events");
            }
            RelayMessage::Notice(notice) => {
                info!(relay = %self.url, notice = %notice, "relay notice");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    use super::*;

    struct Harness {
        connection: RelayConnection,
        status: watch::Receiver<RelayStatus>,
        _commands: mpsc::UnboundedSender<Command>,
        stop: watch::Sender<bool>,
    }

    fn harness(resolver: Resolver) -> Harness {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(RelayStatus::Connecting);
        let (stop, stop_rx) = watch::channel(false);
        let url = Url::parse("ws://relay.test/").unwrap();
        let connection = RelayConnection::new(
            url,
            command_rx,
            status_tx,
            Arc::default(),
            Duration::from_millis(10),
            stop_rx,
        )
        .with_resolver(resolver);
        Harness {
            connection,
            status,
            _commands: command_tx,
            stop,
        }
    }

    fn lookup_error(detail: &str) -> std::io::Error {
        std::io::Error::other(format!("failed to lookup address information: {detail}"))
    }

    #[tokio::test]
    async fn test_transient_lookup_failure_keeps_reconnecting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let _ws = accept_async(stream).await.unwrap();
            std::future::pending::<()>().await;
        });

        // Offline for the first three attempts.
        let failures = Arc::new(AtomicUsize::new(3));
        let remaining = Arc::clone(&failures);
        let resolver: Resolver = Arc::new(move |_host: String, _port: u16| -> Lookup {
            let offline = remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            Box::pin(async move {
                if offline {
                    Err(lookup_error("Temporary failure in name resolution"))
                } else {
                    Ok(vec![addr])
                }
            })
        });

        let Harness {
            connection,
            mut status,
            _commands,
            stop,
        } = harness(resolver);
        let task = tokio::spawn(connection.run());

        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| *s == RelayStatus::Connected),
        )
        .await
        .expect("relay never connected")
        .unwrap();
        assert_eq!(failures.load(Ordering::SeqCst), 0);

        stop.send_replace(true);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_nonexistent_host_marks_relay_dead() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let resolver: Resolver = Arc::new(move |_host: String, _port: u16| -> Lookup {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(lookup_error("Name or service not known")) })
        });

        let Harness {
            connection,
            status,
            _commands,
            stop: _stop,
        } = harness(resolver);
        tokio::time::timeout(Duration::from_secs(5), connection.run())
            .await
            .expect("dead relay should stop its task");
        assert_eq!(*status.borrow(), RelayStatus::Dead);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
