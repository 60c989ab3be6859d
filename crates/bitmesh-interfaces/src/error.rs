//! Error types for the interfaces layer.

/// Failure reported by a radio link.
#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("link not connected")]
    NotConnected,
    #[error("link stopped")]
    Stopped,
    #[error("transmit failed: {0}")]
    TransmitFailed(String),
}

/// Failure in the relay pool or one of its connections.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid relay url: {0}")]
    InvalidUrl(String),
    #[error("relay host {host} does not exist: {source}")]
    UnknownHost {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot resolve relay host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connect timed out")]
    Timeout,
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed relay message: {0}")]
    Malformed(&'static str),
    #[error("unknown relay: {0}")]
    UnknownRelay(String),
    #[error("relay pool is shut down")]
    Closed,
}

/// Resolver answers meaning the name does not exist (glibc and musl,
/// macOS, Windows). The standard library only reports `getaddrinfo`
/// failures as text.
const NO_SUCH_HOST: &[&str] = &[
    "Name or service not known",
    "Name does not resolve",
    "No address associated with hostname",
    "nodename nor servname provided",
    "No such host is known",
];

impl RelayError {
    /// Classify a failed host lookup. Only an authoritative "no such name"
    /// is final; anything else (no network, resolver timeout) is retried.
    pub fn from_lookup(host: &str, source: std::io::Error) -> Self {
        let message = source.to_string();
        let host = host.to_string();
        if NO_SUCH_HOST.iter().any(|m| message.contains(m)) {
            RelayError::UnknownHost { host, source }
        } else {
            RelayError::Resolve { host, source }
        }
    }

    /// Whether retrying the connection cannot help.
    pub fn is_permanent(&self) -> bool {
        matches!(self, RelayError::UnknownHost { .. } | RelayError::InvalidUrl(_))
    }
}
