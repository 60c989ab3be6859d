//! TOML configuration for a bitmesh node.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use bitmesh_core::constants::DEFAULT_TTL;
use bitmesh_protocol::session::SessionConfig;
use bitmesh_transport::router::RouterConfig;

use crate::error::NodeError;

/// Top-level node configuration. Every field has a default, so an empty
/// file is a valid config.
#[derive(Debug, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub router: RouterSection,
    #[serde(default)]
    pub filter: FilterSection,
    #[serde(default)]
    pub relays: Vec<RelayEntry>,
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NodeError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    pub fn parse(s: &str) -> Result<Self, NodeError> {
        let config: Self =
            toml::from_str(s).map_err(|e| NodeError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), NodeError> {
        if self.node.ttl == 0 {
            return Err(NodeError::Config("node.ttl must be at least 1".into()));
        }
        let p = self.filter.false_positive_rate;
        if !(p > 0.0 && p < 1.0) {
            return Err(NodeError::Config(format!(
                "filter.false_positive_rate must be in (0, 1), got {p}"
            )));
        }
        if self.router.flush_interval_ms == 0 || self.filter.maintenance_interval_secs == 0 {
            return Err(NodeError::Config("timer intervals must be non-zero".into()));
        }
        Ok(())
    }

    /// URLs of the `[[relays]]` entries that are enabled.
    pub fn relay_urls(&self) -> Vec<String> {
        self.relays
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.url.clone())
            .collect()
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            handshake_timeout: Duration::from_secs(self.session.handshake_timeout_secs),
            idle_timeout: Duration::from_secs(self.session.idle_timeout_secs),
        }
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            resend_cooldown: Duration::from_millis(self.router.resend_cooldown_ms),
            message_expiry: Duration::from_secs(self.router.message_expiry_secs),
        }
    }

    pub fn storage_path(&self) -> Option<PathBuf> {
        self.node.storage_path.as_ref().map(PathBuf::from)
    }
}

/// The `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Sent in announces; peers show it next to the fingerprint.
    pub nickname: Option<String>,
    /// Hop budget for packets this node originates.
    pub ttl: u8,
    /// Storage directory. Defaults to `~/.bitmesh`.
    pub storage_path: Option<String>,
    pub enable_storage: bool,
    /// Seconds between outbox snapshots. 0 disables periodic persistence.
    pub persist_interval_secs: u64,
    /// Seconds between announces. 0 announces only at startup.
    pub announce_interval_secs: u64,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            nickname: None,
            ttl: DEFAULT_TTL,
            storage_path: None,
            enable_storage: true,
            persist_interval_secs: 60,
            announce_interval_secs: 30,
        }
    }
}

/// The `[logging]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    /// `"text"` or `"json"`.
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// The `[session]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub handshake_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            handshake_timeout_secs: defaults.handshake_timeout.as_secs(),
            idle_timeout_secs: defaults.idle_timeout.as_secs(),
        }
    }
}

/// The `[router]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    pub resend_cooldown_ms: u64,
    pub message_expiry_secs: u64,
    /// How often every pending outbox is flushed.
    pub flush_interval_ms: u64,
}

impl Default for RouterSection {
    fn default() -> Self {
        let defaults = RouterConfig::default();
        Self {
            resend_cooldown_ms: defaults.resend_cooldown.as_millis() as u64,
            message_expiry_secs: defaults.message_expiry.as_secs(),
            flush_interval_ms: 2_000,
        }
    }
}

/// The `[filter]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FilterSection {
    /// Capacity of the duplicate filter. 0 sizes it from the peer count.
    pub expected_items: usize,
    pub false_positive_rate: f64,
    /// Seconds between session cleanup, outbox expiry and filter upkeep.
    pub maintenance_interval_secs: u64,
}

impl Default for FilterSection {
    fn default() -> Self {
        Self {
            expected_items: 1000,
            false_positive_rate: 0.01,
            maintenance_interval_secs: 30,
        }
    }
}

/// A `[[relays]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayEntry {
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}
