//! Tracing subscriber setup for bitmesh nodes.
//!
//! Level conventions:
//! - ERROR: the node cannot continue (storage gone, config invalid)
//! - WARN: recoverable failures (handshake failed, relay rejected an event)
//! - INFO: sessions established, relays connected, peers announced
//! - DEBUG: outbox activity, handshake steps, relay frames
//! - TRACE: per-packet relay decisions and duplicate drops

use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over the configured level when set.
fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

pub fn init(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(filter(default_level))
        .init();
}

/// JSON lines on stdout, for containerized deployments.
pub fn init_json(default_level: &str) {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter(default_level))
        .init();
}

/// Safe to call from every test.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("debug"))
        .with_test_writer()
        .try_init();
}
