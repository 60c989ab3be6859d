use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use bitmesh_core::types::PeerId;
use bitmesh_interfaces::error::InterfaceError;
use bitmesh_interfaces::traits::RadioLink;
use bitmesh_node::peers::parse_public_key;
use bitmesh_node::{Node, NodeConfig};

#[derive(Parser)]
#[command(name = "bitmesh-node", about = "bitmesh mesh and relay messaging node")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "bitmesh.toml")]
    config: PathBuf,

    /// Hex public key of a contact reachable over relays (repeatable)
    #[arg(long = "contact", value_name = "PUBKEY")]
    contacts: Vec<String>,
}

/// Stand-in for builds without a radio driver: the node runs relay-only.
struct NoRadio;

impl RadioLink for NoRadio {
    fn connected_peers(&self) -> Vec<PeerId> {
        Vec::new()
    }

    fn reachable_peers(&self) -> Vec<PeerId> {
        Vec::new()
    }

    fn send(&self, _frame: &[u8], _peer: Option<&PeerId>) -> Result<(), InterfaceError> {
        Err(InterfaceError::NotConnected)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match NodeConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };

    // Initialize logging
    let json = std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json")
        || config.logging.format == "json";
    if json {
        bitmesh_node::logging::init_json(&config.logging.level);
    } else {
        bitmesh_node::logging::init(&config.logging.level);
    }

    // The radio driver would hold the sender side.
    let (_radio_tx, radio_rx) = mpsc::unbounded_channel();
    let mut node = match Node::open(config, Box::new(NoRadio), radio_rx).await {
        Ok(node) => node,
        Err(e) => {
            tracing::error!("failed to open node: {e}");
            std::process::exit(1);
        }
    };

    for contact in &cli.contacts {
        let added = parse_public_key(contact)
            .map_err(|e| e.to_string())
            .and_then(|key| node.add_peer(&key, None).map_err(|e| e.to_string()));
        match added {
            Ok(peer) => tracing::info!(peer = %peer, "added contact"),
            Err(e) => tracing::warn!(contact = %contact, "ignoring contact: {e}"),
        }
    }

    let handle = node.handle();

    // Spawn signal handler
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received SIGINT, shutting down");
        handle.shutdown();
    });

    if let Err(e) = node.start().await {
        tracing::error!("failed to start node: {e}");
        std::process::exit(1);
    }
    tracing::info!(public_key = %node.public_key_hex(), "share this key with relay contacts");

    // Received messages are only logged; an application would consume them.
    if let Some(mut events) = node.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                tracing::info!(?event, "node event");
            }
        });
    }

    node.run().await;
    node.shutdown().await;
}
