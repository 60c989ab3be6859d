//! Timer-driven node behaviour under `tokio::test(start_paused = true)`.
//!
//! With the clock paused the runtime jumps straight to the next timer
//! whenever every task is idle, so a minute of announce ticks runs
//! instantly and the tick count is exact.

use std::time::Duration;

use tokio::sync::mpsc;

use bitmesh_core::constants::MessageType;
use bitmesh_core::identity::Identity;
use bitmesh_core::packet::wire::Packet;
use bitmesh_interfaces::testing::MockRadio;
use bitmesh_node::{Node, NodeConfig};

fn announce_count(radio: &MockRadio) -> usize {
    radio
        .sent_frames()
        .iter()
        .filter(|f| {
            Packet::decode(&f.data).is_ok_and(|p| p.message_type == MessageType::Announce)
        })
        .count()
}

async fn run_for(toml: &str, duration: Duration) -> MockRadio {
    let config = NodeConfig::parse(toml).unwrap();
    let identity = Identity::generate();
    let radio = MockRadio::new(identity.peer_id());
    let (_tx, rx) = mpsc::unbounded_channel();
    let mut node = Node::with_identity(config, identity, Box::new(radio.clone()), rx).unwrap();
    let handle = node.handle();
    node.start().await.unwrap();

    let stop = async {
        tokio::time::sleep(duration).await;
        handle.shutdown();
    };
    tokio::join!(node.run(), stop);
    radio
}

/// One announce from `start`, then one per 30 s tick: t=30 and t=60.
#[tokio::test(start_paused = true)]
async fn announce_tick_fires_deterministically() {
    let radio = run_for(
        "[node]\nenable_storage = false\nannounce_interval_secs = 30\n",
        Duration::from_secs(65),
    )
    .await;
    assert_eq!(announce_count(&radio), 3);
}

#[tokio::test(start_paused = true)]
async fn zero_announce_interval_disables_the_tick() {
    let radio = run_for(
        "[node]\nenable_storage = false\nannounce_interval_secs = 0\n",
        Duration::from_secs(600),
    )
    .await;
    assert_eq!(announce_count(&radio), 1);
}

/// Flush and maintenance ticks with nothing queued put nothing on the air.
#[tokio::test(start_paused = true)]
async fn idle_ticks_are_silent() {
    let radio = run_for(
        "[node]\nenable_storage = false\nannounce_interval_secs = 0\n\n\
         [router]\nflush_interval_ms = 100\n\n\
         [filter]\nmaintenance_interval_secs = 1\n",
        Duration::from_secs(120),
    )
    .await;
    assert_eq!(radio.sent_frames().len(), 1);
}

/// A shutdown that arrives while the loop is parked on timers wins at once.
#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_long_intervals() {
    let start = tokio::time::Instant::now();
    run_for(
        "[node]\nenable_storage = false\nannounce_interval_secs = 3600\n\n\
         [filter]\nmaintenance_interval_secs = 3600\n",
        Duration::from_secs(5),
    )
    .await;
    assert!(start.elapsed() < Duration::from_secs(6));
}
