//! Two nodes with no radio contact, talking through a local relay.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use bitmesh_core::identity::Identity;
use bitmesh_interfaces::testing::MockRadio;
use bitmesh_node::{Node, NodeConfig, NodeEvent};
use bitmesh_transport::router::RouterEvent;

/// Minimal relay: stores every event, replays matches on `REQ` and pushes
/// new ones to matching subscriptions. Filters only on `#p`.
async fn spawn_relay() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let stored: Arc<Mutex<Vec<Value>>> = Arc::default();
    let (fanout, _) = broadcast::channel::<Value>(64);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let stored = Arc::clone(&stored);
            let fanout = fanout.clone();
            tokio::spawn(async move {
                let Ok(ws) = accept_async(stream).await else {
                    return;
                };
                serve(ws, stored, fanout).await;
            });
        }
    });
    url
}

fn p_tags(event: &Value) -> Vec<String> {
    event["tags"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|t| t[0] == "p")
        .filter_map(|t| t[1].as_str().map(str::to_string))
        .collect()
}

fn is_wanted(wanted: &[String], event: &Value) -> bool {
    p_tags(event).iter().any(|p| wanted.contains(p))
}

async fn serve<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    stored: Arc<Mutex<Vec<Value>>>,
    fanout: broadcast::Sender<Value>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let mut live = fanout.subscribe();
    let mut subscriptions: HashMap<String, Vec<String>> = HashMap::new();

    loop {
        tokio::select! {
            frame = stream.next() => {
                let Some(Ok(Message::Text(text))) = frame else {
                    return;
                };
                let Ok(msg) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                match msg[0].as_str() {
                    Some("EVENT") => {
                        let event = msg[1].clone();
                        let ok = json!(["OK", event["id"], true, ""]).to_string();
                        stored.lock().unwrap().push(event.clone());
                        let _ = fanout.send(event);
                        if sink.send(Message::Text(ok)).await.is_err() {
                            return;
                        }
                    }
                    Some("REQ") => {
                        let sub_id = msg[1].as_str().unwrap_or_default().to_string();
                        let wanted: Vec<String> = msg[2]["#p"]
                            .as_array()
                            .into_iter()
                            .flatten()
                            .filter_map(|p| p.as_str().map(str::to_string))
                            .collect();
                        let replay: Vec<Value> = stored
                            .lock()
                            .unwrap()
                            .iter()
                            .filter(|e| is_wanted(&wanted, e))
                            .cloned()
                            .collect();
                        for event in replay {
                            let frame = json!(["EVENT", sub_id, event]).to_string();
                            if sink.send(Message::Text(frame)).await.is_err() {
                                return;
                            }
                        }
                        let eose = json!(["EOSE", sub_id]).to_string();
                        if sink.send(Message::Text(eose)).await.is_err() {
                            return;
                        }
                        subscriptions.insert(sub_id, wanted);
                    }
                    Some("CLOSE") => {
                        if let Some(sub_id) = msg[1].as_str() {
                            subscriptions.remove(sub_id);
                        }
                    }
                    _ => {}
                }
            }
            Ok(event) = live.recv() => {
                for (sub_id, wanted) in &subscriptions {
                    if is_wanted(wanted, &event) {
                        let frame = json!(["EVENT", sub_id, event]).to_string();
                        if sink.send(Message::Text(frame)).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn relay_node(url: &str) -> (Node, Identity) {
    let config = NodeConfig::parse(&format!(
        "[node]\nenable_storage = false\nannounce_interval_secs = 0\n\n\
         [router]\nflush_interval_ms = 50\n\n\
         [[relays]]\nurl = \"{url}\"\n"
    ))
    .unwrap();
    let identity = Identity::generate();
    let radio = MockRadio::new(identity.peer_id());
    let (_tx, rx) = mpsc::unbounded_channel();
    let node = Node::with_identity(config, identity.clone(), Box::new(radio), rx).unwrap();
    (node, identity)
}

async fn wait_for(
    events: &mut mpsc::UnboundedReceiver<NodeEvent>,
    mut pred: impl FnMut(&NodeEvent) -> bool,
) -> NodeEvent {
    loop {
        let event = events.recv().await.expect("node event stream closed");
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn message_reaches_offline_mesh_peer_through_relay() {
    bitmesh_node::logging::init_for_tests();
    let url = spawn_relay().await;
    let (mut alice, _) = relay_node(&url);
    let (mut bob, bob_identity) = relay_node(&url);
    let alice_peer = alice.local_peer();
    let bob_peer = alice
        .add_peer(&bob_identity.public_key_bytes(), Some("bob".into()))
        .unwrap();
    assert_eq!(bob_peer, bob.local_peer());

    let mut alice_events = alice.take_events().unwrap();
    let mut bob_events = bob.take_events().unwrap();
    let alice_handle = alice.handle();
    let bob_handle = bob.handle();

    alice.start().await.unwrap();
    bob.start().await.unwrap();
    assert_eq!(alice.relay_pool().relay_count(), 1);

    let scenario = async {
        alice_handle.send_private(bob_peer, "m1", "over the relay").unwrap();

        let received = wait_for(&mut bob_events, |e| {
            matches!(e, NodeEvent::MessageReceived { .. })
        })
        .await;
        assert_eq!(
            received,
            NodeEvent::MessageReceived {
                from: alice_peer,
                message_id: "m1".into(),
                content: b"over the relay".to_vec(),
                via: "relay",
            }
        );

        let confirmed = wait_for(&mut alice_events, |e| {
            matches!(e, NodeEvent::Router(RouterEvent::Confirmed { .. }))
        })
        .await;
        assert_eq!(
            confirmed,
            NodeEvent::Router(RouterEvent::Confirmed {
                peer: bob_peer,
                message_id: "m1".into(),
            })
        );

        // Bob learned Alice's key from the envelope and can answer.
        bob_handle.send_favorite(alice_peer, true).unwrap();
        let favorite = wait_for(&mut alice_events, |e| {
            matches!(e, NodeEvent::FavoriteChanged { .. })
        })
        .await;
        assert_eq!(
            favorite,
            NodeEvent::FavoriteChanged {
                from: bob_peer,
                is_favorite: true,
            }
        );

        alice_handle.shutdown();
        bob_handle.shutdown();
    };

    tokio::time::timeout(Duration::from_secs(20), async {
        tokio::join!(alice.run(), bob.run(), scenario);
    })
    .await
    .expect("scenario timed out");

    assert_eq!(alice.pending_messages(), 0);
    assert!(bob.peers().contains(&alice_peer));

    alice.shutdown().await;
    bob.shutdown().await;
}
