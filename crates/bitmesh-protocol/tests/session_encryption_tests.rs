//! Transport encryption through an established session.

use bitmesh_crypto::x25519::X25519PrivateKey;
use bitmesh_protocol::error::SessionError;
use bitmesh_protocol::session::{IDLE_TIMEOUT, SessionConfig, SessionManager};

fn established() -> (SessionManager, SessionManager) {
    let mut alice = SessionManager::new(X25519PrivateKey::generate(), SessionConfig::default());
    let mut bob = SessionManager::new(X25519PrivateKey::generate(), SessionConfig::default());
    let (a, b) = (alice.local_peer(), bob.local_peer());
    let m1 = alice.start_handshake(&b, true).unwrap().unwrap();
    let m2 = bob.process_handshake_message(&m1, &a).unwrap().unwrap();
    let m3 = alice.process_handshake_message(&m2, &b).unwrap().unwrap();
    bob.process_handshake_message(&m3, &a).unwrap();
    (alice, bob)
}

#[test]
fn round_trip_both_directions() {
    let (mut alice, mut bob) = established();
    let (a, b) = (alice.local_peer(), bob.local_peer());

    let frame = alice.encrypt(b"hello bob", &b).unwrap();
    assert_eq!(bob.decrypt(&frame, &a).unwrap(), b"hello bob");
    let frame = bob.encrypt(b"hello alice", &a).unwrap();
    assert_eq!(alice.decrypt(&frame, &b).unwrap(), b"hello alice");
}

#[test]
fn round_trip_ten_kib() {
    let (mut alice, mut bob) = established();
    let (a, b) = (alice.local_peer(), bob.local_peer());
    let payload: Vec<u8> = (0..10 * 1024).map(|i| (i % 251) as u8).collect();

    let frame = alice.encrypt(&payload, &b).unwrap();
    assert_eq!(bob.decrypt(&frame, &a).unwrap(), payload);
}

#[test]
fn empty_payload_round_trips() {
    let (mut alice, mut bob) = established();
    let (a, b) = (alice.local_peer(), bob.local_peer());
    let frame = alice.encrypt(&[], &b).unwrap();
    assert!(bob.decrypt(&frame, &a).unwrap().is_empty());
}

#[test]
fn encrypt_without_handshake_fails() {
    let mut alice = SessionManager::new(X25519PrivateKey::generate(), SessionConfig::default());
    let bob = SessionManager::new(X25519PrivateKey::generate(), SessionConfig::default());
    let b = bob.local_peer();

    assert!(matches!(
        alice.encrypt(b"x", &b),
        Err(SessionError::NoSession(_))
    ));
    alice.start_handshake(&b, true).unwrap();
    assert!(matches!(
        alice.encrypt(b"x", &b),
        Err(SessionError::NotEstablished(_))
    ));
}

#[test]
fn decrypt_without_handshake_fails() {
    let (mut alice, bob) = established();
    let b = bob.local_peer();
    let frame = alice.encrypt(b"x", &b).unwrap();

    let mut stranger = SessionManager::new(X25519PrivateKey::generate(), SessionConfig::default());
    assert!(matches!(
        stranger.decrypt(&frame, &alice.local_peer()),
        Err(SessionError::NoSession(_))
    ));
}

#[test]
fn tampered_and_replayed_frames_rejected() {
    let (mut alice, mut bob) = established();
    let (a, b) = (alice.local_peer(), bob.local_peer());

    let frame = alice.encrypt(b"once", &b).unwrap();
    let mut bad = frame.clone();
    let last = bad.len() - 1;
    bad[last] ^= 0x01;
    assert!(matches!(bob.decrypt(&bad, &a), Err(SessionError::DecryptionFailed)));

    assert_eq!(bob.decrypt(&frame, &a).unwrap(), b"once");
    assert!(matches!(bob.decrypt(&frame, &a), Err(SessionError::Replay { .. })));
    assert!(bob.is_established(&a));
}

#[test]
fn sender_cannot_read_its_own_frames() {
    let (mut alice, bob) = established();
    let b = bob.local_peer();
    let frame = alice.encrypt(b"mine", &b).unwrap();
    assert!(matches!(
        alice.decrypt(&frame, &b),
        Err(SessionError::DecryptionFailed)
    ));
}

#[test]
fn traffic_at_explicit_times_keeps_session_alive() {
    let mut alice = SessionManager::new(X25519PrivateKey::generate(), SessionConfig::default());
    let mut bob = SessionManager::new(X25519PrivateKey::generate(), SessionConfig::default());
    let (a, b) = (alice.local_peer(), bob.local_peer());
    let m1 = alice.start_handshake_at(&b, true, 0).unwrap().unwrap();
    let m2 = bob.process_handshake_message_at(&m1, &a, 0).unwrap().unwrap();
    let m3 = alice.process_handshake_message_at(&m2, &b, 0).unwrap().unwrap();
    bob.process_handshake_message_at(&m3, &a, 0).unwrap();

    let idle = IDLE_TIMEOUT.as_millis() as u64;
    let frame = alice.encrypt_at(b"ping", &b, idle).unwrap();
    assert_eq!(bob.decrypt_at(&frame, &a, idle).unwrap(), b"ping");

    assert!(alice.cleanup_stale_sessions_at(idle + 1).is_empty());
    assert!(bob.cleanup_stale_sessions_at(idle + 1).is_empty());
    assert_eq!(bob.cleanup_stale_sessions_at(2 * idle + 1), vec![a]);
}
