//! In-memory [`RadioLink`] for tests.
//!
//! ```rust,ignore
//! let (a_tx, a_rx) = mpsc::unbounded_channel();
//! let (b_tx, b_rx) = mpsc::unbounded_channel();
//! let a = MockRadio::new(alice);
//! let b = MockRadio::new(bob);
//! MockRadio::link(&a, a_tx, &b, b_tx);
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bitmesh_core::types::PeerId;
use tokio::sync::mpsc::UnboundedSender;

use crate::error::InterfaceError;
use crate::traits::{RadioEvent, RadioLink};

/// A frame handed to [`MockRadio::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub data: Vec<u8>,
    pub peer: Option<PeerId>,
}

#[derive(Default)]
struct MockState {
    connected: BTreeSet<PeerId>,
    reachable: BTreeSet<PeerId>,
    sent: Vec<SentFrame>,
    links: HashMap<PeerId, UnboundedSender<RadioEvent>>,
    fail_sends: bool,
}

/// Radio double. Clones share state, so a test can keep one handle while
/// the node owns another.
#[derive(Clone)]
pub struct MockRadio {
    local: PeerId,
    state: Arc<Mutex<MockState>>,
}

impl MockRadio {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            state: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local_peer(&self) -> PeerId {
        self.local
    }

    /// Connect two radios. Frames sent by one arrive as
    /// [`RadioEvent::FrameReceived`] on the other's channel, and both sides
    /// get a [`RadioEvent::PeerConnected`].
    pub fn link(
        a: &MockRadio,
        a_events: UnboundedSender<RadioEvent>,
        b: &MockRadio,
        b_events: UnboundedSender<RadioEvent>,
    ) {
        let _ = a_events.send(RadioEvent::PeerConnected(b.local));
        let _ = b_events.send(RadioEvent::PeerConnected(a.local));
        {
            let mut state = a.state();
            state.links.insert(b.local, b_events);
            state.connected.insert(b.local);
            state.reachable.insert(b.local);
        }
        {
            let mut state = b.state();
            state.links.insert(a.local, a_events);
            state.connected.insert(a.local);
            state.reachable.insert(a.local);
        }
    }

    /// Drop the link to `peer` on this side only.
    pub fn unlink(&self, peer: &PeerId) {
        let mut state = self.state();
        state.links.remove(peer);
        state.connected.remove(peer);
        state.reachable.remove(peer);
    }

    pub fn set_connected(&self, peer: PeerId, connected: bool) {
        let mut state = self.state();
        if connected {
            state.connected.insert(peer);
            state.reachable.insert(peer);
        } else {
            state.connected.remove(&peer);
        }
    }

    pub fn set_reachable(&self, peer: PeerId, reachable: bool) {
        let mut state = self.state();
        if reachable {
            state.reachable.insert(peer);
        } else {
            state.reachable.remove(&peer);
        }
    }

    /// Make every subsequent `send` fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.state().fail_sends = fail;
    }

    pub fn sent_frames(&self) -> Vec<SentFrame> {
        self.state().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<SentFrame> {
        std::mem::take(&mut self.state().sent)
    }
}

impl RadioLink for MockRadio {
    fn connected_peers(&self) -> Vec<PeerId> {
        self.state().connected.iter().copied().collect()
    }

    fn reachable_peers(&self) -> Vec<PeerId> {
        self.state().reachable.iter().copied().collect()
    }

    fn send(&self, frame: &[u8], peer: Option<&PeerId>) -> Result<(), InterfaceError> {
        let mut state = self.state();
        if state.fail_sends {
            return Err(InterfaceError::TransmitFailed("mock radio refused".into()));
        }
        let event = || RadioEvent::FrameReceived {
            data: frame.to_vec(),
            from: Some(self.local),
        };
        match peer {
            Some(peer) => {
                let tx = state.links.get(peer).ok_or(InterfaceError::NotConnected)?;
                let _ = tx.send(event());
            }
            None => {
                for tx in state.links.values() {
                    let _ = tx.send(event());
                }
            }
        }
        state.sent.push(SentFrame {
            data: frame.to_vec(),
            peer: peer.copied(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    const ALICE: PeerId = PeerId::new([0xA1; 8]);
    const BOB: PeerId = PeerId::new([0xB0; 8]);

    #[test]
    fn test_linked_radios_exchange_frames() {
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let a = MockRadio::new(ALICE);
        let b = MockRadio::new(BOB);
        MockRadio::link(&a, a_tx, &b, b_tx);

        assert_eq!(a_rx.try_recv().unwrap(), RadioEvent::PeerConnected(BOB));
        assert_eq!(b_rx.try_recv().unwrap(), RadioEvent::PeerConnected(ALICE));
        assert!(a.is_connected(&BOB));

        a.send(b"frame", Some(&BOB)).unwrap();
        assert_eq!(
            b_rx.try_recv().unwrap(),
            RadioEvent::FrameReceived {
                data: b"frame".to_vec(),
                from: Some(ALICE),
            }
        );
        assert_eq!(a.sent_frames().len(), 1);
    }

    #[test]
    fn test_send_to_unlinked_peer_fails() {
        let radio = MockRadio::new(ALICE);
        assert!(matches!(
            radio.send(b"x", Some(&BOB)),
            Err(InterfaceError::NotConnected)
        ));
        radio.send(b"x", None).unwrap();
        assert_eq!(radio.take_sent().len(), 1);
        assert!(radio.sent_frames().is_empty());
    }

    #[test]
    fn test_fail_sends() {
        let radio = MockRadio::new(ALICE);
        radio.set_fail_sends(true);
        assert!(matches!(
            radio.send(b"x", None),
            Err(InterfaceError::TransmitFailed(_))
        ));
        assert!(radio.sent_frames().is_empty());
    }

    #[test]
    fn test_reachable_is_separate_from_connected() {
        let radio = MockRadio::new(ALICE);
        radio.set_reachable(BOB, true);
        assert!(radio.is_reachable(&BOB));
        assert!(!radio.is_connected(&BOB));
        radio.set_connected(BOB, true);
        radio.set_connected(BOB, false);
        assert!(radio.is_reachable(&BOB));
    }
}
