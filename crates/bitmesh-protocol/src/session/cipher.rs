//! Transport encryption for an established session.
//!
//! Frame layout: `counter(8, big-endian) || ciphertext || tag(16)`. The
//! counter doubles as the AEAD nonce and as associated data, so a frame
//! cannot be replayed under a different counter.

use bitmesh_crypto::aead::{self, TAG_LEN};

use crate::error::SessionError;

/// Bytes of explicit counter in front of every frame.
pub const COUNTER_LEN: usize = 8;

/// Bytes a frame adds to its plaintext.
pub const FRAME_OVERHEAD: usize = COUNTER_LEN + TAG_LEN;

/// Number of counters below the highest seen that are still accepted.
pub const REPLAY_WINDOW: u64 = 64;

/// Sliding bitmap of recently accepted counters.
#[derive(Debug, Clone, Default)]
pub struct ReplayWindow {
    highest: Option<u64>,
    seen: u64,
}

impl ReplayWindow {
    /// Whether `counter` would be accepted (not yet seen and not too old).
    #[must_use]
    pub fn check(&self, counter: u64) -> bool {
        let Some(highest) = self.highest else {
            return true;
        };
        if counter > highest {
            return true;
        }
        let offset = highest - counter;
        offset < REPLAY_WINDOW && self.seen & (1 << offset) == 0
    }

    /// Record `counter` as accepted. Call only after [`check`](Self::check)
    /// passed and the frame authenticated.
    pub fn accept(&mut self, counter: u64) {
        match self.highest {
            None => {
                self.highest = Some(counter);
                self.seen = 1;
            }
            Some(highest) if counter > highest => {
                let shift = counter - highest;
                self.seen = if shift >= REPLAY_WINDOW {
                    0
                } else {
                    self.seen << shift
                };
                self.seen |= 1;
                self.highest = Some(counter);
            }
            Some(highest) => {
                self.seen |= 1 << (highest - counter);
            }
        }
    }
}

/// Send and receive keys produced by a completed handshake.
pub struct TransportCipher {
    send_key: [u8; 32],
    recv_key: [u8; 32],
    send_counter: u64,
    window: ReplayWindow,
}

impl TransportCipher {
    pub fn new(send_key: [u8; 32], recv_key: [u8; 32]) -> Self {
        Self {
            send_key,
            recv_key,
            send_counter: 0,
            window: ReplayWindow::default(),
        }
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let counter = self.send_counter;
        if counter == u64::MAX {
            return Err(SessionError::NonceExhausted);
        }
        let prefix = counter.to_be_bytes();
        let ciphertext = aead::seal(
            &self.send_key,
            &aead::counter_nonce(counter),
            &prefix,
            plaintext,
        )?;
        self.send_counter += 1;

        let mut frame = Vec::with_capacity(COUNTER_LEN + ciphertext.len());
        frame.extend_from_slice(&prefix);
        frame.extend_from_slice(&ciphertext);
        Ok(frame)
    }

    pub fn decrypt(&mut self, frame: &[u8]) -> Result<Vec<u8>, SessionError> {
        if frame.len() < COUNTER_LEN + TAG_LEN {
            return Err(SessionError::FrameTooShort { len: frame.len() });
        }
        let (prefix, ciphertext) = frame.split_at(COUNTER_LEN);
        let mut counter_bytes = [0u8; COUNTER_LEN];
        counter_bytes.copy_from_slice(prefix);
        let counter = u64::from_be_bytes(counter_bytes);

        if !self.window.check(counter) {
            return Err(SessionError::Replay { counter });
        }
        let plaintext = aead::open(
            &self.recv_key,
            &aead::counter_nonce(counter),
            prefix,
            ciphertext,
        )
        .map_err(|_| SessionError::DecryptionFailed)?;
        self.window.accept(counter);
        Ok(plaintext)
    }

    pub fn send_counter(&self) -> u64 {
        self.send_counter
    }
}

impl std::fmt::Debug for TransportCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCipher")
            .field("send_counter", &self.send_counter)
            .finish_non_exhaustive()
    }
}

impl Drop for TransportCipher {
    fn drop(&mut self) {
        self.send_key.fill(0);
        self.recv_key.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (TransportCipher, TransportCipher) {
        let a = [0x11; 32];
        let b = [0x22; 32];
        (TransportCipher::new(a, b), TransportCipher::new(b, a))
    }

    #[test]
    fn test_round_trip_and_counter_prefix() {
        let (mut alice, mut bob) = pair();
        let frame = alice.encrypt(b"hello").unwrap();
        assert_eq!(&frame[..8], &0u64.to_be_bytes());
        assert_eq!(frame.len(), COUNTER_LEN + 5 + TAG_LEN);
        assert_eq!(bob.decrypt(&frame).unwrap(), b"hello");
        assert_eq!(alice.send_counter(), 1);
    }

    #[test]
    fn test_replay_rejected() {
        let (mut alice, mut bob) = pair();
        let frame = alice.encrypt(b"once").unwrap();
        bob.decrypt(&frame).unwrap();
        assert!(matches!(
            bob.decrypt(&frame),
            Err(SessionError::Replay { counter: 0 })
        ));
    }

    #[test]
    fn test_out_of_order_within_window() {
        let (mut alice, mut bob) = pair();
        let frames: Vec<Vec<u8>> = (0..5).map(|i| alice.encrypt(&[i]).unwrap()).collect();
        for i in [4usize, 0, 2, 1, 3] {
            assert_eq!(bob.decrypt(&frames[i]).unwrap(), [i as u8]);
        }
    }

    #[test]
    fn test_too_old_rejected() {
        let (mut alice, mut bob) = pair();
        let first = alice.encrypt(b"old").unwrap();
        let mut last = Vec::new();
        for _ in 0..REPLAY_WINDOW {
            last = alice.encrypt(b"new").unwrap();
        }
        bob.decrypt(&last).unwrap();
        assert!(matches!(bob.decrypt(&first), Err(SessionError::Replay { .. })));
    }

    #[test]
    fn test_tampered_frame_does_not_advance_window() {
        let (mut alice, mut bob) = pair();
        let frame = alice.encrypt(b"data").unwrap();
        let mut bad = frame.clone();
        bad[10] ^= 0x01;
        assert!(matches!(bob.decrypt(&bad), Err(SessionError::DecryptionFailed)));
        assert_eq!(bob.decrypt(&frame).unwrap(), b"data");
    }

    #[test]
    fn test_rewritten_counter_fails_authentication() {
        let (mut alice, mut bob) = pair();
        let mut frame = alice.encrypt(b"data").unwrap();
        frame[7] = 9;
        assert!(matches!(bob.decrypt(&frame), Err(SessionError::DecryptionFailed)));
    }

    #[test]
    fn test_short_frame() {
        let (_, mut bob) = pair();
        assert!(matches!(
            bob.decrypt(&[0u8; 23]),
            Err(SessionError::FrameTooShort { len: 23 })
        ));
    }

    #[test]
    fn test_window_shift_past_width_clears_bitmap() {
        let mut window = ReplayWindow::default();
        window.accept(1);
        window.accept(1 + REPLAY_WINDOW + 10);
        assert!(!window.check(1));
        assert!(window.check(REPLAY_WINDOW + 5));
        assert!(!window.check(1 + REPLAY_WINDOW + 10));
    }
}
