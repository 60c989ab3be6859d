//! Three-message mutually authenticated handshake.
//!
//! ```text
//! INITIATOR                                 RESPONDER
//!     |-- msg1: e || checksum(16) ----------->|
//!     |<-- msg2: e, ee, s, es || tag(16) -----|
//!     |-- msg3: s, se, ss || tag(16) -------->|
//!     |                                       |
//!     |     split() -> send / receive keys    |
//! ```
//!
//! Symmetric state follows the Noise construction: SHA-256 transcript hash
//! `h`, chaining key `ck` advanced with HKDF on every DH result, and
//! ChaCha20-Poly1305 with `h` as associated data once a key is mixed in.
//! Message 1 carries no key yet, so it is protected by a 16-byte checksum of
//! the transcript hash instead.

use bitmesh_crypto::aead;
use bitmesh_crypto::hkdf::hkdf2;
use bitmesh_crypto::sha::{Sha256Hasher, sha256};
use bitmesh_crypto::x25519::{X25519PrivateKey, X25519PublicKey};

use super::cipher::TransportCipher;
use crate::error::SessionError;

pub const PROTOCOL_NAME: &[u8] = b"BitmeshXX_25519_ChaChaPoly_SHA256";

const DH_LEN: usize = 32;
const CHECKSUM_LEN: usize = 16;

/// `e || checksum`
pub const MESSAGE_1_LEN: usize = DH_LEN + CHECKSUM_LEN;
/// `e || enc(s) || enc(empty)`
pub const MESSAGE_2_LEN: usize = DH_LEN + (DH_LEN + aead::TAG_LEN) + aead::TAG_LEN;
/// `enc(s) || enc(empty)`
pub const MESSAGE_3_LEN: usize = (DH_LEN + aead::TAG_LEN) + aead::TAG_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRole {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Message1,
    Message2,
    Message3,
    Complete,
}

struct SymmetricState {
    ck: [u8; 32],
    h: [u8; 32],
    k: Option<[u8; 32]>,
    n: u64,
}

impl SymmetricState {
    fn new() -> Self {
        // The protocol name is longer than a hash, so it is hashed.
        let h = sha256(PROTOCOL_NAME);
        Self {
            ck: h,
            h,
            k: None,
            n: 0,
        }
    }

    fn mix_hash(&mut self, data: &[u8]) {
        let mut hasher = Sha256Hasher::new();
        hasher.update(&self.h);
        hasher.update(data);
        self.h = hasher.finalize();
    }

    fn mix_key(&mut self, ikm: &[u8; 32]) {
        let (ck, k) = hkdf2(&self.ck, ikm);
        self.ck = ck;
        self.k = Some(k);
        self.n = 0;
    }

    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let out = match &self.k {
            Some(k) => {
                let ct = aead::seal(k, &aead::counter_nonce(self.n), &self.h, plaintext)?;
                self.n += 1;
                ct
            }
            None => plaintext.to_vec(),
        };
        self.mix_hash(&out);
        Ok(out)
    }

    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, SessionError> {
        let out = match &self.k {
            Some(k) => {
                let pt = aead::open(k, &aead::counter_nonce(self.n), &self.h, ciphertext)
                    .map_err(|_| SessionError::HandshakeFailed("authentication tag mismatch"))?;
                self.n += 1;
                pt
            }
            None => ciphertext.to_vec(),
        };
        self.mix_hash(ciphertext);
        Ok(out)
    }

    fn checksum(&self) -> [u8; CHECKSUM_LEN] {
        let digest = sha256(&self.h);
        let mut out = [0u8; CHECKSUM_LEN];
        out.copy_from_slice(&digest[..CHECKSUM_LEN]);
        out
    }

    fn split(&self) -> ([u8; 32], [u8; 32]) {
        hkdf2(&self.ck, &[])
    }
}

impl Drop for SymmetricState {
    fn drop(&mut self) {
        self.ck.fill(0);
        if let Some(k) = self.k.as_mut() {
            k.fill(0);
        }
    }
}

/// One side of an in-progress handshake.
pub struct HandshakeState {
    role: HandshakeRole,
    step: Step,
    symmetric: SymmetricState,
    s: X25519PrivateKey,
    e: Option<X25519PrivateKey>,
    re: Option<X25519PublicKey>,
    rs: Option<X25519PublicKey>,
}

impl HandshakeState {
    pub fn initiator(static_key: X25519PrivateKey) -> Self {
        Self::new(HandshakeRole::Initiator, static_key)
    }

    pub fn responder(static_key: X25519PrivateKey) -> Self {
        Self::new(HandshakeRole::Responder, static_key)
    }

    fn new(role: HandshakeRole, s: X25519PrivateKey) -> Self {
        Self {
            role,
            step: Step::Message1,
            symmetric: SymmetricState::new(),
            s,
            e: None,
            re: None,
            rs: None,
        }
    }

    pub fn role(&self) -> HandshakeRole {
        self.role
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.step == Step::Complete
    }

    /// Whether the next step is ours to write.
    #[must_use]
    pub fn is_my_turn(&self) -> bool {
        matches!(
            (self.role, self.step),
            (HandshakeRole::Initiator, Step::Message1 | Step::Message3)
                | (HandshakeRole::Responder, Step::Message2)
        )
    }

    /// Length of the message this side expects to read next, if any.
    pub fn expected_len(&self) -> Option<usize> {
        if self.is_my_turn() {
            return None;
        }
        match self.step {
            Step::Message1 => Some(MESSAGE_1_LEN),
            Step::Message2 => Some(MESSAGE_2_LEN),
            Step::Message3 => Some(MESSAGE_3_LEN),
            Step::Complete => None,
        }
    }

    /// The remote static key, once it has been received.
    pub fn remote_static(&self) -> Option<&X25519PublicKey> {
        self.rs.as_ref()
    }

    pub fn handshake_hash(&self) -> [u8; 32] {
        self.symmetric.h
    }

    fn dh(local: &X25519PrivateKey, remote: Option<&X25519PublicKey>) -> Result<[u8; 32], SessionError> {
        let remote = remote.ok_or(SessionError::HandshakeFailed("missing remote key"))?;
        local
            .diffie_hellman_checked(remote)
            .map_err(|_| SessionError::HandshakeFailed("weak shared secret"))
    }

    fn local_ephemeral(&self) -> Result<&X25519PrivateKey, SessionError> {
        self.e
            .as_ref()
            .ok_or(SessionError::HandshakeFailed("missing local ephemeral"))
    }

    fn out_of_turn(&self) -> SessionError {
        SessionError::UnexpectedMessage {
            state: self.step_name(),
        }
    }

    fn step_name(&self) -> &'static str {
        match self.step {
            Step::Message1 => "message 1",
            Step::Message2 => "message 2",
            Step::Message3 => "message 3",
            Step::Complete => "complete",
        }
    }

    /// Produce the next outbound handshake message.
    pub fn write_message(&mut self) -> Result<Vec<u8>, SessionError> {
        if !self.is_my_turn() {
            return Err(self.out_of_turn());
        }
        let out = match self.step {
            Step::Message1 => self.write_message_1(),
            Step::Message2 => self.write_message_2()?,
            Step::Message3 => self.write_message_3()?,
            Step::Complete => return Err(self.out_of_turn()),
        };
        self.advance();
        Ok(out)
    }

    /// Consume the next inbound handshake message.
    pub fn read_message(&mut self, message: &[u8]) -> Result<(), SessionError> {
        let expected = self.expected_len().ok_or_else(|| self.out_of_turn())?;
        if message.len() != expected {
            return Err(SessionError::HandshakeFailed("unexpected message length"));
        }
        match self.step {
            Step::Message1 => self.read_message_1(message)?,
            Step::Message2 => self.read_message_2(message)?,
            Step::Message3 => self.read_message_3(message)?,
            Step::Complete => return Err(self.out_of_turn()),
        }
        self.advance();
        Ok(())
    }

    fn advance(&mut self) {
        self.step = match self.step {
            Step::Message1 => Step::Message2,
            Step::Message2 => Step::Message3,
            Step::Message3 | Step::Complete => Step::Complete,
        };
    }

    fn write_message_1(&mut self) -> Vec<u8> {
        let e = X25519PrivateKey::generate();
        let e_pub = e.public_key().to_bytes();
        self.symmetric.mix_hash(&e_pub);
        self.e = Some(e);

        let mut out = Vec::with_capacity(MESSAGE_1_LEN);
        out.extend_from_slice(&e_pub);
        out.extend_from_slice(&self.symmetric.checksum());
        out
    }

    fn read_message_1(&mut self, message: &[u8]) -> Result<(), SessionError> {
        let (re, checksum) = message.split_at(DH_LEN);
        self.symmetric.mix_hash(re);
        if checksum != self.symmetric.checksum() {
            return Err(SessionError::HandshakeFailed("transcript checksum mismatch"));
        }
        self.re = Some(X25519PublicKey::try_from_slice(re)?);
        Ok(())
    }

    fn write_message_2(&mut self) -> Result<Vec<u8>, SessionError> {
        let e = X25519PrivateKey::generate();
        let e_pub = e.public_key().to_bytes();
        self.symmetric.mix_hash(&e_pub);

        let ee = Self::dh(&e, self.re.as_ref())?;
        self.symmetric.mix_key(&ee);
        self.e = Some(e);

        let enc_s = self
            .symmetric
            .encrypt_and_hash(&self.s.public_key().to_bytes())?;

        let es = Self::dh(&self.s, self.re.as_ref())?;
        self.symmetric.mix_key(&es);

        let tag = self.symmetric.encrypt_and_hash(&[])?;

        let mut out = Vec::with_capacity(MESSAGE_2_LEN);
        out.extend_from_slice(&e_pub);
        out.extend_from_slice(&enc_s);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    fn read_message_2(&mut self, message: &[u8]) -> Result<(), SessionError> {
        let (re, rest) = message.split_at(DH_LEN);
        let (enc_s, tag) = rest.split_at(DH_LEN + aead::TAG_LEN);

        self.symmetric.mix_hash(re);
        let re = X25519PublicKey::try_from_slice(re)?;
        let ee = Self::dh(self.local_ephemeral()?, Some(&re))?;
        self.symmetric.mix_key(&ee);
        self.re = Some(re);

        let rs = self.symmetric.decrypt_and_hash(enc_s)?;
        let rs = X25519PublicKey::try_from_slice(&rs)?;

        let es = Self::dh(self.local_ephemeral()?, Some(&rs))?;
        self.symmetric.mix_key(&es);
        self.rs = Some(rs);

        self.symmetric.decrypt_and_hash(tag)?;
        Ok(())
    }

    fn write_message_3(&mut self) -> Result<Vec<u8>, SessionError> {
        let enc_s = self
            .symmetric
            .encrypt_and_hash(&self.s.public_key().to_bytes())?;

        let se = Self::dh(&self.s, self.re.as_ref())?;
        self.symmetric.mix_key(&se);
        let ss = Self::dh(&self.s, self.rs.as_ref())?;
        self.symmetric.mix_key(&ss);

        let tag = self.symmetric.encrypt_and_hash(&[])?;

        let mut out = Vec::with_capacity(MESSAGE_3_LEN);
        out.extend_from_slice(&enc_s);
        out.extend_from_slice(&tag);
        Ok(out)
    }

    fn read_message_3(&mut self, message: &[u8]) -> Result<(), SessionError> {
        let (enc_s, tag) = message.split_at(DH_LEN + aead::TAG_LEN);

        let rs = self.symmetric.decrypt_and_hash(enc_s)?;
        let rs = X25519PublicKey::try_from_slice(&rs)?;

        let se = Self::dh(self.local_ephemeral()?, Some(&rs))?;
        self.symmetric.mix_key(&se);
        let ss = Self::dh(&self.s, Some(&rs))?;
        self.symmetric.mix_key(&ss);
        self.rs = Some(rs);

        self.symmetric.decrypt_and_hash(tag)?;
        Ok(())
    }

    /// Derive transport keys. Returns the cipher and the authenticated
    /// remote static key.
    pub fn into_transport(self) -> Result<(TransportCipher, X25519PublicKey), SessionError> {
        if !self.is_complete() {
            return Err(self.out_of_turn());
        }
        let rs = self
            .rs
            .ok_or(SessionError::HandshakeFailed("missing remote static key"))?;
        let (k1, k2) = self.symmetric.split();
        let cipher = match self.role {
            HandshakeRole::Initiator => TransportCipher::new(k1, k2),
            HandshakeRole::Responder => TransportCipher::new(k2, k1),
        };
        Ok((cipher, rs))
    }
}

impl std::fmt::Debug for HandshakeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeState")
            .field("role", &self.role)
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> (HandshakeState, HandshakeState, [Vec<u8>; 3]) {
        let mut alice = HandshakeState::initiator(X25519PrivateKey::generate());
        let mut bob = HandshakeState::responder(X25519PrivateKey::generate());
        let m1 = alice.write_message().unwrap();
        bob.read_message(&m1).unwrap();
        let m2 = bob.write_message().unwrap();
        alice.read_message(&m2).unwrap();
        let m3 = alice.write_message().unwrap();
        bob.read_message(&m3).unwrap();
        (alice, bob, [m1, m2, m3])
    }

    #[test]
    fn test_message_lengths() {
        assert_eq!(MESSAGE_1_LEN, 48);
        assert_eq!(MESSAGE_2_LEN, 96);
        assert_eq!(MESSAGE_3_LEN, 64);
        let (_, _, [m1, m2, m3]) = run();
        assert_eq!((m1.len(), m2.len(), m3.len()), (48, 96, 64));
    }

    #[test]
    fn test_both_sides_agree() {
        let alice_s = X25519PrivateKey::generate();
        let bob_s = X25519PrivateKey::generate();
        let alice_pub = alice_s.public_key();
        let bob_pub = bob_s.public_key();

        let mut alice = HandshakeState::initiator(alice_s);
        let mut bob = HandshakeState::responder(bob_s);
        bob.read_message(&alice.write_message().unwrap()).unwrap();
        alice.read_message(&bob.write_message().unwrap()).unwrap();
        bob.read_message(&alice.write_message().unwrap()).unwrap();

        assert_eq!(alice.handshake_hash(), bob.handshake_hash());
        let (mut a_cipher, a_remote) = alice.into_transport().unwrap();
        let (mut b_cipher, b_remote) = bob.into_transport().unwrap();
        assert_eq!(a_remote, bob_pub);
        assert_eq!(b_remote, alice_pub);

        let frame = a_cipher.encrypt(b"ping").unwrap();
        assert_eq!(b_cipher.decrypt(&frame).unwrap(), b"ping");
        let frame = b_cipher.encrypt(b"pong").unwrap();
        assert_eq!(a_cipher.decrypt(&frame).unwrap(), b"pong");
    }

    #[test]
    fn test_out_of_turn_rejected() {
        let mut alice = HandshakeState::initiator(X25519PrivateKey::generate());
        assert!(matches!(
            alice.read_message(&[0u8; MESSAGE_1_LEN]),
            Err(SessionError::UnexpectedMessage { .. })
        ));
        let mut bob = HandshakeState::responder(X25519PrivateKey::generate());
        assert!(bob.write_message().is_err());
    }

    #[test]
    fn test_incomplete_cannot_split() {
        let alice = HandshakeState::initiator(X25519PrivateKey::generate());
        assert!(alice.into_transport().is_err());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let mut bob = HandshakeState::responder(X25519PrivateKey::generate());
        assert!(matches!(
            bob.read_message(&[0u8; 47]),
            Err(SessionError::HandshakeFailed(_))
        ));
    }

    #[test]
    fn test_low_order_ephemeral_rejected() {
        let mut bob = HandshakeState::responder(X25519PrivateKey::generate());
        // An all-zero point is accepted syntactically but yields a zero DH.
        let mut state = SymmetricState::new();
        state.mix_hash(&[0u8; 32]);
        let mut m1 = vec![0u8; 32];
        m1.extend_from_slice(&state.checksum());
        bob.read_message(&m1).unwrap();
        assert!(matches!(
            bob.write_message(),
            Err(SessionError::HandshakeFailed("weak shared secret"))
        ));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn flip(msg: &[u8], idx: usize, bit: u8) -> Vec<u8> {
        let mut out = msg.to_vec();
        out[idx % msg.len()] ^= 1 << (bit % 8);
        out
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn corrupted_message_1_fails(idx in any::<usize>(), bit in any::<u8>()) {
            let mut alice = HandshakeState::initiator(X25519PrivateKey::generate());
            let mut bob = HandshakeState::responder(X25519PrivateKey::generate());
            let m1 = alice.write_message().unwrap();
            prop_assert!(bob.read_message(&flip(&m1, idx, bit)).is_err());
        }

        #[test]
        fn corrupted_message_2_fails(idx in any::<usize>(), bit in any::<u8>()) {
            let mut alice = HandshakeState::initiator(X25519PrivateKey::generate());
            let mut bob = HandshakeState::responder(X25519PrivateKey::generate());
            bob.read_message(&alice.write_message().unwrap()).unwrap();
            let m2 = bob.write_message().unwrap();
            prop_assert!(alice.read_message(&flip(&m2, idx, bit)).is_err());
        }

        #[test]
        fn corrupted_message_3_fails(idx in any::<usize>(), bit in any::<u8>()) {
            let mut alice = HandshakeState::initiator(X25519PrivateKey::generate());
            let mut bob = HandshakeState::responder(X25519PrivateKey::generate());
            bob.read_message(&alice.write_message().unwrap()).unwrap();
            alice.read_message(&bob.write_message().unwrap()).unwrap();
            let m3 = alice.write_message().unwrap();
            prop_assert!(bob.read_message(&flip(&m3, idx, bit)).is_err());
        }
    }
}
