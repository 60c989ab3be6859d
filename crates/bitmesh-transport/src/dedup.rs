//! Probabilistic duplicate suppression for the flooded mesh.
//!
//! A Bloom filter sized from `(expected_items, false_positive_rate)`. Bit
//! positions come from SHA-512 of the item, sliced into `k` big-endian
//! 4-byte windows reduced modulo the bit count. The filter never forgets an
//! item on its own, so it is rotated (cleared) once more items have been
//! inserted than it was sized for, and re-sized when the mesh changes tier.

use bitmesh_crypto::sha::sha512;

/// Lower bound on the bit array size.
pub const MIN_BIT_COUNT: usize = 64;

/// Upper bound on the number of hash windows (10 windows use 40 of the 64
/// SHA-512 bytes).
pub const MAX_HASH_COUNT: u32 = 10;

/// Filter sizing tier selected from an estimated peer count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSize {
    Small,
    Medium,
    Large,
    Huge,
}

impl NetworkSize {
    pub fn from_peer_count(peers: usize) -> Self {
        match peers {
            0..10 => NetworkSize::Small,
            10..50 => NetworkSize::Medium,
            50..200 => NetworkSize::Large,
            _ => NetworkSize::Huge,
        }
    }

    /// `(expected_items, false_positive_rate)` for this tier.
    pub fn parameters(self) -> (usize, f64) {
        match self {
            NetworkSize::Small => (500, 0.01),
            NetworkSize::Medium => (1000, 0.01),
            NetworkSize::Large => (4000, 0.02),
            NetworkSize::Huge => (10_000, 0.03),
        }
    }
}

/// Bit count and hash count for `n` items at false-positive rate `p`.
///
/// `m = ceil(max(64, n * |ln p| / ln2^2))`, `k = clamp(round(m / n * ln2), 1, 10)`.
pub fn optimal_parameters(expected_items: usize, false_positive_rate: f64) -> (usize, u32) {
    let n = expected_items.max(1) as f64;
    let p = false_positive_rate.clamp(f64::MIN_POSITIVE, 0.5);
    let ln2 = core::f64::consts::LN_2;
    let m = (n * p.ln().abs() / (ln2 * ln2)).max(MIN_BIT_COUNT as f64).ceil();
    let k = ((m / n) * ln2).round().clamp(1.0, MAX_HASH_COUNT as f64);
    (m as usize, k as u32)
}

pub struct BloomFilter {
    bits: Vec<u64>,
    bit_count: usize,
    hash_count: u32,
    expected_items: usize,
    false_positive_rate: f64,
    insert_count: usize,
}

impl BloomFilter {
    pub fn new(expected_items: usize, false_positive_rate: f64) -> Self {
        let (bit_count, hash_count) = optimal_parameters(expected_items, false_positive_rate);
        Self {
            bits: vec![0; bit_count.div_ceil(64)],
            bit_count,
            hash_count,
            expected_items: expected_items.max(1),
            false_positive_rate,
            insert_count: 0,
        }
    }

    /// A filter sized for the tier matching `peer_count`.
    pub fn adaptive(peer_count: usize) -> Self {
        let (n, p) = NetworkSize::from_peer_count(peer_count).parameters();
        Self::new(n, p)
    }

    fn positions(&self, item: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let digest = sha512(item);
        let m = self.bit_count as u64;
        (0..self.hash_count as usize).map(move |i| {
            let window = [
                digest[i * 4],
                digest[i * 4 + 1],
                digest[i * 4 + 2],
                digest[i * 4 + 3],
            ];
            (u64::from(u32::from_be_bytes(window)) % m) as usize
        })
    }

    pub fn insert(&mut self, item: &[u8]) {
        let positions: Vec<usize> = self.positions(item).collect();
        for pos in positions {
            self.bits[pos / 64] |= 1 << (pos % 64);
        }
        self.insert_count += 1;
    }

    /// `false` means definitely never inserted; `true` means possibly inserted.
    #[must_use]
    pub fn contains(&self, item: &[u8]) -> bool {
        self.positions(item)
            .all(|pos| self.bits[pos / 64] & (1 << (pos % 64)) != 0)
    }

    /// Insert `item` and return `true` if it was not already (possibly) present.
    pub fn check_and_insert(&mut self, item: &[u8]) -> bool {
        if self.contains(item) {
            return false;
        }
        self.insert(item);
        true
    }

    pub fn reset(&mut self) {
        self.bits.iter_mut().for_each(|w| *w = 0);
        self.insert_count = 0;
    }

    /// Clear the filter once it holds more items than it was sized for.
    ///
    /// Returns `true` if the filter was reset.
    pub fn maybe_rotate(&mut self) -> bool {
        if self.insert_count > self.expected_items {
            tracing::debug!(
                inserted = self.insert_count,
                expected = self.expected_items,
                "rotating duplicate filter"
            );
            self.reset();
            return true;
        }
        false
    }

    /// Re-size for a new peer count if it maps to a different tier.
    ///
    /// Re-sizing clears the filter. Returns `true` if the tier changed.
    pub fn retune(&mut self, peer_count: usize) -> bool {
        let (n, p) = NetworkSize::from_peer_count(peer_count).parameters();
        if n == self.expected_items && p == self.false_positive_rate {
            return false;
        }
        tracing::info!(
            peer_count,
            expected_items = n,
            false_positive_rate = p,
            "retuning duplicate filter"
        );
        *self = Self::new(n, p);
        true
    }

    /// False-positive probability at the current fill level:
    /// `(1 - e^(-k * inserted / m))^k`.
    pub fn estimated_false_positive_rate(&self) -> f64 {
        let k = f64::from(self.hash_count);
        let fill = -k * self.insert_count as f64 / self.bit_count as f64;
        (1.0 - fill.exp()).powf(k)
    }

    pub fn insert_count(&self) -> usize {
        self.insert_count
    }

    pub fn bit_count(&self) -> usize {
        self.bit_count
    }

    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    pub fn expected_items(&self) -> usize {
        self.expected_items
    }
}

impl Default for BloomFilter {
    /// Sized for a medium mesh: 1000 items at 1%.
    fn default() -> Self {
        let (n, p) = NetworkSize::Medium.parameters();
        Self::new(n, p)
    }
}
