//! Transparent LZ4 block compression for packet payloads.

use alloc::vec::Vec;

use crate::constants::{
    COMPRESSION_ENTROPY_RATIO, COMPRESSION_SAMPLE_SIZE, COMPRESSION_THRESHOLD, MAX_PAYLOAD_SIZE,
};
use crate::error::DecodeError;

/// Whether `data` is worth attempting to compress.
///
/// Short payloads are skipped, as are payloads whose first 256 bytes already
/// look high-entropy (encrypted or previously compressed).
#[must_use]
pub fn should_compress(data: &[u8]) -> bool {
    if data.len() < COMPRESSION_THRESHOLD {
        return false;
    }
    let sample = &data[..data.len().min(COMPRESSION_SAMPLE_SIZE)];
    let mut seen = [false; 256];
    let mut unique = 0usize;
    for &b in sample {
        if !seen[b as usize] {
            seen[b as usize] = true;
            unique += 1;
        }
    }
    (unique as f64) / (sample.len() as f64) < COMPRESSION_ENTROPY_RATIO
}

/// Compress `data`, returning `None` when the result would not be strictly
/// smaller than `data.len() - overhead`.
///
/// `overhead` is the size of the original-size prefix the caller will add.
#[must_use]
pub fn compress(data: &[u8], overhead: usize) -> Option<Vec<u8>> {
    let compressed = lz4_flex::block::compress(data);
    (compressed.len() + overhead < data.len()).then_some(compressed)
}

/// Decompress an LZ4 block that must expand to exactly `original_size` bytes.
pub fn decompress(data: &[u8], original_size: usize) -> Result<Vec<u8>, DecodeError> {
    if original_size > MAX_PAYLOAD_SIZE {
        return Err(DecodeError::OriginalSizeTooLarge {
            declared: original_size,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    let out =
        lz4_flex::block::decompress(data, original_size).map_err(|_| DecodeError::Decompression)?;
    if out.len() != original_size {
        return Err(DecodeError::DecompressedSizeMismatch {
            expected: original_size,
            actual: out.len(),
        });
    }
    Ok(out)
}
