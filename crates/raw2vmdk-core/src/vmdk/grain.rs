//! Grain-level primitives: zero classification and DEFLATE compression.

use crate::error::{Error, Result};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

/// Check whether a grain-sized buffer is entirely zero.
///
/// An all-zero grain is not stored; its grain table entry stays 0 and readers
/// synthesize zeros on demand. Compares 8-byte words with a partial-word tail.
pub fn is_zero_grain(buf: &[u8]) -> bool {
    const WORD: usize = std::mem::size_of::<u64>();
    let mut words = buf.chunks_exact(WORD);
    for word in words.by_ref() {
        let mut bytes = [0u8; WORD];
        bytes.copy_from_slice(word);
        if u64::from_ne_bytes(bytes) != 0 {
            return false;
        }
    }
    words.remainder().iter().all(|&b| b == 0)
}

/// Compress one grain of data as a single-shot DEFLATE stream.
///
/// Each grain gets its own complete stream; no dictionary state is carried
/// between grains. Never called for all-zero grains.
pub fn compress_grain(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(data)
        .map_err(|e| Error::compress(format!("failed to compress grain: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::compress(format!("failed to finish grain stream: {}", e)))
}

/// A grain after classification and (for non-zero grains) compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedGrain {
    /// Entirely zero; stored nowhere.
    Zero,
    /// Compressed grain payload.
    Compressed(Vec<u8>),
}

/// Classify a grain and compress it when it holds data.
pub fn encode_grain(buf: &[u8], level: u32) -> Result<EncodedGrain> {
    if is_zero_grain(buf) {
        Ok(EncodedGrain::Zero)
    } else {
        Ok(EncodedGrain::Compressed(compress_grain(buf, level)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::DeflateDecoder;
    use std::io::Read;

    #[test]
    fn test_is_zero_grain_empty() {
        assert!(is_zero_grain(&[]));
    }

    #[test]
    fn test_is_zero_grain_zeros() {
        assert!(is_zero_grain(&vec![0u8; 64 * 1024]));
    }

    #[test]
    fn test_is_zero_grain_detects_data() {
        let mut buf = vec![0u8; 64 * 1024];
        buf[12345] = 1;
        assert!(!is_zero_grain(&buf));
    }

    #[test]
    fn test_is_zero_grain_partial_word_tail() {
        let mut buf = vec![0u8; 13];
        assert!(is_zero_grain(&buf));
        buf[12] = 0xFF;
        assert!(!is_zero_grain(&buf));
    }

    #[test]
    fn test_compress_grain_roundtrip() {
        let mut data = vec![0u8; 64 * 1024];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = ((i * 17 + 31) % 256) as u8;
        }

        let compressed = compress_grain(&data, 1).unwrap();
        assert!(!compressed.is_empty());

        let mut decoder = DeflateDecoder::new(&compressed[..]);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn test_compress_grain_worst_case_bound() {
        // DEFLATE never expands past 2x grain size.
        let mut data = vec![0u8; 64 * 1024];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = (i * 251 % 256) as u8 ^ (i >> 3) as u8;
        }
        let compressed = compress_grain(&data, 9).unwrap();
        assert!(compressed.len() <= 2 * data.len());
    }

    #[test]
    fn test_encode_grain_zero() {
        let grain = vec![0u8; 64 * 1024];
        assert_eq!(encode_grain(&grain, 1).unwrap(), EncodedGrain::Zero);
    }

    #[test]
    fn test_encode_grain_data() {
        let mut grain = vec![0u8; 64 * 1024];
        grain[0] = 0xAB;
        match encode_grain(&grain, 1).unwrap() {
            EncodedGrain::Compressed(data) => assert!(!data.is_empty()),
            EncodedGrain::Zero => panic!("non-zero grain classified as zero"),
        }
    }
}
