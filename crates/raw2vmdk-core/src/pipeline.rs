//! Parallel grain encoding.
//!
//! Classification and compression of a grain are independent of every other
//! grain, so a batch can fan out across a thread pool while the writer keeps
//! appending in virtual-address order. Results come back in input order;
//! output bytes are identical to the sequential path.

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::vmdk::grain::{encode_grain, EncodedGrain};

/// Compression level for stream-optimized grain payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    /// zlib level 1.
    #[default]
    Fast,
    /// zlib level 6.
    Balanced,
    /// zlib level 9.
    Max,
}

impl CompressionLevel {
    /// The underlying zlib level.
    pub fn level(&self) -> u32 {
        match self {
            CompressionLevel::Fast => 1,
            CompressionLevel::Balanced => 6,
            CompressionLevel::Max => 9,
        }
    }
}

/// Configuration for the encoding pipeline.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Compression level for grain payloads.
    pub compression: CompressionLevel,
    /// Number of worker threads (0 = rayon's default).
    pub num_threads: usize,
}

impl PipelineConfig {
    /// Create a new pipeline configuration.
    pub fn new(compression: CompressionLevel, num_threads: usize) -> Self {
        Self {
            compression,
            num_threads,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            compression: CompressionLevel::default(),
            num_threads: 0,
        }
    }
}

/// Order-preserving parallel grain encoder.
pub struct Pipeline {
    pool: Option<rayon::ThreadPool>,
    level: u32,
}

impl Pipeline {
    /// Creates a pipeline, building a dedicated thread pool when a thread
    /// count is pinned.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let pool = if config.num_threads > 0 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(config.num_threads)
                    .build()
                    .map_err(|e| Error::pipeline(format!("failed to build thread pool: {}", e)))?,
            )
        } else {
            None
        };
        Ok(Self {
            pool,
            level: config.compression.level(),
        })
    }

    /// The zlib level grains are compressed with.
    pub fn compression_level(&self) -> u32 {
        self.level
    }

    /// Classifies and compresses a batch of grains, preserving input order.
    pub fn encode_batch(&self, grains: &[Vec<u8>]) -> Result<Vec<EncodedGrain>> {
        let level = self.level;
        let run = || {
            grains
                .par_iter()
                .map(|grain| encode_grain(grain, level))
                .collect::<Result<Vec<_>>>()
        };
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmdk::geometry::GRAIN_SIZE_BYTES;

    const GRAIN: usize = GRAIN_SIZE_BYTES as usize;

    #[test]
    fn test_compression_level_mapping() {
        assert_eq!(CompressionLevel::Fast.level(), 1);
        assert_eq!(CompressionLevel::Balanced.level(), 6);
        assert_eq!(CompressionLevel::Max.level(), 9);
        assert_eq!(CompressionLevel::default(), CompressionLevel::Fast);
    }

    #[test]
    fn test_encode_batch_preserves_order() {
        let mut grains = Vec::new();
        for i in 0..8u8 {
            let byte = if i % 2 == 0 { 0 } else { i };
            grains.push(vec![byte; GRAIN]);
        }

        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let encoded = pipeline.encode_batch(&grains).unwrap();
        assert_eq!(encoded.len(), 8);
        for (i, grain) in encoded.iter().enumerate() {
            if i % 2 == 0 {
                assert_eq!(*grain, EncodedGrain::Zero);
            } else {
                assert!(matches!(grain, EncodedGrain::Compressed(_)));
            }
        }
    }

    #[test]
    fn test_encode_batch_matches_sequential() {
        let mut grains = Vec::new();
        for i in 0..4usize {
            let mut grain = vec![0u8; GRAIN];
            for (j, byte) in grain.iter_mut().enumerate() {
                *byte = ((i * 7 + j * 13) % 256) as u8;
            }
            grains.push(grain);
        }

        let pipeline = Pipeline::new(PipelineConfig::new(CompressionLevel::Fast, 2)).unwrap();
        let parallel = pipeline.encode_batch(&grains).unwrap();
        let sequential: Vec<_> = grains
            .iter()
            .map(|g| crate::vmdk::grain::encode_grain(g, 1).unwrap())
            .collect();
        assert_eq!(parallel, sequential);
    }
}
