//! Signature generation for delta computation.
//!
//! A signature describes the basis file as one checksum pair per block. It
//! is built by the party holding the basis and shipped to the party holding
//! the new file, which matches against it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{ErrorKind, Read};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::Configuration;
use crate::error::Result;
use crate::hash::StrongSum;

/// Read size used when streaming files through the engine.
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Inputs above this size are hashed in parallel by [`Signature::from_bytes`].
const PARALLEL_THRESHOLD: usize = 64 * 1024;

/// Checksums of one basis block.
///
/// Two pairs are equal when their weak and strong sums agree; offset,
/// length and sequence are bookkeeping only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChecksumPair {
    /// Rolling checksum for fast filtering.
    pub weak: u32,
    /// Truncated strong digest for verification.
    pub strong: StrongSum,
    /// Offset of the block in the basis file.
    pub offset: u64,
    /// Block length; only the final block may be shorter.
    pub length: u32,
    /// Block index.
    pub sequence: u32,
}

impl ChecksumPair {
    /// Create a checksum pair.
    #[must_use]
    pub const fn new(weak: u32, strong: StrongSum, offset: u64, length: u32, sequence: u32) -> Self {
        Self {
            weak,
            strong,
            offset,
            length,
            sequence,
        }
    }

    /// Compute the pair for one block.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn compute(config: &Configuration, sequence: u32, offset: u64, block: &[u8]) -> Self {
        Self {
            weak: config.weak_sum(block),
            strong: config.strong_sum(block),
            offset,
            // Blocks never exceed the 16 MiB configuration bound.
            length: block.len() as u32,
            sequence,
        }
    }
}

impl PartialEq for ChecksumPair {
    fn eq(&self, other: &Self) -> bool {
        self.weak == other.weak && self.strong == other.strong
    }
}

impl Eq for ChecksumPair {}

impl Hash for ChecksumPair {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.weak.hash(state);
        self.strong.hash(state);
    }
}

impl fmt::Display for ChecksumPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "len={} offset={} weak={:08x} strong={}",
            self.length, self.offset, self.weak, self.strong
        )
    }
}

/// Complete signature of a basis file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Block length used during generation.
    pub block_length: usize,
    /// Strong digest length of every pair.
    pub strong_len: usize,
    /// One pair per block, in offset order.
    pub pairs: Vec<ChecksumPair>,
}

impl Signature {
    /// Create an empty signature for `config`, as for an absent basis file.
    #[must_use]
    pub const fn empty(config: &Configuration) -> Self {
        Self {
            block_length: config.block_length,
            strong_len: config.strong_len,
            pairs: Vec::new(),
        }
    }

    /// Generate a signature by streaming `reader` through a [`Generator`].
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading fails.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::io::Cursor;
    /// use treesync::{Configuration, Signature};
    ///
    /// let config = Configuration::builder().block_length(4).build().unwrap();
    /// let sig = Signature::generate(Cursor::new(b"abcdefghij"), &config).unwrap();
    /// assert_eq!(sig.len(), 3);
    /// assert_eq!(sig.pairs[2].length, 2);
    /// ```
    pub fn generate<R: Read>(mut reader: R, config: &Configuration) -> Result<Self> {
        let mut generator = Generator::new(config);
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => generator.update(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(generator.finish())
    }

    /// Generate a signature over an in-memory buffer.
    ///
    /// Large buffers are hashed block-parallel.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_bytes(data: &[u8], config: &Configuration) -> Self {
        let block_length = config.block_length;
        let compute = |(i, block): (usize, &[u8])| {
            ChecksumPair::compute(config, i as u32, (i * block_length) as u64, block)
        };
        let pairs = if data.len() > PARALLEL_THRESHOLD {
            data.par_chunks(block_length).enumerate().map(compute).collect()
        } else {
            data.chunks(block_length).enumerate().map(compute).collect()
        };
        Self {
            block_length,
            strong_len: config.strong_len,
            pairs,
        }
    }

    /// Number of blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// True when the basis was empty or absent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Basis length implied by the block lengths.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.pairs.iter().map(|p| u64::from(p.length)).sum()
    }
}

/// Incremental signature builder.
///
/// Feed bytes with [`update`](Self::update) in any chunking; a pair is
/// emitted each time a full block has accumulated, and
/// [`finish`](Self::finish) emits the trailing partial block.
#[derive(Debug)]
pub struct Generator<'c> {
    config: &'c Configuration,
    buffer: Vec<u8>,
    consumed: u64,
    pairs: Vec<ChecksumPair>,
}

impl<'c> Generator<'c> {
    /// Create a generator for `config`.
    #[must_use]
    pub fn new(config: &'c Configuration) -> Self {
        Self {
            config,
            buffer: Vec::with_capacity(config.block_length),
            consumed: 0,
            pairs: Vec::new(),
        }
    }

    /// Consume more input.
    pub fn update(&mut self, mut data: &[u8]) {
        let block_length = self.config.block_length;
        while !data.is_empty() {
            let take = (block_length - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == block_length {
                self.emit();
            }
        }
    }

    /// Flush any partial block and return the signature.
    #[must_use]
    pub fn finish(mut self) -> Signature {
        if !self.buffer.is_empty() {
            self.emit();
        }
        Signature {
            block_length: self.config.block_length,
            strong_len: self.config.strong_len,
            pairs: self.pairs,
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn emit(&mut self) {
        let sequence = self.pairs.len() as u32;
        let pair = ChecksumPair::compute(self.config, sequence, self.consumed, &self.buffer);
        self.consumed += self.buffer.len() as u64;
        self.pairs.push(pair);
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn config(block_length: usize) -> Configuration {
        Configuration::builder()
            .block_length(block_length)
            .build()
            .unwrap()
    }

    // ==========================================================================
    // UNIT TESTS - Checksum pairs
    // ==========================================================================

    #[test]
    fn pair_equality_ignores_position() {
        let config = config(4);
        let a = ChecksumPair::compute(&config, 0, 0, b"abcd");
        let b = ChecksumPair::compute(&config, 7, 28, b"abcd");
        assert_eq!(a, b);
        assert_ne!(a, ChecksumPair::compute(&config, 0, 0, b"abce"));
    }

    #[test]
    fn pair_display() {
        let config = config(4);
        let pair = ChecksumPair::compute(&config, 0, 8, b"abcd");
        let text = pair.to_string();
        assert!(text.starts_with("len=4 offset=8 weak="));
    }

    // ==========================================================================
    // UNIT TESTS - Generation
    // ==========================================================================

    #[test]
    fn signature_empty_input() {
        let sig = Signature::generate(Cursor::new(Vec::<u8>::new()), &config(4)).unwrap();
        assert!(sig.is_empty());
        assert_eq!(sig.file_size(), 0);
    }

    #[test]
    fn signature_exact_blocks() {
        let sig = Signature::generate(Cursor::new(b"aaaabbbbcccc"), &config(4)).unwrap();
        assert_eq!(sig.len(), 3);
        let offsets: Vec<u64> = sig.pairs.iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
        assert!(sig.pairs.iter().all(|p| p.length == 4));
    }

    #[test]
    fn signature_partial_final_block() {
        let sig = Signature::generate(Cursor::new(b"aaaabb"), &config(4)).unwrap();
        assert_eq!(sig.len(), 2);
        assert_eq!(sig.pairs[1].offset, 4);
        assert_eq!(sig.pairs[1].length, 2);
        assert_eq!(sig.file_size(), 6);
    }

    #[test]
    fn generator_chunking_is_irrelevant() {
        let config = config(5);
        let data: Vec<u8> = (0..97u8).collect();

        let mut bytewise = Generator::new(&config);
        for byte in &data {
            bytewise.update(std::slice::from_ref(byte));
        }
        let whole = Signature::from_bytes(&data, &config);
        assert_eq!(bytewise.finish(), whole);
    }

    #[test]
    fn sequences_are_consecutive() {
        let sig = Signature::from_bytes(&[7u8; 50], &config(8));
        let seqs: Vec<u32> = sig.pairs.iter().map(|p| p.sequence).collect();
        assert_eq!(seqs, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn parallel_path_matches_streaming() {
        let config = config(1000);
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let parallel = Signature::from_bytes(&data, &config);
        let streamed = Signature::generate(Cursor::new(&data), &config).unwrap();
        assert_eq!(parallel, streamed);
        assert_eq!(parallel.pairs[199].offset, 199_000);
    }

    #[test]
    fn empty_signature_carries_config() {
        let config = config(123);
        let sig = Signature::empty(&config);
        assert_eq!(sig.block_length, 123);
        assert_eq!(sig.strong_len, 8);
        assert!(sig.is_empty());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Signature block count is ceil(len / block_length)
        #[test]
        fn signature_block_count(
            data in prop::collection::vec(any::<u8>(), 0..10000),
            block_length in prop::sample::select(vec![1usize, 7, 512, 2048])
        ) {
            let config = Configuration::builder().block_length(block_length).build().unwrap();
            let sig = Signature::from_bytes(&data, &config);
            prop_assert_eq!(sig.len(), data.len().div_ceil(block_length));
            prop_assert_eq!(sig.file_size(), data.len() as u64);
        }
    }
}
