//! Checksum index for block matching.
//!
//! Two-level lookup: first by weak checksum (fast), then by strong digest
//! (verification). Several basis blocks may share a weak checksum, so each
//! weak value maps to a bucket rather than a single block.

use rustc_hash::FxHashMap;

use crate::config::Configuration;
use crate::hash::StrongSum;
use crate::signature::Signature;

#[derive(Debug, Clone, Copy)]
struct Entry {
    strong: StrongSum,
    offset: u64,
    length: u32,
}

/// Lookup table built once from a basis signature.
#[derive(Debug)]
pub struct ChecksumIndex {
    /// Uses `FxHashMap` for fast lookups with integer keys.
    buckets: FxHashMap<u32, Vec<Entry>>,
    entries: usize,
}

impl ChecksumIndex {
    /// Build an index from a signature, preserving its block order in each bucket.
    #[must_use]
    pub fn new(signature: &Signature) -> Self {
        let mut buckets: FxHashMap<u32, Vec<Entry>> =
            FxHashMap::with_capacity_and_hasher(signature.len(), rustc_hash::FxBuildHasher);

        for pair in &signature.pairs {
            buckets.entry(pair.weak).or_default().push(Entry {
                strong: pair.strong,
                offset: pair.offset,
                length: pair.length,
            });
        }

        Self {
            buckets,
            entries: signature.len(),
        }
    }

    /// Find the basis offset of a block equal to `window`.
    ///
    /// The strong digest of `window` is only computed when `weak` hits a
    /// bucket. Blocks shorter than `window` never match, so a returned
    /// offset always has `window.len()` readable bytes behind it.
    #[must_use]
    pub fn lookup(&self, weak: u32, window: &[u8], config: &Configuration) -> Option<u64> {
        let bucket = self.buckets.get(&weak)?;
        let strong = config.strong_sum(window);
        bucket
            .iter()
            .find(|entry| entry.strong == strong && entry.length as usize >= window.len())
            .map(|entry| entry.offset)
    }

    /// Check whether any block has this weak checksum.
    #[must_use]
    pub fn contains_weak(&self, weak: u32) -> bool {
        self.buckets.contains_key(&weak)
    }

    /// Number of indexed blocks.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries
    }

    /// True for an index over an empty signature.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Number of distinct weak checksums.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
