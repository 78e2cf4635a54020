//! Rolling checksum implementation for block matching.
//!
//! This module implements the weak 32-bit checksum used to find candidate
//! block boundaries. The checksum keeps its own copy of the window so that
//! `roll` and `trim` know which byte leaves the window, giving O(1) slides.

use serde::{Deserialize, Serialize};

/// Weak checksum flavour.
///
/// Both produce `(b << 16) | a` where `a` is the sum of the window bytes and
/// `b` is the sum weighted by distance from the window end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeakAlgorithm {
    /// rsync checksum: each byte offset by 31, sums truncated to 16 bits.
    #[default]
    Rsync,
    /// Adler-32 variant: no offset, sums modulo 65521.
    Adler,
}

impl WeakAlgorithm {
    /// Constant added to every byte before summing.
    #[must_use]
    pub const fn char_offset(self) -> u32 {
        match self {
            Self::Rsync => 31,
            Self::Adler => 0,
        }
    }

    /// Modulus applied to both sums.
    #[must_use]
    pub const fn modulus(self) -> u32 {
        match self {
            Self::Rsync => 1 << 16,
            // Largest prime less than 2^16 for good distribution.
            Self::Adler => 65521,
        }
    }
}

/// Rolling checksum state over a sliding window.
///
/// # Example
///
/// ```rust
/// use treesync::{RollingChecksum, WeakAlgorithm};
///
/// let mut rolling = RollingChecksum::new(WeakAlgorithm::Rsync, 4);
/// rolling.check(b"abcd");
/// rolling.roll(b'e'); // now "bcde"
///
/// let mut fresh = RollingChecksum::new(WeakAlgorithm::Rsync, 4);
/// fresh.check(b"bcde");
/// assert_eq!(rolling.value(), fresh.value());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollingChecksum {
    algorithm: WeakAlgorithm,
    /// Sum of all (offset) bytes in window
    a: u32,
    /// Weighted sum: sum of (`count` - i) * byte\[i\]
    b: u32,
    /// Ring buffer holding the window bytes
    window: Vec<u8>,
    /// Index of the oldest byte in `window`
    head: usize,
    /// Bytes currently in the window
    count: usize,
}

impl RollingChecksum {
    /// Create an empty checksum whose window holds up to `capacity` bytes.
    ///
    /// The window grows past `capacity` only through [`push`](Self::push)
    /// or a larger [`check`](Self::check).
    #[must_use]
    pub fn new(algorithm: WeakAlgorithm, capacity: usize) -> Self {
        Self {
            algorithm,
            a: 0,
            b: 0,
            window: vec![0; capacity.max(1)],
            head: 0,
            count: 0,
        }
    }

    /// Clear the window and both sums.
    pub fn reset(&mut self) {
        self.a = 0;
        self.b = 0;
        self.head = 0;
        self.count = 0;
    }

    /// Recompute the checksum from scratch over `data`, which becomes the window.
    #[allow(clippy::cast_possible_truncation)]
    pub fn check(&mut self, data: &[u8]) {
        if data.len() > self.window.len() {
            self.window.resize(data.len(), 0);
        }
        let modulus = u64::from(self.algorithm.modulus());
        let offset = u64::from(self.algorithm.char_offset());
        let mut a: u64 = 0;
        let mut b: u64 = 0;
        for &byte in data {
            a = (a + u64::from(byte) + offset) % modulus;
            b = (b + a) % modulus;
        }
        self.window[..data.len()].copy_from_slice(data);
        self.head = 0;
        self.count = data.len();
        // Both sums are reduced below the modulus, which fits in 17 bits.
        self.a = a as u32;
        self.b = b as u32;
    }

    /// Slide the window by one byte: drop the oldest byte and append `byte`.
    ///
    /// On an empty window this is the same as [`push`](Self::push).
    #[inline]
    pub fn roll(&mut self, byte: u8) {
        if self.count == 0 {
            self.push(byte);
            return;
        }
        let capacity = self.window.len();
        let old = self.window[self.head];
        let tail = (self.head + self.count) % capacity;
        self.window[tail] = byte;
        self.head = (self.head + 1) % capacity;

        let old = self.term(old);
        let new = self.term(byte);
        self.a = self.sub(self.add(self.a, new), old);
        let weighted = self.weighted(old);
        self.b = self.add(self.sub(self.b, weighted), self.a);
    }

    /// Drop the oldest byte without adding a new one.
    #[inline]
    pub fn trim(&mut self) {
        if self.count == 0 {
            return;
        }
        let old = self.term(self.window[self.head]);
        let weighted = self.weighted(old);
        self.a = self.sub(self.a, old);
        self.b = self.sub(self.b, weighted);
        self.head = (self.head + 1) % self.window.len();
        self.count -= 1;
    }

    /// Append a byte, growing the window by one.
    #[inline]
    pub fn push(&mut self, byte: u8) {
        if self.count == self.window.len() {
            let mut grown = self.contents();
            grown.push(byte);
            self.check(&grown);
            return;
        }
        let tail = (self.head + self.count) % self.window.len();
        self.window[tail] = byte;
        self.count += 1;
        let new = self.term(byte);
        self.a = self.add(self.a, new);
        self.b = self.add(self.b, self.a);
    }

    /// Get the combined 32-bit checksum: `(b << 16) | a`.
    #[inline]
    #[must_use]
    pub const fn value(&self) -> u32 {
        (self.b << 16) | self.a
    }

    /// Bytes currently in the window, oldest first.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        (0..self.count)
            .map(|i| self.window[(self.head + i) % self.window.len()])
            .collect()
    }

    /// Get the current window size.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Check if the window is empty.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Algorithm this checksum computes.
    #[must_use]
    pub const fn algorithm(&self) -> WeakAlgorithm {
        self.algorithm
    }

    #[inline]
    fn term(&self, byte: u8) -> u32 {
        (u32::from(byte) + self.algorithm.char_offset()) % self.algorithm.modulus()
    }

    /// `count * term` reduced by the modulus.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn weighted(&self, term: u32) -> u32 {
        let modulus = u64::from(self.algorithm.modulus());
        ((self.count as u64 % modulus) * u64::from(term) % modulus) as u32
    }

    #[inline]
    fn add(&self, x: u32, y: u32) -> u32 {
        (x + y) % self.algorithm.modulus()
    }

    #[inline]
    fn sub(&self, x: u32, y: u32) -> u32 {
        let modulus = self.algorithm.modulus();
        (x + modulus - y % modulus) % modulus
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn algorithms() -> impl Strategy<Value = WeakAlgorithm> {
        prop_oneof![Just(WeakAlgorithm::Rsync), Just(WeakAlgorithm::Adler)]
    }

    proptest! {
        /// Rolling through data equals recomputing each window from scratch
        #[test]
        fn rolling_equals_recompute(
            algorithm in algorithms(),
            data in prop::collection::vec(any::<u8>(), 2..600),
            window in 1usize..64
        ) {
            let window = window.min(data.len() - 1);
            let mut rolling = RollingChecksum::new(algorithm, window);
            rolling.check(&data[..window]);

            for i in window..data.len() {
                rolling.roll(data[i]);
                let mut fresh = RollingChecksum::new(algorithm, window);
                fresh.check(&data[i + 1 - window..=i]);
                prop_assert_eq!(rolling.value(), fresh.value());
            }
        }

        /// Trimming equals recomputing over the shorter suffix
        #[test]
        fn trim_equals_recompute(
            algorithm in algorithms(),
            data in prop::collection::vec(any::<u8>(), 1..300)
        ) {
            let mut rolling = RollingChecksum::new(algorithm, data.len());
            rolling.check(&data);
            for start in 1..=data.len() {
                rolling.trim();
                let mut fresh = RollingChecksum::new(algorithm, data.len());
                fresh.check(&data[start..]);
                prop_assert_eq!(rolling.value(), fresh.value());
            }
        }

        /// Pushing byte by byte equals a single check
        #[test]
        fn push_equals_check(
            algorithm in algorithms(),
            data in prop::collection::vec(any::<u8>(), 0..500)
        ) {
            let mut pushed = RollingChecksum::new(algorithm, 8);
            for &byte in &data {
                pushed.push(byte);
            }
            let mut checked = RollingChecksum::new(algorithm, 8);
            checked.check(&data);
            prop_assert_eq!(pushed.value(), checked.value());
        }
    }
}
