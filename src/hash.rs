//! Strong digest used to confirm weak checksum hits.
//!
//! A weak hit is only a candidate; the block is matched once its strong
//! digest, truncated to the configured length, agrees as well. MD5 is the
//! historical rsync choice, BLAKE3 is available for wider digests.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Widest digest any algorithm produces.
pub const MAX_STRONG_LEN: usize = 32;

/// Strong digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrongAlgorithm {
    /// 128-bit MD5.
    #[default]
    Md5,
    /// 256-bit BLAKE3.
    Blake3,
}

impl StrongAlgorithm {
    /// Full digest width in bytes.
    #[must_use]
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Blake3 => 32,
        }
    }
}

/// Truncated strong digest of one block.
///
/// # Example
///
/// ```rust
/// use treesync::{StrongAlgorithm, StrongSum};
///
/// let a = StrongSum::compute(StrongAlgorithm::Md5, b"hello world", None, 8);
/// let b = StrongSum::compute(StrongAlgorithm::Md5, b"hello world", None, 8);
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 8);
///
/// let salted = StrongSum::compute(StrongAlgorithm::Md5, b"hello world", Some(b"salt"), 8);
/// assert_ne!(a, salted);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrongSum {
    /// Digest bytes; everything past `len` stays zero.
    bytes: [u8; MAX_STRONG_LEN],
    len: u8,
}

impl StrongSum {
    /// Digest `data` followed by `seed`, keeping the first `len` bytes.
    ///
    /// `len` is clamped to the algorithm's digest width.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn compute(algorithm: StrongAlgorithm, data: &[u8], seed: Option<&[u8]>, len: usize) -> Self {
        let len = len.min(algorithm.digest_len());
        let mut bytes = [0u8; MAX_STRONG_LEN];
        match algorithm {
            StrongAlgorithm::Md5 => {
                let mut hasher = Md5::new();
                hasher.update(data);
                if let Some(seed) = seed {
                    hasher.update(seed);
                }
                bytes[..len].copy_from_slice(&hasher.finalize()[..len]);
            }
            StrongAlgorithm::Blake3 => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(data);
                if let Some(seed) = seed {
                    hasher.update(seed);
                }
                bytes[..len].copy_from_slice(&hasher.finalize().as_bytes()[..len]);
            }
        }
        // len <= 32
        Self { bytes, len: len as u8 }
    }

    /// Build from raw digest bytes, e.g. read off the wire.
    ///
    /// Returns `None` if `raw` is longer than [`MAX_STRONG_LEN`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        if raw.len() > MAX_STRONG_LEN {
            return None;
        }
        let mut bytes = [0u8; MAX_STRONG_LEN];
        bytes[..raw.len()].copy_from_slice(raw);
        Some(Self {
            bytes,
            len: raw.len() as u8,
        })
    }

    /// Digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    /// Digest length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// True for the zero-length digest.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Constant-time equality comparison.
    #[must_use]
    pub fn ct_eq(&self, other: &Self) -> bool {
        let mut result = self.len ^ other.len;
        for (a, b) in self.bytes.iter().zip(other.bytes.iter()) {
            result |= a ^ b;
        }
        result == 0
    }
}

impl std::fmt::Debug for StrongSum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StrongSum({self})")
    }
}

impl std::fmt::Display for StrongSum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.as_bytes() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for StrongSum {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // UNIT TESTS - Digest values
    // ==========================================================================

    #[test]
    fn md5_known_vector() {
        let sum = StrongSum::compute(StrongAlgorithm::Md5, b"", None, 16);
        assert_eq!(sum.to_string(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn md5_truncates() {
        let sum = StrongSum::compute(StrongAlgorithm::Md5, b"", None, 4);
        assert_eq!(sum.to_string(), "d41d8cd9");
        assert_eq!(sum.len(), 4);
    }

    #[test]
    fn blake3_matches_reference() {
        let sum = StrongSum::compute(StrongAlgorithm::Blake3, b"hello", None, 32);
        assert_eq!(sum.as_bytes(), blake3::hash(b"hello").as_bytes());
    }

    #[test]
    fn len_clamped_to_digest_width() {
        let sum = StrongSum::compute(StrongAlgorithm::Md5, b"abc", None, 32);
        assert_eq!(sum.len(), 16);
    }

    #[test]
    fn seed_is_appended() {
        let seeded = StrongSum::compute(StrongAlgorithm::Md5, b"abc", Some(b"def"), 16);
        let joined = StrongSum::compute(StrongAlgorithm::Md5, b"abcdef", None, 16);
        assert_eq!(seeded, joined);
    }

    #[test]
    fn from_slice_roundtrip() {
        let sum = StrongSum::compute(StrongAlgorithm::Blake3, b"data", None, 8);
        assert_eq!(StrongSum::from_slice(sum.as_bytes()), Some(sum));
        assert!(StrongSum::from_slice(&[0u8; 33]).is_none());
    }

    #[test]
    fn truncated_lengths_differ() {
        let short = StrongSum::compute(StrongAlgorithm::Md5, b"abc", None, 4);
        let long = StrongSum::compute(StrongAlgorithm::Md5, b"abc", None, 8);
        assert_ne!(short, long);
        assert!(!short.ct_eq(&long));
    }

    #[test]
    fn ct_eq_agrees_with_eq() {
        let a = StrongSum::compute(StrongAlgorithm::Md5, b"one", None, 8);
        let b = StrongSum::compute(StrongAlgorithm::Md5, b"one", None, 8);
        let c = StrongSum::compute(StrongAlgorithm::Md5, b"two", None, 8);
        assert!(a.ct_eq(&b));
        assert!(!a.ct_eq(&c));
    }

    #[test]
    fn debug_shows_hex() {
        let sum = StrongSum::from_slice(&[0xab, 0xcd]).unwrap();
        assert_eq!(format!("{sum:?}"), "StrongSum(abcd)");
    }
}
