//! Engine configuration.
//!
//! Both parties of a transfer must use the same configuration: a signature
//! built with one block length cannot be matched against with another.

use serde::{Deserialize, Serialize};

use crate::checksum::{RollingChecksum, WeakAlgorithm};
use crate::error::{Result, SyncError};
use crate::hash::{StrongAlgorithm, StrongSum};

/// Checksum parameters shared by the signature and matching sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Block length for signature generation.
    pub block_length: usize,
    /// Strong digest truncation length in bytes.
    pub strong_len: usize,
    /// Optional seed appended to every block before strong digesting.
    pub seed: Option<Vec<u8>>,
    /// Weak checksum flavour.
    pub weak: WeakAlgorithm,
    /// Strong digest algorithm.
    pub strong: StrongAlgorithm,
}

impl Configuration {
    /// Default block length.
    pub const DEFAULT_BLOCK_LENGTH: usize = 2048;
    /// Default strong digest length.
    pub const DEFAULT_STRONG_LEN: usize = 8;
    /// Largest accepted block length.
    pub const MAX_BLOCK_LENGTH: usize = 1 << 24;

    /// Start building a configuration from the defaults.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Check the block length and digest length bounds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBlockLength` or `InvalidDigestLength`.
    pub fn validate(&self) -> Result<()> {
        if self.block_length == 0 || self.block_length > Self::MAX_BLOCK_LENGTH {
            return Err(SyncError::InvalidBlockLength(self.block_length));
        }
        let max = self.strong.digest_len();
        if self.strong_len == 0 || self.strong_len > max {
            return Err(SyncError::InvalidDigestLength {
                requested: self.strong_len,
                max,
            });
        }
        Ok(())
    }

    /// Fresh rolling checksum sized for one block.
    #[must_use]
    pub fn rolling(&self) -> RollingChecksum {
        RollingChecksum::new(self.weak, self.block_length)
    }

    /// Weak checksum of a whole block.
    #[must_use]
    pub fn weak_sum(&self, data: &[u8]) -> u32 {
        let mut rolling = RollingChecksum::new(self.weak, data.len());
        rolling.check(data);
        rolling.value()
    }

    /// Seeded, truncated strong digest of a block.
    #[must_use]
    pub fn strong_sum(&self, data: &[u8]) -> StrongSum {
        StrongSum::compute(self.strong, data, self.seed.as_deref(), self.strong_len)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            block_length: Self::DEFAULT_BLOCK_LENGTH,
            strong_len: Self::DEFAULT_STRONG_LEN,
            seed: None,
            weak: WeakAlgorithm::default(),
            strong: StrongAlgorithm::default(),
        }
    }
}

/// Builder for [`Configuration`].
///
/// # Example
///
/// ```rust
/// use treesync::{Configuration, StrongAlgorithm};
///
/// let config = Configuration::builder()
///     .block_length(700)
///     .strong_algorithm(StrongAlgorithm::Blake3)
///     .strong_len(16)
///     .build()
///     .unwrap();
/// assert_eq!(config.block_length, 700);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Configuration,
}

impl ConfigBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the block length. Any positive length up to 16 MiB is accepted.
    #[must_use]
    pub fn block_length(mut self, length: usize) -> Self {
        self.config.block_length = length;
        self
    }

    /// Set the strong digest truncation length.
    #[must_use]
    pub fn strong_len(mut self, len: usize) -> Self {
        self.config.strong_len = len;
        self
    }

    /// Set the checksum seed.
    #[must_use]
    pub fn seed(mut self, seed: impl Into<Vec<u8>>) -> Self {
        self.config.seed = Some(seed.into());
        self
    }

    /// Select the weak checksum flavour.
    #[must_use]
    pub fn weak_algorithm(mut self, algorithm: WeakAlgorithm) -> Self {
        self.config.weak = algorithm;
        self
    }

    /// Select the strong digest algorithm.
    #[must_use]
    pub fn strong_algorithm(mut self, algorithm: StrongAlgorithm) -> Self {
        self.config.strong = algorithm;
        self
    }

    /// Validate and return the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBlockLength` or `InvalidDigestLength` when a bound is violated.
    pub fn build(self) -> Result<Configuration> {
        self.config.validate()?;
        Ok(self.config)
    }
}
