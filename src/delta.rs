//! Delta model describing a new file in terms of a basis file.
//!
//! A delta sequence is ordered by write offset and, concatenated, covers
//! the new file from byte zero to its end without gaps or overlaps.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// One instruction for rebuilding the new file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delta {
    /// New bytes not found in the basis.
    Literal {
        /// Position in the new file.
        write_offset: u64,
        /// Raw bytes to write.
        data: Vec<u8>,
    },
    /// A range of the basis, relocated to `write_offset`.
    CopyRange {
        /// Position in the basis file.
        old_offset: u64,
        /// Position in the new file.
        write_offset: u64,
        /// Number of bytes.
        len: u32,
    },
}

impl Delta {
    /// Create a literal delta.
    #[must_use]
    pub fn literal(write_offset: u64, data: impl Into<Vec<u8>>) -> Self {
        Self::Literal {
            write_offset,
            data: data.into(),
        }
    }

    /// Create a copy delta.
    #[must_use]
    pub const fn copy(old_offset: u64, write_offset: u64, len: u32) -> Self {
        Self::CopyRange {
            old_offset,
            write_offset,
            len,
        }
    }

    /// Position in the new file.
    #[must_use]
    pub const fn write_offset(&self) -> u64 {
        match self {
            Self::Literal { write_offset, .. } | Self::CopyRange { write_offset, .. } => {
                *write_offset
            }
        }
    }

    /// Number of bytes this delta contributes to the new file.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Literal { data, .. } => data.len() as u64,
            Self::CopyRange { len, .. } => u64::from(*len),
        }
    }

    /// True for a zero-length delta.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset one past the last byte written.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.write_offset() + self.len()
    }

    /// Check if this is a copy.
    #[must_use]
    pub const fn is_copy(&self) -> bool {
        matches!(self, Self::CopyRange { .. })
    }

    /// Check if this is a literal.
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        matches!(self, Self::Literal { .. })
    }
}

/// Check that `deltas` start at zero and are contiguous.
///
/// Returns the length of the file they describe.
///
/// # Errors
///
/// Returns `DeltaOrder` at the first delta that does not start where the
/// previous one ended.
pub fn validate_sequence(deltas: &[Delta]) -> Result<u64> {
    let mut expected = 0;
    for delta in deltas {
        let found = delta.write_offset();
        if found != expected {
            return Err(SyncError::DeltaOrder { expected, found });
        }
        expected = delta.end();
    }
    Ok(expected)
}

/// Statistics about a delta sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DeltaStats {
    /// Number of copy operations.
    pub copy_ops: usize,
    /// Number of literal operations.
    pub literal_ops: usize,
    /// Total bytes copied from basis.
    pub bytes_copied: u64,
    /// Total literal bytes.
    pub bytes_literal: u64,
}

impl DeltaStats {
    /// Compute statistics from a delta sequence.
    #[must_use]
    pub fn from_deltas(deltas: &[Delta]) -> Self {
        deltas.iter().fold(Self::default(), |mut stats, delta| {
            match delta {
                Delta::Literal { data, .. } => {
                    stats.literal_ops += 1;
                    stats.bytes_literal += data.len() as u64;
                }
                Delta::CopyRange { len, .. } => {
                    stats.copy_ops += 1;
                    stats.bytes_copied += u64::from(*len);
                }
            }
            stats
        })
    }

    /// Length of the rebuilt file.
    #[must_use]
    pub const fn file_size(&self) -> u64 {
        self.bytes_copied + self.bytes_literal
    }

    /// Share of the file reused from the basis (0.0-1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> f64 {
        let total = self.file_size();
        if total == 0 {
            return 1.0;
        }
        self.bytes_copied as f64 / total as f64
    }

    /// Literal bytes as a rounded percentage of the file size.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn literal_percent(&self) -> u32 {
        let total = self.file_size();
        if total == 0 {
            return 0;
        }
        (self.bytes_literal as f64 * 100.0 / total as f64).round() as u32
    }
}
