//! Error types for treesync operations.

use thiserror::Error;

/// Errors that can occur during treesync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// I/O error during read/write operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid block length specified.
    #[error("Invalid block length: {0} (must be 1-16777216)")]
    InvalidBlockLength(usize),

    /// Strong digest length is zero or wider than the digest algorithm.
    #[error("Invalid digest length: {requested} (must be 1-{max})")]
    InvalidDigestLength {
        /// Requested truncation length
        requested: usize,
        /// Full width of the selected digest
        max: usize,
    },

    /// A binary stream did not start with the expected magic number.
    #[error("Bad magic: expected {expected:#010x}, found {found:#010x}")]
    BadMagic {
        /// Magic number the decoder was looking for
        expected: u32,
        /// Magic number actually read
        found: u32,
    },

    /// Unknown opcode in a delta stream.
    #[error("Bad opcode: {0:#04x}")]
    BadOpcode(u8),

    /// Delta stream ended without the end-of-stream opcode.
    #[error("Delta stream ended without end-of-stream opcode")]
    MissingEndOfStream,

    /// Stream ended in the middle of a record.
    #[error("Truncated stream")]
    Truncated,

    /// Offset too large for the 4-byte wire field.
    #[error("Offset {0} does not fit the wire format")]
    OffsetOverflow(u64),

    /// Delta contains invalid copy bounds.
    #[error("Invalid copy bounds: offset {offset} + len {len} exceeds basis size {basis_size}")]
    InvalidCopyBounds {
        /// Copy offset in basis file
        offset: u64,
        /// Copy length
        len: u32,
        /// Total basis file size
        basis_size: u64,
    },

    /// Delta sequence is not contiguous in write offset.
    #[error("Delta out of order: expected write offset {expected}, found {found}")]
    DeltaOrder {
        /// Write offset the next delta should start at
        expected: u64,
        /// Write offset the delta actually carried
        found: u64,
    },

    /// Invalid glob pattern.
    #[error("Pattern error: {0}")]
    Pattern(#[from] globset::Error),

    /// Copy base path is empty, absolute or contains wildcards.
    #[error("Invalid base path: {0:?}")]
    InvalidBase(String),

    /// Two actions map to the same target path.
    #[error("Target path collision: {}", describe_pairs(.0))]
    TargetCollision(Vec<(String, String)>),

    /// Signature fetch failed for one or more paths during prepare.
    #[error("Prepare failed for {} path(s): {}", .0.len(), describe_pairs(.0))]
    PrepareFailed(Vec<(String, String)>),

    /// One or more actions failed while continuing on error.
    #[error("Batch failed for {} path(s): {}", .0.len(), describe_pairs(.0))]
    BatchFailed(Vec<(String, String)>),

    /// Rule file could not be parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// Protocol error during remote operations.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Path does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Path exists but is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(String),
}

fn describe_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(left, right)| format!("{left} -> {right}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for treesync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
