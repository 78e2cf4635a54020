//! # treesync
//!
//! rsync-style delta transfer and batch directory tree synchronization.
//!
//! The delta engine turns a basis file into a block [`Signature`], matches
//! a new file against it with an O(1) rolling checksum, and emits an
//! ordered sequence of [`Delta`]s that rebuild the new file from the basis.
//! On top of it, a [`Batch`] plans and runs a whole-tree sync between two
//! [`SyncParty`] implementations, local or remote.
//!
//! ## Features
//!
//! - **Rolling Checksum**: rsync or Adler-32 weak sums with O(1) window sliding
//! - **Strong Digest**: truncated MD5 or BLAKE3, optionally seeded
//! - **Streaming Matcher**: deltas produced lazily from any reader
//! - **Binary Codec**: rdiff-compatible signature and delta streams
//! - **Batch Planner**: glob rules, stale target erasure, collision checks
//!
//! ## Example
//!
//! ```rust
//! use std::io::Cursor;
//! use treesync::{make_deltas, rebuild, Configuration, SeekBasis, Signature};
//!
//! let config = Configuration::builder().block_length(8).build().unwrap();
//!
//! // Signature of the old content
//! let basis = b"the quick brown fox jumps over the lazy dog";
//! let signature = Signature::generate(Cursor::new(basis.as_slice()), &config).unwrap();
//!
//! // Deltas of the new content against it
//! let source = b"the quick brown cat jumps over the lazy dog";
//! let deltas = make_deltas(&config, &signature, Cursor::new(source.as_slice())).unwrap();
//!
//! // Rebuild
//! let mut basis = SeekBasis::new(Cursor::new(basis.as_slice())).unwrap();
//! let mut output = Vec::new();
//! rebuild(&mut basis, &deltas, &mut output).unwrap();
//! assert_eq!(output, source);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

mod batch;
mod checksum;
pub mod codec;
mod config;
mod delta;
mod error;
mod hash;
mod index;
mod matcher;
mod pattern;
mod rebuild;
mod report;
mod rules;
mod signature;
mod transport;

pub use batch::{Batch, BatchSummary, CopyGroup, ErrorPolicy};
pub use checksum::{RollingChecksum, WeakAlgorithm};
pub use codec::{read_deltas, write_deltas, DeltaReader, DeltaWriter};
pub use config::{ConfigBuilder, Configuration};
pub use delta::{validate_sequence, Delta, DeltaStats};
pub use error::{Result, SyncError};
pub use hash::{StrongAlgorithm, StrongSum, MAX_STRONG_LEN};
pub use index::ChecksumIndex;
pub use matcher::{make_deltas, DeltaStream, Matcher};
pub use pattern::PathPattern;
pub use rebuild::{rebuild, rebuild_file, Basis, MappedBasis, SeekBasis, MAP_LIMIT, MAP_WINDOW};
pub use report::{ConsoleReporter, RecordingReporter, Remark, Reporter};
pub use rules::{Rule, RuleSet};
pub use signature::{ChecksumPair, Generator, Signature};
pub use transport::{serve, LocalParty, RemoteParty, RemoteWriter, SyncParty};
