//! Parties a batch reads from and writes to.
//!
//! A [`SyncParty`] exposes one directory tree through relative,
//! forward-slash paths, where the empty path is the tree root. The local
//! filesystem and a remote proxy both implement it, so the planner never
//! needs to know where the bytes live.

mod local;
mod remote;

use std::io::Write;

pub use local::LocalParty;
pub use remote::{serve, RemoteParty, RemoteWriter};

use crate::delta::Delta;
use crate::error::Result;
use crate::signature::Signature;

/// Operations a source or target tree must support.
///
/// Every method may fail with an I/O error.
pub trait SyncParty {
    /// Absolute location of `path`, for display.
    fn resolve_path(&self, path: &str) -> String;

    /// Names of the subdirectories of `path`, sorted. Empty if `path` is not a directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be read.
    fn list_directories(&self, path: &str) -> Result<Vec<String>>;

    /// Names of the files in `path`, sorted. Empty if `path` is not a directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be read.
    fn list_files(&self, path: &str) -> Result<Vec<String>>;

    /// Signature of the file at `path`; empty if there is no such file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file exists but cannot be read.
    fn read_signature(&self, path: &str) -> Result<Signature>;

    /// Create the directory `path` and its parents. Returns `true` if anything was created.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    fn make_path(&self, path: &str) -> Result<bool>;

    /// Open `path` for writing, truncating it and creating parent directories.
    ///
    /// Callers must `flush` the sink to observe write errors.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    fn open_for_write(&self, path: &str) -> Result<Box<dyn Write + '_>>;

    /// Copy the whole file at `path` into `sink`, returning the byte count.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading or writing fails.
    fn stream_to(&self, path: &str, sink: &mut dyn Write) -> Result<u64>;

    /// Match the file at `path` against a basis signature.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    fn prepare_delta(&self, path: &str, signature: &Signature) -> Result<Vec<Delta>>;

    /// Rebuild the file at `path` from its current content and `deltas`.
    ///
    /// # Errors
    ///
    /// Returns an error if the deltas are invalid for the current content
    /// or the file cannot be replaced.
    fn apply_delta(&self, path: &str, deltas: &[Delta]) -> Result<()>;

    /// Delete the file at `path`. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be removed.
    fn erase_file(&self, path: &str) -> Result<()>;

    /// Delete the directory at `path` recursively. A missing directory is not an error.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be removed.
    fn erase_directory(&self, path: &str) -> Result<()>;
}

/// Join a relative directory and an entry name.
pub(crate) fn join_path(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
