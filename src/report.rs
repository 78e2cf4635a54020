//! Per-action outcome reporting.
//!
//! A batch tells its [`Reporter`] what happened to every path it touched,
//! as a `(source, target, remark)` triple. Target cleanups have an empty
//! source.

use std::fmt;
use std::io::Write;

use tracing::warn;

/// Outcome of one batch action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remark {
    /// Target was absent; the whole file was streamed.
    Copy,
    /// Target already had identical content.
    Match,
    /// Target was rebuilt purely from its own blocks.
    Shuffle,
    /// Target was patched; carries literal bytes as a percentage of the file.
    Rewrite(u32),
    /// Directory action, no I/O.
    Dir,
    /// Stale target path was erased.
    Prune,
    /// Two actions share a target path.
    Collision,
    /// The action failed.
    Error(String),
}

impl Remark {
    /// Whether this remark reports a failure.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Collision | Self::Error(_))
    }
}

impl fmt::Display for Remark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy => f.write_str("<copy>"),
            Self::Match => f.write_str("<match>"),
            Self::Shuffle => f.write_str("<shuffle>"),
            Self::Rewrite(percent) => write!(f, "<rewrite {percent:02}%>"),
            Self::Dir => f.write_str("<dir>"),
            Self::Prune => f.write_str("<prune>"),
            Self::Collision => f.write_str("Target path collision"),
            Self::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// Receiver of batch outcomes.
pub trait Reporter {
    /// Record what happened to `source` copied as `target`.
    fn report(&mut self, source: &str, target: &str, remark: &Remark);
}

impl<F: FnMut(&str, &str, &Remark)> Reporter for F {
    fn report(&mut self, source: &str, target: &str, remark: &Remark) {
        self(source, target, remark);
    }
}

/// Prints one line per action: the remark padded to ten columns, then
/// `source -> target`.
#[derive(Debug)]
pub struct ConsoleReporter<W: Write> {
    out: W,
}

impl<W: Write> ConsoleReporter<W> {
    /// Report into `out`.
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    /// Recover the sink.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl ConsoleReporter<std::io::Stdout> {
    /// Report to standard output.
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> Reporter for ConsoleReporter<W> {
    fn report(&mut self, source: &str, target: &str, remark: &Remark) {
        let line = format!("{:<10} {source} -> {target}", remark.to_string());
        if let Err(e) = writeln!(self.out, "{line}") {
            warn!(error = %e, "cannot write report line");
        }
    }
}

/// Collects report lines as `source -> target remark`, with trailing
/// slashes dropped.
#[derive(Debug, Default, Clone)]
pub struct RecordingReporter {
    lines: Vec<String>,
}

impl RecordingReporter {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines recorded so far, in report order.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Take the recorded lines.
    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    /// Recorded lines, sorted.
    #[must_use]
    pub fn sorted(&self) -> Vec<String> {
        let mut lines = self.lines.clone();
        lines.sort();
        lines
    }
}

impl Reporter for RecordingReporter {
    fn report(&mut self, source: &str, target: &str, remark: &Remark) {
        self.lines.push(format!(
            "{} -> {} {remark}",
            source.trim_end_matches('/'),
            target.trim_end_matches('/')
        ));
    }
}
