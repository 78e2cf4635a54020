//! Glob patterns over forward-slash relative paths.
//!
//! `**` matches any number of path segments, `*` any run of characters
//! within one segment and `?` a single character. Directory paths carry a
//! trailing slash. Without a `**` segment a pattern only matches a
//! directory if it ends in `/` as well, and a pattern ending in `/` only
//! ever matches directories. A pattern ending in `/**` also matches the
//! directory it names.

use std::fmt;

use globset::{GlobBuilder, GlobMatcher};

use crate::error::Result;

/// One compiled path pattern.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    matcher: GlobMatcher,
    /// Matches the directory named by a trailing `/**`.
    base: Option<GlobMatcher>,
    /// Pattern ends in `/`.
    dirs_only: bool,
    /// Pattern has no `**` segment, so the trailing slash must agree.
    exact_depth: bool,
}

impl PathPattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns `Pattern` if the glob is malformed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use treesync::PathPattern;
    ///
    /// let pattern = PathPattern::new("src/**/*.txt").unwrap();
    /// assert!(pattern.matches("src/a.txt"));
    /// assert!(pattern.matches("src/main/root/b.txt"));
    /// assert!(!pattern.matches("other/a.txt"));
    /// assert!(!PathPattern::new("src/*").unwrap().matches("src/main/"));
    /// ```
    pub fn new(pattern: &str) -> Result<Self> {
        let dirs_only = pattern.len() > 1 && pattern.ends_with('/');
        let normalized = normalize(pattern);
        let matcher = compile(&normalized)?;
        let base = match normalized.strip_suffix("/**") {
            Some(prefix) if !prefix.is_empty() => Some(compile(prefix)?),
            _ => None,
        };
        let exact_depth = !normalized.split('/').any(|segment| segment == "**");
        Ok(Self {
            raw: pattern.to_string(),
            matcher,
            base,
            dirs_only,
            exact_depth,
        })
    }

    /// Test a relative path. Directory paths end in `/`.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let is_dir = path.ends_with('/');
        let stem = path.trim_end_matches('/');
        if is_dir && self.base.as_ref().is_some_and(|b| b.is_match(stem)) {
            return true;
        }
        if self.dirs_only && !is_dir {
            return false;
        }
        if self.exact_depth && is_dir != self.dirs_only {
            return false;
        }
        self.matcher.is_match(stem)
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn compile(glob: &str) -> Result<GlobMatcher> {
    Ok(GlobBuilder::new(glob)
        .literal_separator(true)
        .backslash_escape(true)
        .build()?
        .compile_matcher())
}

/// Drop outer slashes and demote `**` that shares a segment with other
/// characters (as in `**.txt`) to `*`.
fn normalize(pattern: &str) -> String {
    pattern
        .trim_matches('/')
        .split('/')
        .map(|segment| {
            if segment != "**" && segment.contains("**") {
                let mut demoted = segment.to_string();
                while demoted.contains("**") {
                    demoted = demoted.replace("**", "*");
                }
                demoted
            } else {
                segment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
