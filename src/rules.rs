//! Batch rules loaded from TOML.
//!
//! ```toml
//! [[rule]]
//! kind = "exclude"
//! pattern = "**/*.tmp"
//!
//! [[rule]]
//! kind = "copy"
//! pattern = "**"
//! source_base = "src/main"
//! target_base = "lib"
//!
//! [[rule]]
//! kind = "retain"
//! pattern = "keep/**"
//! ```
//!
//! Rules apply in file order.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// One batch rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Rule {
    /// Copy matching source paths.
    Copy {
        /// Glob over source paths (relative to `source_base` if given).
        pattern: String,
        /// Source directory the pattern is relative to.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_base: Option<String>,
        /// Target directory replacing `source_base`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_base: Option<String>,
        /// New name for every copied path.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rename: Option<String>,
    },
    /// Hide matching source paths from the batch.
    Exclude {
        /// Glob over source paths.
        pattern: String,
    },
    /// Drop matching directory actions.
    Prune {
        /// Glob over source directory paths.
        pattern: String,
    },
    /// Never erase matching target paths.
    Retain {
        /// Glob over target paths.
        pattern: String,
    },
}

impl Rule {
    /// A plain `copy` rule.
    #[must_use]
    pub fn copy(pattern: impl Into<String>) -> Self {
        Self::Copy {
            pattern: pattern.into(),
            source_base: None,
            target_base: None,
            rename: None,
        }
    }

    /// The rule's glob.
    #[must_use]
    pub fn pattern(&self) -> &str {
        match self {
            Self::Copy { pattern, .. }
            | Self::Exclude { pattern }
            | Self::Prune { pattern }
            | Self::Retain { pattern } => pattern,
        }
    }
}

/// Ordered rule list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Rules in application order.
    #[serde(rename = "rule", default)]
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// Parse rules from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the text is not a valid rule file.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Load rules from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or `Config` if it
    /// does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_toml(&fs::read_to_string(path)?)
    }

    /// Render as TOML.
    ///
    /// # Errors
    ///
    /// Returns `Config` if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Append a rule.
    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
