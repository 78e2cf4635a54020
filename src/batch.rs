//! Batch tree synchronization planner.
//!
//! A [`Batch`] snapshots the source tree, classifies its paths with glob
//! rules, plans the erasure of stale target paths, refuses to run if two
//! actions land on the same target, and finally transfers files through
//! the cheapest route: a full stream for new files, nothing for identical
//! ones, a delta for the rest.
//!
//! # Example
//!
//! ```rust,no_run
//! use treesync::{Batch, LocalParty, RecordingReporter};
//!
//! let source = LocalParty::new("/srv/app");
//! let target = LocalParty::new("/srv/mirror");
//!
//! let mut batch = Batch::start(&source).unwrap();
//! batch.source_exclude("**/*.tmp").unwrap();
//! batch.copy("**").unwrap();
//! batch.target_retain("logs/**").unwrap();
//!
//! let mut reporter = RecordingReporter::new();
//! let summary = batch.execute(&target, &mut reporter).unwrap();
//! println!("{summary}");
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::Write;
use std::ops::Bound;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::delta::DeltaStats;
use crate::error::{Result, SyncError};
use crate::pattern::PathPattern;
use crate::report::{Remark, Reporter};
use crate::rules::Rule;
use crate::signature::Signature;
use crate::transport::{join_path, SyncParty};

/// What `execute` does when a single action fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Report the failure and stop; earlier actions stay applied.
    #[default]
    Abort,
    /// Report every failure, finish the batch, then return `BatchFailed`.
    Continue,
}

/// Counters returned by a successful [`Batch::execute`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Files streamed whole.
    pub copied: usize,
    /// Files already identical.
    pub matched: usize,
    /// Files rebuilt only from their own blocks.
    pub shuffled: usize,
    /// Files patched with new data.
    pub rewritten: usize,
    /// Directory actions.
    pub directories: usize,
    /// Stale target paths erased.
    pub pruned: usize,
    /// Literal bytes sent in deltas.
    pub literal_bytes: u64,
    /// Bytes sent by whole-file streams.
    pub copied_bytes: u64,
}

impl BatchSummary {
    /// Bytes that crossed from source to target.
    #[must_use]
    pub const fn transferred_bytes(&self) -> u64 {
        self.literal_bytes + self.copied_bytes
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} copied, {} matched, {} shuffled, {} rewritten, {} dirs, {} pruned, {} bytes sent",
            self.copied,
            self.matched,
            self.shuffled,
            self.rewritten,
            self.directories,
            self.pruned,
            self.transferred_bytes()
        )
    }
}

#[derive(Debug, Clone)]
struct CopyAction {
    source_path: String,
    target_path: String,
    is_dir: bool,
    signature: Option<Signature>,
}

impl CopyAction {
    fn new(path: &str, is_dir: bool) -> Self {
        Self {
            source_path: path.to_string(),
            target_path: path.trim_start_matches('/').to_string(),
            is_dir,
            signature: None,
        }
    }

    /// A leading `/` names a path from the target root; anything else
    /// replaces the last segment of the source path.
    fn rename(&mut self, name: &str) {
        let mut target = if let Some(absolute) = name.strip_prefix('/') {
            absolute.to_string()
        } else {
            let trimmed = self.source_path.trim_end_matches('/');
            match trimmed.rfind('/') {
                Some(n) => format!("{}{name}", &trimmed[..=n]),
                None => name.to_string(),
            }
        };
        if self.is_dir && !target.ends_with('/') {
            target.push('/');
        }
        self.target_path = target;
    }
}

#[derive(Debug)]
enum Action {
    Clean { target_path: String, is_dir: bool },
    Copy(CopyAction),
}

impl Action {
    fn target_path(&self) -> &str {
        match self {
            Self::Clean { target_path, .. } => target_path,
            Self::Copy(copy) => &copy.target_path,
        }
    }

    fn source_path(&self) -> &str {
        match self {
            Self::Clean { .. } => "",
            Self::Copy(copy) => &copy.source_path,
        }
    }

    /// Target order, with erasures ahead of copies onto the same name so
    /// that a directory is gone before a file replaces it.
    fn sort_key(&self) -> (&str, u8) {
        let rank = match self {
            Self::Clean { .. } => 0,
            Self::Copy(_) => 1,
        };
        (self.target_path().trim_end_matches('/'), rank)
    }
}

/// Actions created by one `copy` call.
#[derive(Debug)]
pub struct CopyGroup<'b> {
    actions: &'b mut BTreeMap<String, CopyAction>,
    keys: Vec<String>,
}

impl CopyGroup<'_> {
    /// Give every action of this group a new target name.
    ///
    /// A name starting with `/` is a path from the target root; otherwise
    /// it replaces the last segment of each source path.
    #[must_use = "rename returns the group for chaining"]
    pub fn rename(self, name: &str) -> Self {
        for key in &self.keys {
            if let Some(action) = self.actions.get_mut(key) {
                action.rename(name);
            }
        }
        self
    }

    /// Source paths matched by the call.
    #[must_use]
    pub fn paths(&self) -> &[String] {
        &self.keys
    }

    /// Number of matched paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the call matched nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// One planned synchronization from a source party.
///
/// Directory paths carry a trailing `/`. A batch is consumed by
/// [`execute`](Self::execute).
pub struct Batch<'s, S: SyncParty + ?Sized> {
    source: &'s S,
    /// Unclassified source paths; the value tells directories apart.
    remainder: BTreeMap<String, bool>,
    /// Copy actions keyed by source path.
    actions: BTreeMap<String, CopyAction>,
    retain: Vec<PathPattern>,
    policy: ErrorPolicy,
}

impl<'s, S: SyncParty + ?Sized> Batch<'s, S> {
    /// Snapshot the full source tree.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if listing the source fails.
    pub fn start(source: &'s S) -> Result<Self> {
        let mut remainder = BTreeMap::new();
        collect_tree(source, "", &mut remainder)?;
        info!(
            root = %source.resolve_path(""),
            paths = remainder.len(),
            "batch started"
        );
        Ok(Self {
            source,
            remainder,
            actions: BTreeMap::new(),
            retain: Vec::new(),
            policy: ErrorPolicy::default(),
        })
    }

    /// Choose how `execute` handles a failing action.
    pub fn set_error_policy(&mut self, policy: ErrorPolicy) -> &mut Self {
        self.policy = policy;
        self
    }

    /// Current error policy.
    #[must_use]
    pub const fn error_policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Copy every unclassified source path matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `Pattern` if the glob is malformed.
    pub fn copy(&mut self, pattern: &str) -> Result<CopyGroup<'_>> {
        let pattern = PathPattern::new(pattern)?;
        let keys = self.take_matching(&pattern, |path| Some(path.to_string()));
        Ok(self.group(keys))
    }

    /// Copy paths matching `pattern` under `source_base`, placing them under
    /// `target_base` instead.
    ///
    /// A `source_base` of `.` disables rebasing. An empty `target_base`
    /// means the target root, in which case the base directory itself is
    /// left unclassified.
    ///
    /// # Errors
    ///
    /// Returns `InvalidBase` if `source_base` is empty, absolute or contains
    /// wildcards, and `Pattern` if the glob is malformed.
    pub fn copy_rebased(
        &mut self,
        source_base: &str,
        target_base: &str,
        pattern: &str,
    ) -> Result<CopyGroup<'_>> {
        if source_base == "." {
            return self.copy(pattern);
        }
        if source_base.trim().is_empty()
            || source_base.starts_with('/')
            || source_base.contains(|c: char| c == '*' || c == '?')
        {
            return Err(SyncError::InvalidBase(source_base.to_string()));
        }

        let source_base = source_base.trim_end_matches('/');
        let target_base = target_base.trim_matches('/');
        let pattern = PathPattern::new(&format!("{source_base}/{pattern}"))?;
        let keys = self.take_matching(&pattern, |path| {
            let rel = path
                .strip_prefix(source_base)
                .unwrap_or(path)
                .trim_start_matches('/');
            match (target_base.is_empty(), rel.is_empty()) {
                (true, true) => None,
                (true, false) => Some(rel.to_string()),
                (false, _) => Some(format!("{target_base}/{rel}")),
            }
        });
        Ok(self.group(keys))
    }

    /// Drop matching source paths from the batch: never copied, never
    /// erased.
    ///
    /// # Errors
    ///
    /// Returns `Pattern` if the glob is malformed.
    pub fn source_exclude(&mut self, pattern: &str) -> Result<()> {
        let pattern = PathPattern::new(pattern)?;
        let before = self.remainder.len();
        self.remainder.retain(|path, _| !pattern.matches(path));
        debug!(%pattern, excluded = before - self.remainder.len(), "source exclude");
        Ok(())
    }

    /// Drop directory actions matching `pattern`. Only affects paths
    /// already claimed by `copy`.
    ///
    /// # Errors
    ///
    /// Returns `Pattern` if the glob is malformed.
    pub fn source_prune(&mut self, pattern: &str) -> Result<()> {
        let pattern = PathPattern::new(pattern)?;
        self.actions
            .retain(|path, action| !(action.is_dir && pattern.matches(path)));
        Ok(())
    }

    /// Protect matching target paths from erasure.
    ///
    /// # Errors
    ///
    /// Returns `Pattern` if the glob is malformed.
    pub fn target_retain(&mut self, pattern: &str) -> Result<()> {
        self.retain.push(PathPattern::new(pattern)?);
        Ok(())
    }

    /// Apply one rule.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying rule method, or `Config` for a
    /// `target_base` without a `source_base`.
    pub fn apply(&mut self, rule: &Rule) -> Result<()> {
        match rule {
            Rule::Copy {
                pattern,
                source_base,
                target_base,
                rename,
            } => {
                let group = match (source_base, target_base) {
                    (Some(source_base), target_base) => self.copy_rebased(
                        source_base,
                        target_base.as_deref().unwrap_or(""),
                        pattern,
                    )?,
                    (None, Some(_)) => {
                        return Err(SyncError::Config(format!(
                            "copy rule {pattern:?} has target_base without source_base"
                        )))
                    }
                    (None, None) => self.copy(pattern)?,
                };
                if let Some(name) = rename {
                    let _ = group.rename(name);
                }
                Ok(())
            }
            Rule::Exclude { pattern } => self.source_exclude(pattern),
            Rule::Prune { pattern } => self.source_prune(pattern),
            Rule::Retain { pattern } => self.target_retain(pattern),
        }
    }

    /// Source paths not yet claimed by any rule.
    pub fn remainder(&self) -> impl Iterator<Item = &str> {
        self.remainder.keys().map(String::as_str)
    }

    /// Planned copies as `(source, target)` pairs, in source order.
    pub fn copies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.actions
            .values()
            .map(|action| (action.source_path.as_str(), action.target_path.as_str()))
    }

    /// Fetch every file's source signature ahead of `execute`.
    ///
    /// All fetches are attempted; failures are reported in source order.
    ///
    /// # Errors
    ///
    /// Returns `PrepareFailed` listing every path whose signature could not
    /// be read.
    pub fn prepare(&mut self, reporter: &mut dyn Reporter) -> Result<()>
    where
        S: Sync,
    {
        let source = self.source;
        let fetched: Vec<(String, Result<Signature>)> = self
            .actions
            .values()
            .filter(|action| !action.is_dir)
            .map(|action| action.source_path.clone())
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|path| {
                let signature = source.read_signature(&path);
                (path, signature)
            })
            .collect();

        let mut failures = Vec::new();
        for (path, signature) in fetched {
            let Some(action) = self.actions.get_mut(&path) else {
                continue;
            };
            match signature {
                Ok(signature) => action.signature = Some(signature),
                Err(e) => {
                    warn!(path = %path, error = %e, "signature fetch failed");
                    reporter.report(
                        &action.source_path,
                        &action.target_path,
                        &Remark::Error(e.to_string()),
                    );
                    failures.push((path, e.to_string()));
                }
            }
        }

        if failures.is_empty() {
            info!(files = self.actions.len(), "batch prepared");
            Ok(())
        } else {
            Err(SyncError::PrepareFailed(failures))
        }
    }

    /// Run the batch against `target`.
    ///
    /// Erasures and copies run in target path order after the plan is
    /// checked. On a target collision every colliding pair is reported and
    /// nothing is touched.
    ///
    /// # Errors
    ///
    /// Returns `TargetCollision` for conflicting actions; an I/O error on
    /// the first failing action under [`ErrorPolicy::Abort`], or
    /// `BatchFailed` listing all failures under [`ErrorPolicy::Continue`].
    pub fn execute<T: SyncParty + ?Sized>(
        mut self,
        target: &T,
        reporter: &mut dyn Reporter,
    ) -> Result<BatchSummary> {
        self.autoprune();
        self.check_collisions(reporter)?;

        let cleans = self.plan_erasure(target)?;
        let mut plan: Vec<Action> = cleans
            .into_iter()
            .chain(std::mem::take(&mut self.actions).into_values().map(Action::Copy))
            .collect();
        plan.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        info!(
            actions = plan.len(),
            target = %target.resolve_path(""),
            "executing batch"
        );

        let mut summary = BatchSummary::default();
        let mut failures = Vec::new();
        for action in plan {
            match self.perform(&action, target, &mut summary) {
                Ok(remark) => reporter.report(action.source_path(), action.target_path(), &remark),
                Err(e) => {
                    warn!(
                        source = action.source_path(),
                        target = action.target_path(),
                        error = %e,
                        "action failed"
                    );
                    reporter.report(
                        action.source_path(),
                        action.target_path(),
                        &Remark::Error(e.to_string()),
                    );
                    match self.policy {
                        ErrorPolicy::Abort => return Err(e),
                        ErrorPolicy::Continue => {
                            failures.push((action.target_path().to_string(), e.to_string()));
                        }
                    }
                }
            }
        }

        if failures.is_empty() {
            info!(%summary, "batch complete");
            Ok(summary)
        } else {
            Err(SyncError::BatchFailed(failures))
        }
    }

    fn take_matching(
        &mut self,
        pattern: &PathPattern,
        target_of: impl Fn(&str) -> Option<String>,
    ) -> Vec<String> {
        let matched: Vec<(String, bool, String)> = self
            .remainder
            .iter()
            .filter(|(path, _)| pattern.matches(path))
            .filter_map(|(path, is_dir)| Some((path.clone(), *is_dir, target_of(path)?)))
            .collect();

        let mut keys = Vec::with_capacity(matched.len());
        for (path, is_dir, target_path) in matched {
            self.remainder.remove(&path);
            let mut action = CopyAction::new(&path, is_dir);
            action.target_path = target_path;
            debug!(source = %path, target = %action.target_path, "copy");
            self.actions.insert(path.clone(), action);
            keys.push(path);
        }
        keys
    }

    fn group(&mut self, keys: Vec<String>) -> CopyGroup<'_> {
        CopyGroup {
            actions: &mut self.actions,
            keys,
        }
    }

    /// Drop directory actions whose creation is implied by a child action.
    fn autoprune(&mut self) {
        let parents: BTreeSet<String> = self
            .actions
            .keys()
            .filter_map(|path| {
                let trimmed = path.trim_end_matches('/');
                trimmed.rfind('/').map(|n| format!("{}/", &trimmed[..n]))
            })
            .collect();
        self.actions
            .retain(|path, action| !(action.is_dir && parents.contains(path)));
    }

    fn check_collisions(&self, reporter: &mut dyn Reporter) -> Result<()> {
        let mut sorted: Vec<&CopyAction> = self.actions.values().collect();
        sorted.sort_by(|a, b| {
            a.target_path
                .trim_end_matches('/')
                .cmp(b.target_path.trim_end_matches('/'))
                .then_with(|| a.source_path.cmp(&b.source_path))
        });

        let mut collisions = Vec::new();
        let mut start = 0;
        while start < sorted.len() {
            let key = sorted[start].target_path.trim_end_matches('/');
            let end = sorted[start..]
                .iter()
                .position(|action| action.target_path.trim_end_matches('/') != key)
                .map_or(sorted.len(), |n| start + n);
            if end - start > 1 {
                for action in &sorted[start..end] {
                    reporter.report(&action.source_path, &action.target_path, &Remark::Collision);
                    collisions.push((action.source_path.clone(), action.target_path.clone()));
                }
            }
            start = end;
        }

        if collisions.is_empty() {
            Ok(())
        } else {
            warn!(count = collisions.len(), "target path collision");
            Err(SyncError::TargetCollision(collisions))
        }
    }

    /// List the target and turn every path neither created nor retained
    /// into an erasure, collapsing whole directories where possible.
    fn plan_erasure<T: SyncParty + ?Sized>(&self, target: &T) -> Result<Vec<Action>> {
        let created: BTreeSet<String> = self
            .actions
            .values()
            .map(|action| action.target_path.clone())
            .collect();
        let mut retained = BTreeSet::new();
        let mut deleted = BTreeSet::new();
        self.scan_target(target, "", &created, &mut retained, &mut deleted)?;

        let mut cleans = Vec::new();
        while let Some(path) = deleted.pop_first() {
            if path.ends_with('/') {
                if has_under(&retained, &path) || has_under(&created, &path) {
                    continue;
                }
                let nested: Vec<String> = under(&deleted, &path).cloned().collect();
                for inner in nested {
                    deleted.remove(&inner);
                }
                debug!(path = %path, "erase directory");
                cleans.push(Action::Clean {
                    target_path: path,
                    is_dir: true,
                });
            } else {
                debug!(path = %path, "erase file");
                cleans.push(Action::Clean {
                    target_path: path,
                    is_dir: false,
                });
            }
        }
        Ok(cleans)
    }

    fn scan_target<T: SyncParty + ?Sized>(
        &self,
        target: &T,
        dir: &str,
        created: &BTreeSet<String>,
        retained: &mut BTreeSet<String>,
        deleted: &mut BTreeSet<String>,
    ) -> Result<()> {
        for name in target.list_files(dir)? {
            let path = join_path(dir, &name);
            if created.contains(&path) {
                continue;
            }
            if self.retain.iter().any(|p| p.matches(&path)) {
                retained.insert(path);
            } else {
                deleted.insert(path);
            }
        }
        for name in target.list_directories(dir)? {
            let path = join_path(dir, &name);
            let key = format!("{path}/");
            if self.retain.iter().any(|p| p.matches(&key)) {
                retained.insert(key);
                continue;
            }
            self.scan_target(target, &path, created, retained, deleted)?;
            deleted.insert(key);
        }
        Ok(())
    }

    fn perform<T: SyncParty + ?Sized>(
        &self,
        action: &Action,
        target: &T,
        summary: &mut BatchSummary,
    ) -> Result<Remark> {
        match action {
            Action::Clean { target_path, is_dir } => {
                let path = target_path.trim_end_matches('/');
                if *is_dir {
                    target.erase_directory(path)?;
                } else {
                    target.erase_file(path)?;
                }
                summary.pruned += 1;
                Ok(Remark::Prune)
            }
            Action::Copy(copy) if copy.is_dir => {
                summary.directories += 1;
                Ok(Remark::Dir)
            }
            Action::Copy(copy) => self.transfer(copy, target, summary),
        }
    }

    fn transfer<T: SyncParty + ?Sized>(
        &self,
        copy: &CopyAction,
        target: &T,
        summary: &mut BatchSummary,
    ) -> Result<Remark> {
        let target_signature = target.read_signature(&copy.target_path)?;
        let source_signature = match &copy.signature {
            Some(signature) => signature.clone(),
            None => self.source.read_signature(&copy.source_path)?,
        };

        if source_signature.file_size() == 0
            && target_signature.is_empty()
            && exists_on(target, &copy.target_path)?
        {
            debug!(source = %copy.source_path, "empty on both sides");
            summary.matched += 1;
            return Ok(Remark::Match);
        }

        if target_signature.is_empty() {
            let mut sink = target.open_for_write(&copy.target_path)?;
            let streamed = self.source.stream_to(&copy.source_path, &mut *sink)?;
            sink.flush()?;
            drop(sink);
            debug!(source = %copy.source_path, bytes = streamed, "streamed whole file");
            summary.copied += 1;
            summary.copied_bytes += streamed;
            return Ok(Remark::Copy);
        }

        if source_signature == target_signature
            && source_signature.file_size() == target_signature.file_size()
        {
            debug!(source = %copy.source_path, "signatures match");
            summary.matched += 1;
            return Ok(Remark::Match);
        }

        let deltas = self
            .source
            .prepare_delta(&copy.source_path, &target_signature)?;
        let stats = DeltaStats::from_deltas(&deltas);
        target.apply_delta(&copy.target_path, &deltas)?;
        summary.literal_bytes += stats.bytes_literal;
        debug!(
            source = %copy.source_path,
            copy_ops = stats.copy_ops,
            literal_bytes = stats.bytes_literal,
            "patched"
        );

        if stats.bytes_literal == 0 {
            summary.shuffled += 1;
            Ok(Remark::Shuffle)
        } else {
            summary.rewritten += 1;
            Ok(Remark::Rewrite(stats.literal_percent()))
        }
    }
}

impl<S: SyncParty + ?Sized> fmt::Debug for Batch<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("remainder", &self.remainder.len())
            .field("actions", &self.actions.len())
            .field("retain", &self.retain.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Whether `path` is a file on `party`.
fn exists_on<T: SyncParty + ?Sized>(party: &T, path: &str) -> Result<bool> {
    let (dir, name) = path.rsplit_once('/').unwrap_or(("", path));
    Ok(party.list_files(dir)?.iter().any(|file| file == name))
}

fn collect_tree<S: SyncParty + ?Sized>(
    source: &S,
    dir: &str,
    out: &mut BTreeMap<String, bool>,
) -> Result<()> {
    for name in source.list_files(dir)? {
        out.insert(join_path(dir, &name), false);
    }
    for name in source.list_directories(dir)? {
        let path = join_path(dir, &name);
        out.insert(format!("{path}/"), true);
        collect_tree(source, &path, out)?;
    }
    Ok(())
}

/// Entries of `set` that start with `prefix`, which sort right after it.
fn under<'a>(set: &'a BTreeSet<String>, prefix: &'a str) -> impl Iterator<Item = &'a String> {
    set.range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(move |path| path.starts_with(prefix))
}

fn has_under(set: &BTreeSet<String>, prefix: &str) -> bool {
    under(set, prefix).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::RecordingReporter;
    use crate::transport::LocalParty;
    use std::fs;
    use std::path::Path;

    fn write(root: &Path, path: &str, content: &str) {
        let file = root.join(path);
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(file, content).unwrap();
    }

    fn source_tree() -> (tempfile::TempDir, LocalParty) {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "pom.xml", "<project/>");
        write(dir.path(), "src/a.txt", "alpha");
        write(dir.path(), "src/b.txt", "beta");
        fs::create_dir_all(dir.path().join("src/empty")).unwrap();
        let party = LocalParty::new(dir.path());
        (dir, party)
    }

    #[test]
    fn start_snapshots_tree() {
        let (_dir, source) = source_tree();
        let batch = Batch::start(&source).unwrap();
        let paths: Vec<&str> = batch.remainder().collect();
        assert_eq!(
            paths,
            ["pom.xml", "src/", "src/a.txt", "src/b.txt", "src/empty/"]
        );
    }

    #[test]
    fn copy_moves_paths_out_of_remainder() {
        let (_dir, source) = source_tree();
        let mut batch = Batch::start(&source).unwrap();
        let group = batch.copy("src/*.txt").unwrap();
        assert_eq!(group.paths(), ["src/a.txt", "src/b.txt"]);
        assert_eq!(batch.remainder().count(), 3);

        assert!(batch.copy("src/*.txt").unwrap().is_empty());
    }

    #[test]
    fn exclude_hides_paths() {
        let (_dir, source) = source_tree();
        let mut batch = Batch::start(&source).unwrap();
        batch.source_exclude("**/b.txt").unwrap();
        batch.copy("**").unwrap();
        assert!(batch.copies().all(|(source, _)| source != "src/b.txt"));
    }

    #[test]
    fn prune_drops_only_directories() {
        let (_dir, source) = source_tree();
        let mut batch = Batch::start(&source).unwrap();
        batch.copy("**").unwrap();
        batch.source_prune("**").unwrap();
        let sources: Vec<&str> = batch.copies().map(|(source, _)| source).collect();
        assert_eq!(sources, ["pom.xml", "src/a.txt", "src/b.txt"]);
    }

    #[test]
    fn rename_relative_replaces_last_segment() {
        let (_dir, source) = source_tree();
        let mut batch = Batch::start(&source).unwrap();
        let _ = batch.copy("src/a.txt").unwrap().rename("c.txt");
        let _ = batch.copy("pom.xml").unwrap().rename("/build/pom.xml");
        let copies: Vec<(&str, &str)> = batch.copies().collect();
        assert_eq!(
            copies,
            [("pom.xml", "build/pom.xml"), ("src/a.txt", "src/c.txt")]
        );
    }

    #[test]
    fn rename_keeps_directory_slash() {
        let mut action = CopyAction::new("src/empty/", true);
        action.rename("void");
        assert_eq!(action.target_path, "src/void/");
        action.rename("/top");
        assert_eq!(action.target_path, "top/");
    }

    #[test]
    fn rebased_copy() {
        let (_dir, source) = source_tree();
        let mut batch = Batch::start(&source).unwrap();
        batch.copy_rebased("src", "lib", "*.txt").unwrap();
        let copies: Vec<(&str, &str)> = batch.copies().collect();
        assert_eq!(
            copies,
            [("src/a.txt", "lib/a.txt"), ("src/b.txt", "lib/b.txt")]
        );
    }

    #[test]
    fn rebased_copy_to_root() {
        let (_dir, source) = source_tree();
        let mut batch = Batch::start(&source).unwrap();
        batch.copy_rebased("src/", "", "a.txt").unwrap();
        assert_eq!(batch.copies().collect::<Vec<_>>(), [("src/a.txt", "a.txt")]);
    }

    #[test]
    fn rebasing_to_root_leaves_base_directory() {
        let (_dir, source) = source_tree();
        let mut batch = Batch::start(&source).unwrap();
        batch.copy_rebased("src", "", "**").unwrap();
        assert_eq!(
            batch.copies().collect::<Vec<_>>(),
            [
                ("src/a.txt", "a.txt"),
                ("src/b.txt", "b.txt"),
                ("src/empty/", "empty/"),
            ]
        );
        assert_eq!(batch.remainder().collect::<Vec<_>>(), ["pom.xml", "src/"]);
        assert!(batch.copies().all(|(_, target)| !target.is_empty()));
    }

    #[test]
    fn invalid_bases() {
        let (_dir, source) = source_tree();
        let mut batch = Batch::start(&source).unwrap();
        for base in ["", " ", "/abs", "sr*", "s?c"] {
            assert!(
                matches!(
                    batch.copy_rebased(base, "x", "**"),
                    Err(SyncError::InvalidBase(_))
                ),
                "base {base:?}"
            );
        }
    }

    #[test]
    fn dot_base_does_not_rebase() {
        let (_dir, source) = source_tree();
        let mut batch = Batch::start(&source).unwrap();
        batch.copy_rebased(".", "ignored", "pom.xml").unwrap();
        assert_eq!(batch.copies().collect::<Vec<_>>(), [("pom.xml", "pom.xml")]);
    }

    #[test]
    fn autoprune_removes_implied_parents() {
        let (_dir, source) = source_tree();
        let mut batch = Batch::start(&source).unwrap();
        batch.copy("**").unwrap();
        batch.autoprune();
        let sources: Vec<&str> = batch.copies().map(|(source, _)| source).collect();
        assert_eq!(sources, ["pom.xml", "src/a.txt", "src/b.txt", "src/empty/"]);
    }

    #[test]
    fn rules_apply_in_order() {
        let (_dir, source) = source_tree();
        let mut batch = Batch::start(&source).unwrap();
        batch
            .apply(&Rule::Exclude {
                pattern: "pom.xml".to_string(),
            })
            .unwrap();
        batch
            .apply(&Rule::Copy {
                pattern: "*.txt".to_string(),
                source_base: Some("src".to_string()),
                target_base: Some("docs".to_string()),
                rename: None,
            })
            .unwrap();
        let copies: Vec<(&str, &str)> = batch.copies().collect();
        assert_eq!(
            copies,
            [("src/a.txt", "docs/a.txt"), ("src/b.txt", "docs/b.txt")]
        );
        assert!(matches!(
            batch.apply(&Rule::Copy {
                pattern: "**".to_string(),
                source_base: None,
                target_base: Some("x".to_string()),
                rename: None,
            }),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn erasure_collapses_directories() {
        let (_dir, source) = source_tree();
        let target_dir = tempfile::tempdir().unwrap();
        write(target_dir.path(), "old/deep/x.txt", "x");
        write(target_dir.path(), "old/y.txt", "y");
        write(target_dir.path(), "src/stale.txt", "s");
        write(target_dir.path(), "keep/k.txt", "k");
        let target = LocalParty::new(target_dir.path());

        let mut batch = Batch::start(&source).unwrap();
        batch.copy("**").unwrap();
        batch.target_retain("keep/**").unwrap();
        let cleans: Vec<String> = batch
            .plan_erasure(&target)
            .unwrap()
            .iter()
            .map(|action| action.target_path().to_string())
            .collect();
        assert_eq!(cleans, ["old/", "src/stale.txt"]);
    }

    #[test]
    fn clean_sorts_before_copy_on_same_name() {
        let clean = Action::Clean {
            target_path: "p/".to_string(),
            is_dir: true,
        };
        let copy = Action::Copy(CopyAction::new("p", false));
        assert!(clean.sort_key() < copy.sort_key());
    }

    #[test]
    fn collision_reports_every_pair() {
        let (_dir, source) = source_tree();
        let mut batch = Batch::start(&source).unwrap();
        let _ = batch.copy("src/a.txt").unwrap().rename("same.txt");
        let _ = batch.copy("src/b.txt").unwrap().rename("same.txt");
        let mut reporter = RecordingReporter::new();
        let err = batch.check_collisions(&mut reporter).unwrap_err();
        assert!(matches!(err, SyncError::TargetCollision(ref pairs) if pairs.len() == 2));
        assert_eq!(
            reporter.lines(),
            [
                "src/a.txt -> src/same.txt Target path collision",
                "src/b.txt -> src/same.txt Target path collision",
            ]
        );
    }

    #[test]
    fn summary_display() {
        let summary = BatchSummary {
            copied: 2,
            literal_bytes: 3,
            copied_bytes: 10,
            ..BatchSummary::default()
        };
        assert_eq!(summary.transferred_bytes(), 13);
        assert!(summary.to_string().starts_with("2 copied"));
    }
}
