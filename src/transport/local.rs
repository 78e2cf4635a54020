//! Party backed by a directory on the local filesystem.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::SyncParty;
use crate::config::Configuration;
use crate::delta::Delta;
use crate::error::{Result, SyncError};
use crate::matcher::make_deltas;
use crate::rebuild::rebuild_file;
use crate::signature::Signature;

/// A directory tree on local disk.
///
/// Path segments `.` and `..` are ignored, so every path resolves under the
/// root.
#[derive(Debug, Clone)]
pub struct LocalParty {
    root: PathBuf,
    config: Configuration,
}

impl LocalParty {
    /// Serve `root` with the default configuration.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, Configuration::default())
    }

    /// Serve `root` with `config` for signatures and matching.
    #[must_use]
    pub fn with_config(root: impl Into<PathBuf>, config: Configuration) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Serve an existing directory, as a batch source must be.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `root` does not exist and `NotADirectory` if it
    /// is not a directory.
    pub fn open(root: impl Into<PathBuf>, config: Configuration) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            return Err(SyncError::NotFound(root.display().to_string()));
        }
        if !root.is_dir() {
            return Err(SyncError::NotADirectory(root.display().to_string()));
        }
        Ok(Self::with_config(root, config))
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configuration used for signatures and matching.
    #[must_use]
    pub const fn config(&self) -> &Configuration {
        &self.config
    }

    fn path(&self, rel: &str) -> PathBuf {
        rel.split('/')
            .filter(|segment| !matches!(*segment, "" | "." | ".."))
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    fn entries(&self, rel: &str, directories: bool) -> Result<Vec<String>> {
        let dir = self.path(rel);
        let reader = match fs::read_dir(&dir) {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound || !dir.is_dir() => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in reader {
            let entry = entry?;
            let path = entry.path();
            let keep = if directories {
                path.is_dir()
            } else {
                path.is_file()
            };
            if !keep {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => warn!(?name, dir = %dir.display(), "skipping non UTF-8 name"),
            }
        }
        names.sort();
        Ok(names)
    }
}

impl SyncParty for LocalParty {
    fn resolve_path(&self, path: &str) -> String {
        self.path(path).display().to_string()
    }

    fn list_directories(&self, path: &str) -> Result<Vec<String>> {
        self.entries(path, true)
    }

    fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.entries(path, false)
    }

    fn read_signature(&self, path: &str) -> Result<Signature> {
        let file = self.path(path);
        if !file.is_file() {
            return Ok(Signature::empty(&self.config));
        }
        Signature::generate(BufReader::new(File::open(file)?), &self.config)
    }

    fn make_path(&self, path: &str) -> Result<bool> {
        let dir = self.path(path);
        if dir.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&dir)?;
        Ok(true)
    }

    fn open_for_write(&self, path: &str) -> Result<Box<dyn Write + '_>> {
        let file = self.path(path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        debug!(path = %file.display(), "writing whole file");
        Ok(Box::new(BufWriter::new(File::create(file)?)))
    }

    fn stream_to(&self, path: &str, sink: &mut dyn Write) -> Result<u64> {
        let mut file = File::open(self.path(path))?;
        let copied = io::copy(&mut file, sink)?;
        sink.flush()?;
        Ok(copied)
    }

    fn prepare_delta(&self, path: &str, signature: &Signature) -> Result<Vec<Delta>> {
        let file = File::open(self.path(path))?;
        make_deltas(&self.config, signature, BufReader::new(file))
    }

    fn apply_delta(&self, path: &str, deltas: &[Delta]) -> Result<()> {
        let file = self.path(path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)?;
        }
        rebuild_file(&file, deltas, &file)?;
        Ok(())
    }

    fn erase_file(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.path(path)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn erase_directory(&self, path: &str) -> Result<()> {
        match fs::remove_dir_all(self.path(path)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn party() -> (tempfile::TempDir, LocalParty) {
        let dir = tempfile::tempdir().unwrap();
        let config = Configuration::builder().block_length(4).build().unwrap();
        let party = LocalParty::with_config(dir.path(), config);
        (dir, party)
    }

    #[test]
    fn open_checks_root() {
        let (dir, _party) = party();
        fs::write(dir.path().join("file"), b"x").unwrap();
        assert!(LocalParty::open(dir.path(), Configuration::default()).is_ok());
        assert!(matches!(
            LocalParty::open(dir.path().join("missing"), Configuration::default()),
            Err(SyncError::NotFound(_))
        ));
        assert!(matches!(
            LocalParty::open(dir.path().join("file"), Configuration::default()),
            Err(SyncError::NotADirectory(_))
        ));
    }

    #[test]
    fn listing_is_sorted_and_split() {
        let (dir, party) = party();
        fs::create_dir(dir.path().join("zdir")).unwrap();
        fs::create_dir(dir.path().join("adir")).unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();

        assert_eq!(party.list_directories("").unwrap(), vec!["adir", "zdir"]);
        assert_eq!(party.list_files("").unwrap(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn listing_missing_directory_is_empty() {
        let (_dir, party) = party();
        assert!(party.list_files("nope").unwrap().is_empty());
        assert!(party.list_directories("nope/deeper").unwrap().is_empty());
    }

    #[test]
    fn listing_a_file_is_empty() {
        let (dir, party) = party();
        fs::write(dir.path().join("f"), b"x").unwrap();
        assert!(party.list_files("f").unwrap().is_empty());
    }

    #[test]
    fn signature_of_missing_file_is_empty() {
        let (_dir, party) = party();
        let sig = party.read_signature("missing.txt").unwrap();
        assert!(sig.is_empty());
        assert_eq!(sig.block_length, 4);
    }

    #[test]
    fn signature_of_file() {
        let (dir, party) = party();
        fs::write(dir.path().join("f"), b"0123456789").unwrap();
        assert_eq!(party.read_signature("f").unwrap().len(), 3);
    }

    #[test]
    fn write_creates_parents() {
        let (dir, party) = party();
        {
            let mut sink = party.open_for_write("a/b/c.txt").unwrap();
            sink.write_all(b"hello").unwrap();
            sink.flush().unwrap();
        }
        assert_eq!(fs::read(dir.path().join("a/b/c.txt")).unwrap(), b"hello");
    }

    #[test]
    fn stream_to_copies_everything() {
        let (dir, party) = party();
        fs::write(dir.path().join("f"), b"payload").unwrap();
        let mut sink = Vec::new();
        assert_eq!(party.stream_to("f", &mut sink).unwrap(), 7);
        assert_eq!(sink, b"payload");
    }

    #[test]
    fn delta_roundtrip_between_parties() {
        let (src_dir, source) = party();
        let (dst_dir, target) = party();
        fs::write(src_dir.path().join("f"), b"aaaaXbbbbcccc").unwrap();
        fs::write(dst_dir.path().join("f"), b"aaaabbbbcccc").unwrap();

        let sig = target.read_signature("f").unwrap();
        let deltas = source.prepare_delta("f", &sig).unwrap();
        target.apply_delta("f", &deltas).unwrap();

        let mut rebuilt = String::new();
        File::open(dst_dir.path().join("f"))
            .unwrap()
            .read_to_string(&mut rebuilt)
            .unwrap();
        assert_eq!(rebuilt, "aaaaXbbbbcccc");
    }

    #[test]
    fn make_path_reports_creation() {
        let (_dir, party) = party();
        assert!(party.make_path("x/y").unwrap());
        assert!(!party.make_path("x/y").unwrap());
    }

    #[test]
    fn erase_is_idempotent() {
        let (dir, party) = party();
        fs::create_dir_all(dir.path().join("d/e")).unwrap();
        fs::write(dir.path().join("d/e/f"), b"x").unwrap();
        fs::write(dir.path().join("g"), b"x").unwrap();

        party.erase_directory("d").unwrap();
        party.erase_file("g").unwrap();
        party.erase_directory("d").unwrap();
        party.erase_file("g").unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn parent_segments_stay_under_root() {
        let (dir, party) = party();
        assert_eq!(
            party.resolve_path("../../etc/passwd"),
            dir.path().join("etc").join("passwd").display().to_string()
        );
    }
}
