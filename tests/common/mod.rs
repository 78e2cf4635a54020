//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::Path;

use tempfile::TempDir;
use treesync::{Configuration, Delta, LocalParty, Result, Signature, SyncError, SyncParty};

/// Block length small enough for a handful of bytes to span several blocks.
pub const BLOCK: usize = 4;

pub fn config() -> Configuration {
    Configuration::builder().block_length(BLOCK).build().unwrap()
}

pub fn write(root: &Path, path: &str, content: &str) {
    let file = root.join(path);
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(file, content).unwrap();
}

pub fn read(root: &Path, path: &str) -> String {
    fs::read_to_string(root.join(path)).unwrap()
}

/// ```text
/// pom.xml
/// src/main/root/a.txt
/// src/main/root/b.txt
/// src/main/root/b.txt.v2
/// src/main/root/x.prop
/// src/main/root/override1/.mkdir
/// src/main/root/override2/.mkdir
/// ```
pub fn source_tree() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "pom.xml", "<project>demo</project>");
    write(dir.path(), "src/main/root/a.txt", "first file");
    write(dir.path(), "src/main/root/b.txt", "aaaabbbbcccc");
    write(dir.path(), "src/main/root/b.txt.v2", "aaaaXbbbbcccc");
    write(dir.path(), "src/main/root/x.prop", "key=value");
    write(dir.path(), "src/main/root/override1/.mkdir", "");
    write(dir.path(), "src/main/root/override2/.mkdir", "");
    dir
}

pub fn party(dir: &TempDir) -> LocalParty {
    LocalParty::with_config(dir.path(), config())
}

/// Every file under `root`, relative, sorted.
pub fn list_tree(root: &Path) -> Vec<String> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<String>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let rel = path.strip_prefix(root).unwrap();
                out.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}

fn injected(path: &str) -> SyncError {
    SyncError::Io(io::Error::new(
        ErrorKind::Other,
        format!("injected failure on {path}"),
    ))
}

/// A local party whose reads and writes of one path fail.
pub struct FailingParty {
    pub inner: LocalParty,
    pub failing: String,
}

impl FailingParty {
    pub fn new(inner: LocalParty, failing: &str) -> Self {
        Self {
            inner,
            failing: failing.to_string(),
        }
    }

    fn check(&self, path: &str) -> Result<()> {
        if path == self.failing {
            Err(injected(path))
        } else {
            Ok(())
        }
    }
}

impl SyncParty for FailingParty {
    fn resolve_path(&self, path: &str) -> String {
        self.inner.resolve_path(path)
    }

    fn list_directories(&self, path: &str) -> Result<Vec<String>> {
        self.inner.list_directories(path)
    }

    fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.inner.list_files(path)
    }

    fn read_signature(&self, path: &str) -> Result<Signature> {
        self.check(path)?;
        self.inner.read_signature(path)
    }

    fn make_path(&self, path: &str) -> Result<bool> {
        self.inner.make_path(path)
    }

    fn open_for_write(&self, path: &str) -> Result<Box<dyn Write + '_>> {
        self.check(path)?;
        self.inner.open_for_write(path)
    }

    fn stream_to(&self, path: &str, sink: &mut dyn Write) -> Result<u64> {
        self.check(path)?;
        self.inner.stream_to(path, sink)
    }

    fn prepare_delta(&self, path: &str, signature: &Signature) -> Result<Vec<Delta>> {
        self.check(path)?;
        self.inner.prepare_delta(path, signature)
    }

    fn apply_delta(&self, path: &str, deltas: &[Delta]) -> Result<()> {
        self.check(path)?;
        self.inner.apply_delta(path, deltas)
    }

    fn erase_file(&self, path: &str) -> Result<()> {
        self.inner.erase_file(path)
    }

    fn erase_directory(&self, path: &str) -> Result<()> {
        self.inner.erase_directory(path)
    }
}
