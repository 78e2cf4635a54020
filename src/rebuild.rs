//! Rebuilder: replays deltas against a basis to produce the new file.
//!
//! Small basis files are read with seek + read. Files of at least
//! [`MAP_LIMIT`] bytes are read through a memory-mapped window that slides
//! to follow the copy offsets.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Cursor, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use tracing::{debug, trace};

use crate::delta::Delta;
use crate::error::{Result, SyncError};

/// Basis files at least this long are memory-mapped.
pub const MAP_LIMIT: u64 = 32 * 1024;

/// Largest mapped window.
pub const MAP_WINDOW: u64 = 64 * 1024 * 1024;

/// Random-access view of a basis file.
pub trait Basis {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// True for an empty basis.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` from `offset`. The range is known to be in bounds.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if reading fails.
    fn read_range(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;
}

/// Basis read through `Seek` + `Read`.
#[derive(Debug)]
pub struct SeekBasis<R> {
    inner: R,
    len: u64,
}

impl<R: Read + Seek> SeekBasis<R> {
    /// Wrap a seekable reader.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the length cannot be determined.
    pub fn new(mut inner: R) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        Ok(Self { inner, len })
    }
}

impl<R: Read + Seek> Basis for SeekBasis<R> {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.read_exact(buf)?;
        Ok(())
    }
}

/// Basis read through a sliding memory map.
#[derive(Debug)]
pub struct MappedBasis {
    file: File,
    len: u64,
    window: u64,
    map: Option<Mmap>,
    map_offset: u64,
}

impl MappedBasis {
    /// Map `file` with the default window size.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file metadata cannot be read.
    pub fn new(file: File) -> Result<Self> {
        Self::with_window(file, MAP_WINDOW)
    }

    /// Map `file` in windows of at most `window` bytes.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file metadata cannot be read.
    pub fn with_window(file: File, window: u64) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            window: window.max(1),
            map: None,
            map_offset: 0,
        })
    }

    /// Offset and length of the current mapping, if any.
    #[must_use]
    pub fn mapped_range(&self) -> Option<(u64, u64)> {
        self.map
            .as_ref()
            .map(|map| (self.map_offset, map.len() as u64))
    }

    fn covers(&self, offset: u64, len: u64) -> bool {
        self.mapped_range()
            .is_some_and(|(start, size)| offset >= start && offset + len <= start + size)
    }

    /// Map a window of up to `self.window` bytes centred on `[offset, offset + len)`.
    #[allow(unsafe_code, clippy::cast_possible_truncation)]
    fn remap(&mut self, offset: u64, len: u64) -> Result<()> {
        let size = self.window.max(len).min(self.len);
        let start = offset
            .saturating_sub((size - len) / 2)
            .min(self.len - size);
        debug!(start, size, "remapping basis window");
        self.map = None;
        // SAFETY: the mapping is read-only and the basis is not written while
        // a rebuild is in progress; the target tree has a single writer.
        let map = unsafe {
            MmapOptions::new()
                .offset(start)
                .len(size as usize)
                .map(&self.file)?
        };
        self.map = Some(map);
        self.map_offset = start;
        Ok(())
    }
}

impl Basis for MappedBasis {
    fn len(&self) -> u64 {
        self.len
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read_range(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let len = buf.len() as u64;
        if len == 0 {
            return Ok(());
        }
        if !self.covers(offset, len) {
            self.remap(offset, len)?;
        }
        let map = self
            .map
            .as_ref()
            .ok_or_else(|| SyncError::Io(ErrorKind::Other.into()))?;
        // Within the mapping, which is at most `window` bytes
        let start = (offset - self.map_offset) as usize;
        buf.copy_from_slice(&map[start..start + buf.len()]);
        Ok(())
    }
}

/// Replay `deltas` against `basis`, writing the new file to `out`.
///
/// Returns the number of bytes written.
///
/// # Errors
///
/// Returns `DeltaOrder` if the deltas are not contiguous from zero,
/// `InvalidCopyBounds` if a copy reads past the basis end, or an I/O error.
///
/// # Example
///
/// ```rust
/// use std::io::Cursor;
/// use treesync::{rebuild, Delta, SeekBasis};
///
/// let mut basis = SeekBasis::new(Cursor::new(b"hello world".to_vec())).unwrap();
/// let deltas = vec![Delta::copy(6, 0, 5), Delta::literal(5, b"!".to_vec())];
/// let mut out = Vec::new();
/// rebuild(&mut basis, &deltas, &mut out).unwrap();
/// assert_eq!(out, b"world!");
/// ```
#[allow(clippy::cast_possible_truncation)]
pub fn rebuild<'d, B, I, W>(basis: &mut B, deltas: I, mut out: W) -> Result<u64>
where
    B: Basis + ?Sized,
    I: IntoIterator<Item = &'d Delta>,
    W: Write,
{
    let mut written = 0u64;
    let mut buf = Vec::new();
    for delta in deltas {
        if delta.write_offset() != written {
            return Err(SyncError::DeltaOrder {
                expected: written,
                found: delta.write_offset(),
            });
        }
        match delta {
            Delta::Literal { data, .. } => out.write_all(data)?,
            Delta::CopyRange {
                old_offset, len, ..
            } => {
                let end = old_offset.checked_add(u64::from(*len));
                if end.map_or(true, |end| end > basis.len()) {
                    return Err(SyncError::InvalidCopyBounds {
                        offset: *old_offset,
                        len: *len,
                        basis_size: basis.len(),
                    });
                }
                trace!(old_offset, len, "copying from basis");
                buf.resize(*len as usize, 0);
                basis.read_range(*old_offset, &mut buf)?;
                out.write_all(&buf)?;
            }
        }
        written = delta.end();
    }
    out.flush()?;
    Ok(written)
}

/// Rebuild `dest` from `basis_path` and `deltas`.
///
/// The new content is written to a temporary sibling of `dest` and renamed
/// over it once complete, so a failed rebuild leaves `dest` untouched.
/// `basis_path` may equal `dest`; a missing basis behaves as empty.
///
/// # Errors
///
/// See [`rebuild`]; also fails if the temporary file cannot be created or
/// renamed.
pub fn rebuild_file<'d, I>(basis_path: &Path, deltas: I, dest: &Path) -> Result<u64>
where
    I: IntoIterator<Item = &'d Delta>,
{
    let basis = match File::open(basis_path) {
        Ok(file) => Some(file),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    let (temp_path, temp_file) = create_temp_sibling(dest)?;

    let result = (|| -> Result<u64> {
        let mut out = BufWriter::new(temp_file);
        let written = match basis {
            Some(file) if file.metadata()?.len() >= MAP_LIMIT => {
                rebuild(&mut MappedBasis::new(file)?, deltas, &mut out)?
            }
            Some(file) => rebuild(&mut SeekBasis::new(file)?, deltas, &mut out)?,
            None => rebuild(&mut SeekBasis::new(Cursor::new(Vec::new()))?, deltas, &mut out)?,
        };
        out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        Ok(written)
    })();

    match result {
        Ok(written) => {
            fs::rename(&temp_path, dest)?;
            debug!(path = %dest.display(), written, "rebuilt file");
            Ok(written)
        }
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            Err(e)
        }
    }
}

/// Create `.treesync-<name>` next to `dest`, numbering it if taken.
fn create_temp_sibling(dest: &Path) -> Result<(PathBuf, File)> {
    let dir = dest.parent().unwrap_or_else(|| Path::new(""));
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut attempt = 0u32;
    loop {
        let candidate = if attempt == 0 {
            dir.join(format!(".treesync-{name}"))
        } else {
            dir.join(format!(".treesync-{name}-{attempt}"))
        };
        match OpenOptions::new().write(true).create_new(true).open(&candidate) {
            Ok(file) => return Ok((candidate, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}
