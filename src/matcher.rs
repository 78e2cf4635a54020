//! Rolling matcher: turns a new byte stream into deltas against a basis.
//!
//! The matcher keeps a sliding buffer of at most `2 * block_length - 1`
//! bytes. Once a full block has accumulated it checks the window, then
//! rolls one byte at a time, querying the [`ChecksumIndex`] after every
//! step. Deltas come out ordered by write offset.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read};

use tracing::trace;

use crate::checksum::RollingChecksum;
use crate::config::Configuration;
use crate::delta::Delta;
use crate::error::Result;
use crate::index::ChecksumIndex;
use crate::signature::{Signature, CHUNK_SIZE};

/// Incremental matcher over one new file.
#[derive(Debug)]
pub struct Matcher<'a> {
    config: &'a Configuration,
    index: &'a ChecksumIndex,
    rolling: RollingChecksum,
    buffer: Vec<u8>,
    /// Bytes buffered since the last match or flush.
    ndx: usize,
    /// Bytes consumed in total.
    count: u64,
}

impl<'a> Matcher<'a> {
    /// Create a matcher against a basis index.
    #[must_use]
    pub fn new(config: &'a Configuration, index: &'a ChecksumIndex) -> Self {
        let block_length = config.block_length;
        Self {
            config,
            index,
            rolling: config.rolling(),
            buffer: vec![0; 2 * block_length - 1],
            ndx: 0,
            count: 0,
        }
    }

    /// Consume more input, appending any finished deltas to `out`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn update(&mut self, data: &[u8], out: &mut VecDeque<Delta>) {
        let block_length = self.config.block_length;
        for &byte in data {
            self.buffer[self.ndx] = byte;
            self.ndx += 1;
            self.count += 1;

            if self.ndx < block_length {
                continue;
            } else if self.ndx == block_length {
                self.rolling.check(&self.buffer[..block_length]);
            } else {
                self.rolling.roll(byte);
            }

            let start = self.ndx - block_length;
            let window = &self.buffer[start..self.ndx];
            if let Some(old_offset) = self.index.lookup(self.rolling.value(), window, self.config) {
                let window_offset = self.count - block_length as u64;
                trace!(old_offset, write_offset = window_offset, "block matched");
                if start > 0 {
                    out.push_back(Delta::literal(
                        self.count - self.ndx as u64,
                        &self.buffer[..start],
                    ));
                }
                // block_length <= 16 MiB
                out.push_back(Delta::copy(old_offset, window_offset, block_length as u32));
                self.ndx = 0;
                self.rolling.reset();
            } else if self.ndx == self.buffer.len() {
                let flush = self.buffer.len() - (block_length - 1);
                out.push_back(Delta::literal(
                    self.count - self.ndx as u64,
                    &self.buffer[..flush],
                ));
                self.buffer.copy_within(flush.., 0);
                self.ndx = block_length - 1;
            }
        }
    }

    /// Flush the buffered tail and reset for another stream.
    #[allow(clippy::cast_possible_truncation)]
    pub fn finish(&mut self, out: &mut VecDeque<Delta>) {
        if self.ndx > 0 {
            let block_length = self.config.block_length;
            let off = self.ndx.saturating_sub(block_length);
            let len = self.ndx.min(block_length);
            let window = &self.buffer[off..off + len];
            self.rolling.check(window);

            if let Some(old_offset) = self.index.lookup(self.rolling.value(), window, self.config) {
                trace!(old_offset, len, "tail matched");
                if off > 0 {
                    out.push_back(Delta::literal(
                        self.count - self.ndx as u64,
                        &self.buffer[..off],
                    ));
                }
                out.push_back(Delta::copy(old_offset, self.count - len as u64, len as u32));
            } else {
                out.push_back(Delta::literal(
                    self.count - self.ndx as u64,
                    &self.buffer[..self.ndx],
                ));
            }
        }
        self.ndx = 0;
        self.count = 0;
        self.rolling.reset();
    }
}

/// Lazy, ordered sequence of deltas read from a new file.
///
/// Reads the source in chunks as items are pulled. Not restartable.
#[derive(Debug)]
pub struct DeltaStream<'a, R> {
    reader: R,
    matcher: Matcher<'a>,
    pending: VecDeque<Delta>,
    chunk: Vec<u8>,
    finished: bool,
}

impl<'a, R: Read> DeltaStream<'a, R> {
    /// Match `reader` against `index`.
    pub fn new(config: &'a Configuration, index: &'a ChecksumIndex, reader: R) -> Self {
        Self {
            reader,
            matcher: Matcher::new(config, index),
            pending: VecDeque::new(),
            chunk: vec![0; CHUNK_SIZE],
            finished: false,
        }
    }
}

impl<R: Read> Iterator for DeltaStream<'_, R> {
    type Item = Result<Delta>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(delta) = self.pending.pop_front() {
                return Some(Ok(delta));
            }
            if self.finished {
                return None;
            }
            match self.reader.read(&mut self.chunk) {
                Ok(0) => {
                    self.matcher.finish(&mut self.pending);
                    self.finished = true;
                }
                Ok(n) => self.matcher.update(&self.chunk[..n], &mut self.pending),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e.into()));
                }
            }
        }
    }
}

/// Compute the full delta sequence of `reader` against a basis signature.
///
/// Block and digest lengths are taken from the signature; the seed and
/// algorithms come from `config`.
///
/// # Errors
///
/// Returns an I/O error if reading fails, or a configuration error if the
/// signature carries an unusable block or digest length.
///
/// # Example
///
/// ```rust
/// use std::io::Cursor;
/// use treesync::{make_deltas, Configuration, Delta, Signature};
///
/// let config = Configuration::builder().block_length(4).build().unwrap();
/// let basis = Signature::from_bytes(b"aaaabbbb", &config);
/// let deltas = make_deltas(&config, &basis, Cursor::new(b"bbbbXaaaa")).unwrap();
/// assert_eq!(deltas[0], Delta::copy(4, 0, 4));
/// assert_eq!(deltas[1], Delta::literal(4, b"X".to_vec()));
/// assert_eq!(deltas[2], Delta::copy(0, 5, 4));
/// ```
pub fn make_deltas<R: Read>(
    config: &Configuration,
    signature: &Signature,
    reader: R,
) -> Result<Vec<Delta>> {
    let matching = Configuration {
        block_length: signature.block_length,
        strong_len: signature.strong_len,
        ..config.clone()
    };
    matching.validate()?;
    let index = ChecksumIndex::new(signature);
    DeltaStream::new(&matching, &index, reader).collect()
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::delta::validate_sequence;
    use proptest::prelude::*;
    use std::io::Cursor;

    proptest! {
        /// Deltas are ordered, contiguous and rebuild the source exactly
        #[test]
        fn deltas_cover_and_rebuild(
            basis in prop::collection::vec(0u8..4, 0..2000),
            source in prop::collection::vec(0u8..4, 0..2000),
            block_length in 1usize..40
        ) {
            let config = Configuration::builder().block_length(block_length).build().unwrap();
            let sig = Signature::from_bytes(&basis, &config);
            let deltas = make_deltas(&config, &sig, Cursor::new(&source)).unwrap();

            prop_assert_eq!(validate_sequence(&deltas).unwrap(), source.len() as u64);

            let mut rebuilt = Vec::new();
            for delta in &deltas {
                match delta {
                    Delta::Literal { data, .. } => rebuilt.extend_from_slice(data),
                    Delta::CopyRange { old_offset, len, .. } => {
                        let start = *old_offset as usize;
                        let end = start + *len as usize;
                        prop_assert!(end <= basis.len());
                        rebuilt.extend_from_slice(&basis[start..end]);
                    }
                }
            }
            prop_assert_eq!(rebuilt, source);
        }

        /// Identical block-aligned inputs produce no literal bytes
        #[test]
        fn identical_aligned_is_pure_copy(
            block_count in 1usize..10,
            seed in any::<u8>()
        ) {
            let block_length = 64;
            let data: Vec<u8> = (0..block_count * block_length)
                .map(|i| seed.wrapping_add((i * 31 % 251) as u8))
                .collect();
            let config = Configuration::builder().block_length(block_length).build().unwrap();
            let sig = Signature::from_bytes(&data, &config);
            let deltas = make_deltas(&config, &sig, Cursor::new(&data)).unwrap();
            prop_assert!(deltas.iter().all(Delta::is_copy));
        }
    }
}
