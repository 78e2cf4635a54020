//! Binary encoding of signatures and deltas.
//!
//! ```text
//! signature: SIG_MAGIC   block_length:4 strong_len:4 { weak:4 strong:strong_len }*
//! delta:     DELTA_MAGIC { opcode args }* OP_END
//! ```
//!
//! All integers are big-endian. Offsets and lengths are not carried for
//! signature pairs, nor write offsets for deltas; both are rebuilt on decode.

use std::io::{ErrorKind, Read, Write};

use crate::delta::Delta;
use crate::error::{Result, SyncError};
use crate::hash::{StrongSum, MAX_STRONG_LEN};
use crate::signature::{ChecksumPair, Signature};

/// Magic number opening a signature stream.
pub const SIG_MAGIC: u32 = 0x7273_0136;
/// Magic number opening a delta stream.
pub const DELTA_MAGIC: u32 = 0x7273_0236;

/// End of delta stream.
pub const OP_END: u8 = 0x00;
/// Literal with a 1-byte length.
pub const OP_LITERAL_N1: u8 = 0x41;
/// Literal with a 2-byte length.
pub const OP_LITERAL_N2: u8 = 0x42;
/// Literal with a 4-byte length.
pub const OP_LITERAL_N4: u8 = 0x43;
/// Literal with an 8-byte length. Decoded, never written.
pub const OP_LITERAL_N8: u8 = 0x44;
/// Copy with 4-byte offset and 4-byte length.
pub const OP_COPY_N4_N4: u8 = 0x4f;

/// Write a signature stream.
///
/// # Errors
///
/// Returns an I/O error if writing fails, or `OffsetOverflow` if the block
/// length does not fit the header.
pub fn write_signature<W: Write>(mut writer: W, signature: &Signature) -> Result<()> {
    writer.write_all(&SIG_MAGIC.to_be_bytes())?;
    writer.write_all(&to_u32(signature.block_length as u64)?.to_be_bytes())?;
    writer.write_all(&to_u32(signature.strong_len as u64)?.to_be_bytes())?;
    for pair in &signature.pairs {
        writer.write_all(&pair.weak.to_be_bytes())?;
        writer.write_all(pair.strong.as_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a signature stream until end of input.
///
/// Pair offsets are rebuilt as `index * block_length`; every pair,
/// including the last, is given a length of `block_length`.
///
/// # Errors
///
/// Returns `BadMagic` for a stream of the wrong kind, `Truncated` when the
/// input stops inside a header or a pair.
#[allow(clippy::cast_possible_truncation)]
pub fn read_signature<R: Read>(mut reader: R) -> Result<Signature> {
    expect_magic(&mut reader, SIG_MAGIC)?;
    let block_length = read_u32(&mut reader)?;
    let strong_len = read_u32(&mut reader)? as usize;
    if block_length == 0 {
        return Err(SyncError::InvalidBlockLength(0));
    }
    if strong_len > MAX_STRONG_LEN {
        return Err(SyncError::InvalidDigestLength {
            requested: strong_len,
            max: MAX_STRONG_LEN,
        });
    }

    let mut pairs = Vec::new();
    let mut weak = [0u8; 4];
    let mut strong = vec![0u8; strong_len];
    while fill_or_eof(&mut reader, &mut weak)? {
        reader.read_exact(&mut strong).map_err(truncated)?;
        let sequence = pairs.len() as u32;
        pairs.push(ChecksumPair::new(
            u32::from_be_bytes(weak),
            StrongSum::from_slice(&strong).ok_or(SyncError::Truncated)?,
            u64::from(sequence) * u64::from(block_length),
            block_length,
            sequence,
        ));
    }

    Ok(Signature {
        block_length: block_length as usize,
        strong_len,
        pairs,
    })
}

/// Streaming delta encoder.
///
/// Writes the magic on construction and `OP_END` on [`finish`](Self::finish).
/// Deltas must be written in write-offset order without gaps.
#[derive(Debug)]
pub struct DeltaWriter<W: Write> {
    inner: W,
    next_offset: u64,
}

impl<W: Write> DeltaWriter<W> {
    /// Start a delta stream.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if writing the magic fails.
    pub fn new(mut inner: W) -> Result<Self> {
        inner.write_all(&DELTA_MAGIC.to_be_bytes())?;
        Ok(Self {
            inner,
            next_offset: 0,
        })
    }

    /// Encode one delta.
    ///
    /// # Errors
    ///
    /// Returns `DeltaOrder` if the delta does not continue the stream,
    /// `OffsetOverflow` if a copy offset exceeds 4 bytes, or an I/O error.
    pub fn write(&mut self, delta: &Delta) -> Result<()> {
        if delta.write_offset() != self.next_offset {
            return Err(SyncError::DeltaOrder {
                expected: self.next_offset,
                found: delta.write_offset(),
            });
        }
        match delta {
            Delta::Literal { data, .. } => {
                let len = data.len() as u64;
                if let Ok(n) = u8::try_from(len) {
                    self.inner.write_all(&[OP_LITERAL_N1, n])?;
                } else if let Ok(n) = u16::try_from(len) {
                    self.inner.write_all(&[OP_LITERAL_N2])?;
                    self.inner.write_all(&n.to_be_bytes())?;
                } else {
                    self.inner.write_all(&[OP_LITERAL_N4])?;
                    self.inner.write_all(&to_u32(len)?.to_be_bytes())?;
                }
                self.inner.write_all(data)?;
            }
            Delta::CopyRange {
                old_offset, len, ..
            } => {
                self.inner.write_all(&[OP_COPY_N4_N4])?;
                self.inner.write_all(&to_u32(*old_offset)?.to_be_bytes())?;
                self.inner.write_all(&len.to_be_bytes())?;
            }
        }
        self.next_offset = delta.end();
        Ok(())
    }

    /// Write `OP_END` and return the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if writing fails.
    pub fn finish(mut self) -> Result<W> {
        self.inner.write_all(&[OP_END])?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Encode a complete delta stream.
///
/// # Errors
///
/// See [`DeltaWriter::write`].
pub fn write_deltas<'d, W, I>(writer: W, deltas: I) -> Result<W>
where
    W: Write,
    I: IntoIterator<Item = &'d Delta>,
{
    let mut encoder = DeltaWriter::new(writer)?;
    for delta in deltas {
        encoder.write(delta)?;
    }
    encoder.finish()
}

/// Streaming delta decoder yielding deltas with rebuilt write offsets.
#[derive(Debug)]
pub struct DeltaReader<R: Read> {
    inner: R,
    write_offset: u64,
    done: bool,
}

impl<R: Read> DeltaReader<R> {
    /// Open a delta stream, checking its magic.
    ///
    /// # Errors
    ///
    /// Returns `BadMagic` if the stream is not a delta stream.
    pub fn new(mut inner: R) -> Result<Self> {
        expect_magic(&mut inner, DELTA_MAGIC)?;
        Ok(Self {
            inner,
            write_offset: 0,
            done: false,
        })
    }

    fn read_delta(&mut self) -> Result<Option<Delta>> {
        let mut opcode = [0u8; 1];
        if !fill_or_eof(&mut self.inner, &mut opcode)? {
            return Err(SyncError::MissingEndOfStream);
        }
        let len = match opcode[0] {
            OP_END => return Ok(None),
            OP_LITERAL_N1 => u64::from(read_array::<_, 1>(&mut self.inner)?[0]),
            OP_LITERAL_N2 => u64::from(u16::from_be_bytes(read_array(&mut self.inner)?)),
            OP_LITERAL_N4 => u64::from(read_u32(&mut self.inner)?),
            OP_LITERAL_N8 => u64::from_be_bytes(read_array(&mut self.inner)?),
            OP_COPY_N4_N4 => {
                let old_offset = u64::from(read_u32(&mut self.inner)?);
                let len = read_u32(&mut self.inner)?;
                let delta = Delta::copy(old_offset, self.write_offset, len);
                self.write_offset += u64::from(len);
                return Ok(Some(delta));
            }
            other => return Err(SyncError::BadOpcode(other)),
        };

        let mut data = Vec::new();
        let read = (&mut self.inner).take(len).read_to_end(&mut data)?;
        if (read as u64) < len {
            return Err(SyncError::Truncated);
        }
        let delta = Delta::literal(self.write_offset, data);
        self.write_offset += len;
        Ok(Some(delta))
    }
}

impl<R: Read> Iterator for DeltaReader<R> {
    type Item = Result<Delta>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_delta() {
            Ok(Some(delta)) => Some(Ok(delta)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode a complete delta stream.
///
/// # Errors
///
/// Returns `BadMagic`, `BadOpcode`, `Truncated` or `MissingEndOfStream`
/// for malformed input.
pub fn read_deltas<R: Read>(reader: R) -> Result<Vec<Delta>> {
    DeltaReader::new(reader)?.collect()
}

fn to_u32(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| SyncError::OffsetOverflow(value))
}

fn truncated(e: std::io::Error) -> SyncError {
    if e.kind() == ErrorKind::UnexpectedEof {
        SyncError::Truncated
    } else {
        SyncError::Io(e)
    }
}

fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    Ok(u32::from_be_bytes(read_array(reader)?))
}

fn expect_magic<R: Read>(reader: &mut R, expected: u32) -> Result<()> {
    let found = read_u32(reader)?;
    if found != expected {
        return Err(SyncError::BadMagic { expected, found });
    }
    Ok(())
}

/// Fill `buf` completely, or return `false` on EOF before the first byte.
fn fill_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(SyncError::Truncated),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use std::io::Cursor;

    fn config(block_length: usize) -> Configuration {
        Configuration::builder()
            .block_length(block_length)
            .build()
            .unwrap()
    }

    // ==========================================================================
    // SIGNATURE STREAM TESTS
    // ==========================================================================

    #[test]
    fn signature_header_layout() {
        let sig = Signature::from_bytes(b"abcd", &config(4));
        let mut buf = Vec::new();
        write_signature(&mut buf, &sig).unwrap();

        assert_eq!(&buf[..4], &[0x72, 0x73, 0x01, 0x36]);
        assert_eq!(&buf[4..8], &[0, 0, 0, 4]);
        assert_eq!(&buf[8..12], &[0, 0, 0, 8]);
        assert_eq!(buf.len(), 12 + 4 + 8);
        assert_eq!(&buf[12..16], &sig.pairs[0].weak.to_be_bytes());
    }

    #[test]
    fn signature_decode_rebuilds_offsets() {
        let sig = Signature::from_bytes(b"aaaabbbbcc", &config(4));
        let mut buf = Vec::new();
        write_signature(&mut buf, &sig).unwrap();

        let decoded = read_signature(Cursor::new(buf)).unwrap();
        assert_eq!(decoded, sig);
        let offsets: Vec<u64> = decoded.pairs.iter().map(|p| p.offset).collect();
        assert_eq!(offsets, vec![0, 4, 8]);
        // The wire does not carry the short final length
        assert_eq!(decoded.pairs[2].length, 4);
    }

    #[test]
    fn signature_rejects_delta_magic() {
        let buf = DELTA_MAGIC.to_be_bytes().to_vec();
        let err = read_signature(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, SyncError::BadMagic { .. }));
    }

    #[test]
    fn signature_rejects_partial_pair() {
        let sig = Signature::from_bytes(b"abcd", &config(4));
        let mut buf = Vec::new();
        write_signature(&mut buf, &sig).unwrap();
        buf.truncate(buf.len() - 3);
        let err = read_signature(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, SyncError::Truncated));
    }

    #[test]
    fn signature_rejects_short_header() {
        let err = read_signature(Cursor::new(vec![0x72, 0x73])).unwrap_err();
        assert!(matches!(err, SyncError::Truncated));
    }

    // ==========================================================================
    // DELTA STREAM TESTS
    // ==========================================================================

    #[test]
    fn delta_literal_widths() {
        let small = vec![1u8; 200];
        let medium = vec![2u8; 300];
        let large = vec![3u8; 70_000];
        let deltas = vec![
            Delta::literal(0, small),
            Delta::literal(200, medium),
            Delta::literal(500, large),
        ];
        let buf = write_deltas(Vec::new(), &deltas).unwrap();

        assert_eq!(&buf[..4], &DELTA_MAGIC.to_be_bytes());
        assert_eq!(&buf[4..6], &[OP_LITERAL_N1, 200]);
        assert_eq!(&buf[206..209], &[OP_LITERAL_N2, 0x01, 0x2c]);
        assert_eq!(&buf[509..514], &[OP_LITERAL_N4, 0, 1, 0x11, 0x70]);
        assert_eq!(*buf.last().unwrap(), OP_END);

        assert_eq!(read_deltas(Cursor::new(buf)).unwrap(), deltas);
    }

    #[test]
    fn delta_copy_layout() {
        let buf = write_deltas(Vec::new(), &[Delta::copy(0x0102_0304, 0, 2048)]).unwrap();
        assert_eq!(
            &buf[4..],
            &[OP_COPY_N4_N4, 1, 2, 3, 4, 0, 0, 8, 0, OP_END]
        );
    }

    #[test]
    fn delta_decode_rebuilds_write_offsets() {
        let deltas = vec![
            Delta::copy(0, 0, 4),
            Delta::literal(4, b"X".to_vec()),
            Delta::copy(4, 5, 4),
        ];
        let buf = write_deltas(Vec::new(), &deltas).unwrap();
        let decoded = read_deltas(Cursor::new(buf)).unwrap();
        let offsets: Vec<u64> = decoded.iter().map(Delta::write_offset).collect();
        assert_eq!(offsets, vec![0, 4, 5]);
    }

    #[test]
    fn delta_missing_end_is_corrupt() {
        let mut buf = write_deltas(Vec::new(), &[Delta::copy(0, 0, 4)]).unwrap();
        buf.pop();
        let err = read_deltas(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, SyncError::MissingEndOfStream));
    }

    #[test]
    fn delta_rejects_signature_magic() {
        let err = read_deltas(Cursor::new(SIG_MAGIC.to_be_bytes().to_vec())).unwrap_err();
        assert!(matches!(
            err,
            SyncError::BadMagic {
                expected: DELTA_MAGIC,
                found: SIG_MAGIC
            }
        ));
    }

    #[test]
    fn delta_rejects_unknown_opcode() {
        let mut buf = DELTA_MAGIC.to_be_bytes().to_vec();
        buf.push(0x7f);
        let err = read_deltas(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, SyncError::BadOpcode(0x7f)));
    }

    #[test]
    fn delta_truncated_literal() {
        let mut buf = DELTA_MAGIC.to_be_bytes().to_vec();
        buf.extend_from_slice(&[OP_LITERAL_N1, 10, 1, 2, 3]);
        let err = read_deltas(Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, SyncError::Truncated));
    }

    #[test]
    fn delta_reads_n8_literal() {
        let mut buf = DELTA_MAGIC.to_be_bytes().to_vec();
        buf.push(OP_LITERAL_N8);
        buf.extend_from_slice(&3u64.to_be_bytes());
        buf.extend_from_slice(b"abc");
        buf.push(OP_END);
        let decoded = read_deltas(Cursor::new(buf)).unwrap();
        assert_eq!(decoded, vec![Delta::literal(0, b"abc".to_vec())]);
    }

    #[test]
    fn writer_rejects_out_of_order() {
        let mut writer = DeltaWriter::new(Vec::new()).unwrap();
        writer.write(&Delta::copy(0, 0, 4)).unwrap();
        let err = writer.write(&Delta::copy(0, 8, 4)).unwrap_err();
        assert!(matches!(err, SyncError::DeltaOrder { expected: 4, found: 8 }));
    }

    #[test]
    fn writer_rejects_wide_offset() {
        let mut writer = DeltaWriter::new(Vec::new()).unwrap();
        let err = writer.write(&Delta::copy(1 << 32, 0, 4)).unwrap_err();
        assert!(matches!(err, SyncError::OffsetOverflow(_)));
    }

    #[test]
    fn empty_delta_stream() {
        let buf = write_deltas(Vec::new(), std::iter::empty()).unwrap();
        assert_eq!(buf.len(), 5);
        assert!(read_deltas(Cursor::new(buf)).unwrap().is_empty());
    }
}
