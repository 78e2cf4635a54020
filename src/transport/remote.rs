//! Party proxy over a byte stream.
//!
//! [`RemoteParty`] forwards every [`SyncParty`] call as a framed request and
//! [`serve`] answers them from any other party. Each frame is a fixed
//! header followed by a bincode payload:
//!
//! ```text
//! ┌─────────┬─────────┬─────────┬─────────┬─────────┐
//! │  MAGIC  │ LENGTH  │  TYPE   │ VERSION │  FLAGS  │
//! │ 4 bytes │ 4 bytes │ 1 byte  │ 1 byte  │ 2 bytes │
//! └─────────┴─────────┴─────────┴─────────┴─────────┘
//! ```

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::SyncParty;
use crate::delta::Delta;
use crate::error::{Result, SyncError};
use crate::signature::Signature;

/// Frame magic bytes.
pub const PROTOCOL_MAGIC: [u8; 4] = *b"TSYN";

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest accepted payload (256 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 256 * 1024 * 1024;

/// Bytes a [`RemoteWriter`] buffers before sending them.
const WRITE_CHUNK: usize = 64 * 1024;

/// Frame payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum MessageType {
    Request = 0x01,
    Response = 0x02,
}

impl MessageType {
    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Request),
            0x02 => Ok(Self::Response),
            _ => Err(SyncError::Protocol(format!(
                "Invalid message type: {value:#x}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    magic: [u8; 4],
    length: u32,
    msg_type: MessageType,
    version: u8,
    flags: u16,
}

impl FrameHeader {
    const SIZE: usize = 12;

    const fn new(msg_type: MessageType, length: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            length,
            msg_type,
            version: PROTOCOL_VERSION,
            flags: 0,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.magic != PROTOCOL_MAGIC {
            return Err(SyncError::Protocol(format!(
                "Invalid magic: expected {PROTOCOL_MAGIC:?}, got {:?}",
                self.magic
            )));
        }
        if self.version != PROTOCOL_VERSION {
            return Err(SyncError::Protocol(format!(
                "Unsupported version: expected {PROTOCOL_VERSION}, got {}",
                self.version
            )));
        }
        if self.length > MAX_PAYLOAD_SIZE {
            return Err(SyncError::Protocol(format!(
                "Payload too large: {} > {MAX_PAYLOAD_SIZE}",
                self.length
            )));
        }
        Ok(())
    }

    fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf[8] = self.msg_type as u8;
        buf[9] = self.version;
        buf[10..12].copy_from_slice(&self.flags.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; Self::SIZE]) -> Result<Self> {
        let header = Self {
            magic: [buf[0], buf[1], buf[2], buf[3]],
            length: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            msg_type: MessageType::from_u8(buf[8])?,
            version: buf[9],
            flags: u16::from_le_bytes([buf[10], buf[11]]),
        };
        header.validate()?;
        Ok(header)
    }
}

/// A party call, as sent by [`RemoteParty`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Request {
    ResolvePath { path: String },
    ListDirectories { path: String },
    ListFiles { path: String },
    ReadSignature { path: String },
    MakePath { path: String },
    OpenWrite { path: String },
    Write { handle: u32, data: Vec<u8> },
    Flush { handle: u32 },
    Close { handle: u32 },
    Stream { path: String },
    PrepareDelta { path: String, signature: Signature },
    ApplyDelta { path: String, deltas: Vec<Delta> },
    EraseFile { path: String },
    EraseDirectory { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum Response {
    Path(String),
    Names(Vec<String>),
    Signature(Signature),
    Created(bool),
    Handle(u32),
    Done,
    /// Part of a `Stream` reply; the last frame is `Streamed`.
    Chunk(Vec<u8>),
    Streamed(u64),
    Deltas(Vec<Delta>),
    Failed { message: String },
}

fn write_frame<W: Write + ?Sized, T: Serialize>(
    writer: &mut W,
    msg_type: MessageType,
    message: &T,
) -> Result<()> {
    let payload = bincode::serialize(message)
        .map_err(|e| SyncError::Protocol(format!("Failed to encode message: {e}")))?;
    let length = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_PAYLOAD_SIZE)
        .ok_or_else(|| {
            SyncError::Protocol(format!(
                "Payload exceeds maximum size: {} > {MAX_PAYLOAD_SIZE}",
                payload.len()
            ))
        })?;
    writer.write_all(&FrameHeader::new(msg_type, length).encode())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame; `None` on a clean end of stream before a header.
fn read_frame<R: Read + ?Sized, T: DeserializeOwned>(
    reader: &mut R,
    expected: MessageType,
) -> Result<Option<T>> {
    let mut buf = [0u8; FrameHeader::SIZE];
    match reader.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = FrameHeader::decode(&buf)?;
    if header.msg_type != expected {
        return Err(SyncError::Protocol(format!(
            "Unexpected message type: {:?}",
            header.msg_type
        )));
    }
    let mut payload = vec![0u8; header.length as usize];
    reader.read_exact(&mut payload)?;
    bincode::deserialize(&payload)
        .map(Some)
        .map_err(|e| SyncError::Protocol(format!("Failed to decode message: {e}")))
}

fn unexpected(response: Response) -> SyncError {
    match response {
        Response::Failed { message } => SyncError::Io(io::Error::new(ErrorKind::Other, message)),
        other => SyncError::Protocol(format!("Unexpected response: {other:?}")),
    }
}

fn into_io(err: SyncError) -> io::Error {
    match err {
        SyncError::Io(e) => e,
        other => io::Error::new(ErrorKind::Other, other.to_string()),
    }
}

/// A party living on the far side of a connection.
///
/// Calls are serialized over the single connection, so the proxy may be
/// shared between threads.
#[derive(Debug)]
pub struct RemoteParty<S> {
    conn: Mutex<S>,
    label: String,
}

impl RemoteParty<TcpStream> {
    /// Connect to a [`serve`] loop listening on `addr`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the connection fails.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let label = stream
            .peer_addr()
            .map_or_else(|_| "remote".to_string(), |addr| addr.to_string());
        info!(peer = %label, "connected");
        Ok(Self::with_label(stream, label))
    }
}

impl<S: Read + Write> RemoteParty<S> {
    /// Wrap an established connection.
    pub fn new(stream: S) -> Self {
        Self::with_label(stream, "remote")
    }

    /// Wrap an established connection, naming the peer in resolved paths.
    pub fn with_label(stream: S, label: impl Into<String>) -> Self {
        Self {
            conn: Mutex::new(stream),
            label: label.into(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, S>> {
        self.conn
            .lock()
            .map_err(|_| SyncError::Protocol("connection lock poisoned".to_string()))
    }

    fn call(&self, request: &Request) -> Result<Response> {
        let mut conn = self.lock()?;
        write_frame(&mut *conn, MessageType::Request, request)?;
        receive(&mut *conn)
    }

    fn expect_done(&self, request: &Request) -> Result<()> {
        match self.call(request)? {
            Response::Done => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    fn names(&self, request: &Request) -> Result<Vec<String>> {
        match self.call(request)? {
            Response::Names(names) => Ok(names),
            other => Err(unexpected(other)),
        }
    }
}

fn receive<R: Read + ?Sized>(reader: &mut R) -> Result<Response> {
    read_frame(reader, MessageType::Response)?
        .ok_or_else(|| SyncError::Protocol("connection closed".to_string()))
}

impl<S: Read + Write> SyncParty for RemoteParty<S> {
    fn resolve_path(&self, path: &str) -> String {
        let request = Request::ResolvePath {
            path: path.to_string(),
        };
        match self.call(&request) {
            Ok(Response::Path(resolved)) => format!("{}:{resolved}", self.label),
            Ok(other) => {
                warn!(error = %unexpected(other), "cannot resolve remote path");
                format!("{}:{path}", self.label)
            }
            Err(e) => {
                warn!(error = %e, "cannot resolve remote path");
                format!("{}:{path}", self.label)
            }
        }
    }

    fn list_directories(&self, path: &str) -> Result<Vec<String>> {
        self.names(&Request::ListDirectories {
            path: path.to_string(),
        })
    }

    fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.names(&Request::ListFiles {
            path: path.to_string(),
        })
    }

    fn read_signature(&self, path: &str) -> Result<Signature> {
        match self.call(&Request::ReadSignature {
            path: path.to_string(),
        })? {
            Response::Signature(signature) => Ok(signature),
            other => Err(unexpected(other)),
        }
    }

    fn make_path(&self, path: &str) -> Result<bool> {
        match self.call(&Request::MakePath {
            path: path.to_string(),
        })? {
            Response::Created(created) => Ok(created),
            other => Err(unexpected(other)),
        }
    }

    fn open_for_write(&self, path: &str) -> Result<Box<dyn Write + '_>> {
        match self.call(&Request::OpenWrite {
            path: path.to_string(),
        })? {
            Response::Handle(handle) => Ok(Box::new(RemoteWriter {
                party: self,
                handle,
                buffer: Vec::with_capacity(WRITE_CHUNK),
            })),
            other => Err(unexpected(other)),
        }
    }

    fn stream_to(&self, path: &str, sink: &mut dyn Write) -> Result<u64> {
        let mut conn = self.lock()?;
        write_frame(
            &mut *conn,
            MessageType::Request,
            &Request::Stream {
                path: path.to_string(),
            },
        )?;
        loop {
            match receive(&mut *conn)? {
                Response::Chunk(data) => sink.write_all(&data)?,
                Response::Streamed(total) => {
                    sink.flush()?;
                    return Ok(total);
                }
                other => return Err(unexpected(other)),
            }
        }
    }

    fn prepare_delta(&self, path: &str, signature: &Signature) -> Result<Vec<Delta>> {
        match self.call(&Request::PrepareDelta {
            path: path.to_string(),
            signature: signature.clone(),
        })? {
            Response::Deltas(deltas) => Ok(deltas),
            other => Err(unexpected(other)),
        }
    }

    fn apply_delta(&self, path: &str, deltas: &[Delta]) -> Result<()> {
        self.expect_done(&Request::ApplyDelta {
            path: path.to_string(),
            deltas: deltas.to_vec(),
        })
    }

    fn erase_file(&self, path: &str) -> Result<()> {
        self.expect_done(&Request::EraseFile {
            path: path.to_string(),
        })
    }

    fn erase_directory(&self, path: &str) -> Result<()> {
        self.expect_done(&Request::EraseDirectory {
            path: path.to_string(),
        })
    }
}

/// Write handle on a remote file.
///
/// Data is buffered locally; `flush` pushes it to the peer and surfaces
/// any remote write error. Dropping the writer closes the remote file.
pub struct RemoteWriter<'a, S: Read + Write> {
    party: &'a RemoteParty<S>,
    handle: u32,
    buffer: Vec<u8>,
}

impl<S: Read + Write> RemoteWriter<'_, S> {
    fn send_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let data = std::mem::replace(&mut self.buffer, Vec::with_capacity(WRITE_CHUNK));
        self.party.expect_done(&Request::Write {
            handle: self.handle,
            data,
        })
    }
}

impl<S: Read + Write> Write for RemoteWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= WRITE_CHUNK {
            self.send_buffer().map_err(into_io)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer().map_err(into_io)?;
        self.party
            .expect_done(&Request::Flush {
                handle: self.handle,
            })
            .map_err(into_io)
    }
}

impl<S: Read + Write> Drop for RemoteWriter<'_, S> {
    fn drop(&mut self) {
        let result = self.send_buffer().and_then(|()| {
            self.party.expect_done(&Request::Close {
                handle: self.handle,
            })
        });
        if let Err(e) = result {
            warn!(handle = self.handle, error = %e, "closing remote file failed");
        }
    }
}

/// Sink that forwards written bytes as `Chunk` frames.
struct ChunkSink<'w, W: ?Sized> {
    writer: &'w mut W,
}

impl<W: Write + ?Sized> Write for ChunkSink<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        write_frame(
            self.writer,
            MessageType::Response,
            &Response::Chunk(buf.to_vec()),
        )
        .map_err(into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Answer requests from `stream` against `party` until the peer disconnects.
///
/// Party failures are reported to the peer and do not end the loop.
///
/// # Errors
///
/// Returns an error if the connection breaks or carries a malformed frame.
pub fn serve<P, S>(party: &P, mut stream: S) -> Result<()>
where
    P: SyncParty + ?Sized,
    S: Read + Write,
{
    let mut handles: HashMap<u32, Box<dyn Write + '_>> = HashMap::new();
    let mut next_handle = 0u32;

    while let Some(request) = read_frame::<_, Request>(&mut stream, MessageType::Request)? {
        debug!(?request, "request");
        let response = match request {
            Request::OpenWrite { path } => party.open_for_write(&path).map(|sink| {
                next_handle = next_handle.wrapping_add(1);
                handles.insert(next_handle, sink);
                Response::Handle(next_handle)
            }),
            Request::Write { handle, data } => with_handle(&mut handles, handle, |sink| {
                sink.write_all(&data)
            }),
            Request::Flush { handle } => with_handle(&mut handles, handle, Write::flush),
            Request::Close { handle } => match handles.remove(&handle) {
                Some(mut sink) => sink.flush().map(|()| Response::Done).map_err(Into::into),
                None => Err(unknown_handle(handle)),
            },
            Request::Stream { path } => {
                let streamed = party.stream_to(&path, &mut ChunkSink {
                    writer: &mut stream,
                });
                streamed.map(Response::Streamed)
            }
            other => answer(party, other),
        };

        let response = response.unwrap_or_else(|e| {
            warn!(error = %e, "request failed");
            Response::Failed {
                message: e.to_string(),
            }
        });
        write_frame(&mut stream, MessageType::Response, &response)?;
    }

    info!(open_handles = handles.len(), "peer disconnected");
    Ok(())
}

fn unknown_handle(handle: u32) -> SyncError {
    SyncError::Protocol(format!("Unknown write handle: {handle}"))
}

fn with_handle<'p>(
    handles: &mut HashMap<u32, Box<dyn Write + 'p>>,
    handle: u32,
    op: impl FnOnce(&mut Box<dyn Write + 'p>) -> io::Result<()>,
) -> Result<Response> {
    let sink = handles.get_mut(&handle).ok_or_else(|| unknown_handle(handle))?;
    op(sink)?;
    Ok(Response::Done)
}

fn answer<P: SyncParty + ?Sized>(party: &P, request: Request) -> Result<Response> {
    Ok(match request {
        Request::ResolvePath { path } => Response::Path(party.resolve_path(&path)),
        Request::ListDirectories { path } => Response::Names(party.list_directories(&path)?),
        Request::ListFiles { path } => Response::Names(party.list_files(&path)?),
        Request::ReadSignature { path } => Response::Signature(party.read_signature(&path)?),
        Request::MakePath { path } => Response::Created(party.make_path(&path)?),
        Request::PrepareDelta { path, signature } => {
            Response::Deltas(party.prepare_delta(&path, &signature)?)
        }
        Request::ApplyDelta { path, deltas } => {
            party.apply_delta(&path, &deltas)?;
            Response::Done
        }
        Request::EraseFile { path } => {
            party.erase_file(&path)?;
            Response::Done
        }
        Request::EraseDirectory { path } => {
            party.erase_directory(&path)?;
            Response::Done
        }
        other => {
            return Err(SyncError::Protocol(format!(
                "Request needs connection state: {other:?}"
            )))
        }
    })
}
