use super::packet::{FrameDecoder, Packet, MAX_BODY_LEN};
use crate::error_handling::types::TransportError;
use crate::reactor::sensor::{IoEvent, IoSender, SensorId};
use log::{debug, warn};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{tcp, unix, TcpStream, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const READ_CHUNK: usize = 64 * 1024;

/// How long a closed socket keeps draining queued frames to its peer.
pub const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// Why a connection went away; carried to the owning sensor in [`IoEvent::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    Io(String),
    Framing(String),
    Overflow { max: usize, cur: usize },
    AliveCheckFail(u32),
    DuplicateName,
    Local(String),
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "closed by peer"),
            CloseReason::Io(e) => write!(f, "socket error: {}", e),
            CloseReason::Framing(e) => write!(f, "framing error: {}", e),
            CloseReason::Overflow { max, cur } => {
                write!(f, "send buffer overflow (max {}, pending {})", max, cur)
            }
            CloseReason::AliveCheckFail(count) => write!(f, "alive check failed {} times", count),
            CloseReason::DuplicateName => write!(f, "duplicate session name"),
            CloseReason::Local(e) => write!(f, "{}", e),
            CloseReason::Shutdown => write!(f, "server shutdown"),
        }
    }
}

impl From<&TransportError> for CloseReason {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::Overflow { max, cur } => CloseReason::Overflow {
                max: *max,
                cur: *cur,
            },
            TransportError::Framing(e) => CloseReason::Framing(e.clone()),
            other => CloseReason::Io(other.to_string()),
        }
    }
}

#[derive(Debug)]
pub enum SocketStream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl SocketStream {
    pub fn peer_label(&self) -> String {
        match self {
            SocketStream::Tcp(s) => s
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "tcp:unknown".to_string()),
            SocketStream::Unix(s) => s
                .peer_addr()
                .ok()
                .and_then(|a| a.as_pathname().map(|p| format!("unix:{}", p.display())))
                .unwrap_or_else(|| "unix".to_string()),
        }
    }

    /// Peer IP for TCP streams.
    pub fn peer_ip(&self) -> Option<String> {
        match self {
            SocketStream::Tcp(s) => s.peer_addr().ok().map(|a| a.ip().to_string()),
            SocketStream::Unix(_) => None,
        }
    }
}

#[derive(Debug)]
pub enum SocketWriter {
    Tcp(tcp::OwnedWriteHalf),
    Unix(unix::OwnedWriteHalf),
}

impl SocketWriter {
    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SocketWriter::Tcp(w) => w.try_write(buf),
            SocketWriter::Unix(w) => w.try_write(buf),
        }
    }

    async fn writable(&self) -> io::Result<()> {
        match self {
            SocketWriter::Tcp(w) => w.writable().await,
            SocketWriter::Unix(w) => w.writable().await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The kernel took the whole frame.
    Sent,
    /// The frame, or its tail, waits in the send buffer.
    Queued,
}

/// Reads frames until EOF, an error or a corrupt header, reporting to `sensor`.
pub async fn read_frames<R>(mut reader: R, sensor: SensorId, io: IoSender, max_body_len: usize)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new(max_body_len);
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                io.send(sensor, IoEvent::Closed(CloseReason::PeerClosed));
                return;
            }
            Ok(n) => n,
            Err(e) => {
                io.send(sensor, IoEvent::Closed(CloseReason::Io(e.to_string())));
                return;
            }
        };
        decoder.push(&chunk[..n]);

        let mut packets = Vec::new();
        let failure = loop {
            match decoder.next_packet() {
                Ok(Some(packet)) => packets.push(packet),
                Ok(None) => break None,
                Err(e) => break Some(e),
            }
        };
        if !packets.is_empty() && !io.send(sensor, IoEvent::Packets(packets)) {
            return;
        }
        if let Some(e) = failure {
            io.send(sensor, IoEvent::Closed(CloseReason::Framing(e.to_string())));
            return;
        }
    }
}

/// Writes `frame` once the socket reports write readiness, releasing `pending` as bytes leave.
async fn write_frame(writer: &SocketWriter, frame: &[u8], pending: &AtomicUsize) -> io::Result<()> {
    let mut written = 0;
    while written < frame.len() {
        writer.writable().await?;
        match writer.try_write(&frame[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                written += n;
                pending.fetch_sub(n, Ordering::AcqRel);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Drains the send buffer in order until the socket closes or a write fails.
async fn write_frames(
    writer: Arc<SocketWriter>,
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    pending: Arc<AtomicUsize>,
    sensor: SensorId,
    io: IoSender,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = write_frame(&writer, &frame, &pending).await {
            io.send(sensor, IoEvent::Closed(CloseReason::Io(e.to_string())));
            return;
        }
    }
}

/// Connected stream owned by one sensor.
///
/// A reader task reports packets to the owning world. Sends never block: what
/// the kernel does not take goes to the send buffer, which a writer task drains
/// whenever the socket becomes writable. The buffer is capped at
/// `max_data_buf_size` bytes; a send that would exceed it fails with
/// [`TransportError::Overflow`]. With the writability check enabled, a send
/// first tries the socket directly when nothing is queued.
#[derive(Debug)]
pub struct Socket {
    sensor: SensorId,
    peer: String,
    writer: Option<Arc<SocketWriter>>,
    frames: Option<mpsc::UnboundedSender<Vec<u8>>>,
    pending: Arc<AtomicUsize>,
    reader: Option<JoinHandle<()>>,
    drain: Option<JoinHandle<()>>,
    writerable_check: bool,
    max_data_buf_size: usize,
}

impl Socket {
    /// Splits the stream and starts its reader and writer tasks on the current runtime.
    pub fn open(stream: SocketStream, sensor: SensorId, io: IoSender, max_data_buf_size: usize) -> Self {
        let peer = stream.peer_label();
        let (reader, writer) = match stream {
            SocketStream::Tcp(s) => {
                let (r, w) = s.into_split();
                (
                    tokio::spawn(read_frames(r, sensor, io.clone(), MAX_BODY_LEN)),
                    SocketWriter::Tcp(w),
                )
            }
            SocketStream::Unix(s) => {
                let (r, w) = s.into_split();
                (
                    tokio::spawn(read_frames(r, sensor, io.clone(), MAX_BODY_LEN)),
                    SocketWriter::Unix(w),
                )
            }
        };
        let writer = Arc::new(writer);
        let pending = Arc::new(AtomicUsize::new(0));
        let (frames, queued) = mpsc::unbounded_channel();
        let drain = tokio::spawn(write_frames(writer.clone(), queued, pending.clone(), sensor, io));
        Self {
            sensor,
            peer,
            writer: Some(writer),
            frames: Some(frames),
            pending,
            reader: Some(reader),
            drain: Some(drain),
            writerable_check: false,
            max_data_buf_size,
        }
    }

    pub fn sensor(&self) -> SensorId {
        self.sensor
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn set_writerable_check(&mut self, enabled: bool) {
        self.writerable_check = enabled;
    }

    pub fn writerable_check(&self) -> bool {
        self.writerable_check
    }

    pub fn set_max_data_buf_size(&mut self, max: usize) {
        self.max_data_buf_size = max;
    }

    pub fn max_data_buf_size(&self) -> usize {
        self.max_data_buf_size
    }

    /// Bytes handed to the socket that the kernel has not taken yet.
    pub fn pending_bytes(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_open(&self) -> bool {
        self.frames.is_some()
    }

    /// Open with an empty send buffer.
    pub fn is_writable(&self) -> bool {
        self.is_open() && self.pending_bytes() == 0
    }

    pub fn packet_send(&mut self, packet: &Packet) -> Result<SendOutcome, TransportError> {
        let (Some(writer), Some(frames)) = (self.writer.as_ref(), self.frames.as_ref()) else {
            return Err(TransportError::Closed);
        };
        let frame = packet.encode();
        let queued = self.pending.load(Ordering::Acquire);
        let cur = queued + frame.len();
        if cur > self.max_data_buf_size {
            warn!(
                "[transport] Send buffer of {} overflows: max {} cur {}",
                self.peer, self.max_data_buf_size, cur
            );
            return Err(TransportError::Overflow {
                max: self.max_data_buf_size,
                cur,
            });
        }

        let mut offset = 0;
        // an empty buffer means the writer task is idle, so writing here keeps the order
        if self.writerable_check && queued == 0 {
            while offset < frame.len() {
                match writer.try_write(&frame[offset..]) {
                    Ok(0) => return Err(TransportError::Io(io::ErrorKind::WriteZero.into())),
                    Ok(n) => offset += n,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e.into()),
                }
            }
            if offset == frame.len() {
                return Ok(SendOutcome::Sent);
            }
        }

        let tail = if offset == 0 { frame } else { frame[offset..].to_vec() };
        self.pending.fetch_add(tail.len(), Ordering::AcqRel);
        if frames.send(tail).is_err() {
            return Err(TransportError::Closed);
        }
        Ok(SendOutcome::Queued)
    }

    /// Stops the reader. Queued frames still drain for up to [`CLOSE_LINGER`].
    pub fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer = None;
        if self.frames.take().is_some() {
            debug!("[transport] Closed socket to {}", self.peer);
        }
        let Some(mut drain) = self.drain.take() else {
            return;
        };
        if self.pending_bytes() == 0 {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if tokio::time::timeout(CLOSE_LINGER, &mut drain).await.is_err() {
                        drain.abort();
                    }
                });
            }
            Err(_) => drain.abort(),
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(drain) = self.drain.take() {
            drain.abort();
        }
    }
}
