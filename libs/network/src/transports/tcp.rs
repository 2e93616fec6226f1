//! TCP Framed Connection
//!
//! Length-prefixed framing over a TCP stream: `len:u32 (big-endian) | frame`.
//! The stream is split into independently owned halves so one task can
//! block on reads while any number of senders take turns on the writer.
//!
//! ## Port-Sharing Handshake
//!
//! The first frame on every connection is a hello naming the target path:
//!
//! ```text
//! client                         listener
//!   │ ── "PORT/1 /ns/service" ──► │  path lookup
//!   │ ◄──────── "OK" ──────────── │  known path: hand off to service
//!   │ ◄── "ERR unknown path" ──── │  unknown path: close
//! ```

use crate::{Result, TransportError};
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

pub const HANDSHAKE_PREFIX: &str = "PORT/1 ";
pub const HANDSHAKE_OK: &str = "OK";
pub const HANDSHAKE_UNKNOWN_PATH: &str = "ERR unknown path";

/// Largest frame accepted during the handshake
const MAX_HANDSHAKE_FRAME: usize = 4096;

/// Read side of a framed connection
pub struct FrameReader {
    half: OwnedReadHalf,
    peer_addr: SocketAddr,
    max_frame_size: usize,
    read_buffer: BytesMut,
    bytes_received: u64,
}

impl FrameReader {
    /// Receive one frame
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly
    /// between frames.
    pub async fn receive_frame(&mut self) -> Result<Option<Bytes>> {
        let mut len_bytes = [0u8; 4];
        match self.half.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => {
                return Err(TransportError::connection_with_source(
                    "Failed to read frame length",
                    Some(self.peer_addr),
                    e,
                ))
            }
        }

        let frame_len = u32::from_be_bytes(len_bytes) as usize;
        if frame_len > self.max_frame_size {
            return Err(TransportError::protocol(format!(
                "Frame size {} exceeds maximum {}",
                frame_len, self.max_frame_size
            )));
        }

        self.read_buffer.resize(frame_len, 0);
        self.half.read_exact(&mut self.read_buffer).await.map_err(|e| {
            TransportError::connection_with_source(
                "Failed to read frame body",
                Some(self.peer_addr),
                e,
            )
        })?;

        self.bytes_received += 4 + frame_len as u64;
        debug!(
            peer = %self.peer_addr,
            bytes = frame_len,
            total_received = self.bytes_received,
            "Received frame over TCP"
        );

        Ok(Some(self.read_buffer.split_to(frame_len).freeze()))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

/// Write side of a framed connection
pub struct FrameWriter {
    half: OwnedWriteHalf,
    peer_addr: SocketAddr,
    max_frame_size: usize,
    write_buffer: BytesMut,
    bytes_sent: u64,
    last_activity: Instant,
}

impl FrameWriter {
    /// Send one frame with its length prefix in a single write
    pub async fn send_frame(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > self.max_frame_size {
            return Err(TransportError::protocol(format!(
                "Frame size {} exceeds maximum {}",
                data.len(),
                self.max_frame_size
            )));
        }

        self.write_buffer.clear();
        self.write_buffer
            .extend_from_slice(&(data.len() as u32).to_be_bytes());
        self.write_buffer.extend_from_slice(data);

        self.half.write_all(&self.write_buffer).await.map_err(|e| {
            TransportError::connection_with_source("Failed to write frame", Some(self.peer_addr), e)
        })?;
        self.half.flush().await.map_err(|e| {
            TransportError::connection_with_source("Failed to flush TCP stream", Some(self.peer_addr), e)
        })?;

        self.bytes_sent += 4 + data.len() as u64;
        self.last_activity = Instant::now();

        debug!(
            peer = %self.peer_addr,
            bytes = data.len(),
            total_sent = self.bytes_sent,
            "Sent frame over TCP"
        );
        Ok(())
    }

    /// Half-close the connection
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.half.shutdown().await {
            debug!(peer = %self.peer_addr, error = %e, "Error shutting down TCP stream");
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }
}

/// Split a connected stream into framed halves
pub fn framed(stream: TcpStream, max_frame_size: usize) -> Result<(FrameReader, FrameWriter)> {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }
    let peer_addr = stream
        .peer_addr()
        .map_err(|e| TransportError::network_with_source("Failed to get peer address", e))?;
    let (read_half, write_half) = stream.into_split();

    Ok((
        FrameReader {
            half: read_half,
            peer_addr,
            max_frame_size,
            read_buffer: BytesMut::with_capacity(64 * 1024),
            bytes_received: 0,
        },
        FrameWriter {
            half: write_half,
            peer_addr,
            max_frame_size,
            write_buffer: BytesMut::with_capacity(64 * 1024),
            bytes_sent: 0,
            last_activity: Instant::now(),
        },
    ))
}

/// Connect to `addr` and complete the port-sharing handshake for `path`
pub async fn connect(
    addr: SocketAddr,
    path: &str,
    connect_timeout: Duration,
    max_frame_size: usize,
) -> Result<(FrameReader, FrameWriter)> {
    let timeout_ms = connect_timeout.as_millis() as u64;
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| TransportError::timeout("TCP connect", timeout_ms))?
        .map_err(|e| {
            TransportError::connection_with_source("Failed to connect to TCP peer", Some(addr), e)
        })?;

    let (mut reader, mut writer) = framed(stream, max_frame_size)?;
    writer
        .send_frame(format!("{HANDSHAKE_PREFIX}{path}").as_bytes())
        .await?;

    let reply = tokio::time::timeout(connect_timeout, reader.receive_frame())
        .await
        .map_err(|_| TransportError::timeout("port handshake", timeout_ms))??;
    match reply.as_deref() {
        Some(reply) if reply == HANDSHAKE_OK.as_bytes() => {
            debug!(peer = %addr, path, "Handshake accepted");
            Ok((reader, writer))
        }
        Some(reply) => Err(TransportError::handshake(
            path,
            String::from_utf8_lossy(reply).into_owned(),
        )),
        None => Err(TransportError::handshake(path, "connection closed during handshake")),
    }
}

/// Listener side of the handshake: read the hello and return the path
pub async fn read_hello(reader: &mut FrameReader, timeout: Duration) -> Result<String> {
    let frame = tokio::time::timeout(timeout, reader.receive_frame())
        .await
        .map_err(|_| TransportError::timeout("port handshake", timeout.as_millis() as u64))??
        .ok_or_else(|| TransportError::handshake("", "connection closed before hello"))?;

    if frame.len() > MAX_HANDSHAKE_FRAME {
        return Err(TransportError::handshake("", "hello frame too large"));
    }
    let text = std::str::from_utf8(&frame)
        .map_err(|e| TransportError::protocol_with_source("Hello is not UTF-8", e))?;
    text.strip_prefix(HANDSHAKE_PREFIX)
        .map(str::to_string)
        .ok_or_else(|| TransportError::handshake("", format!("unrecognised hello '{text}'")))
}
