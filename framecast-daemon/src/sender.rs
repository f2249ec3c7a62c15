//! Stream senders shipped with the daemon.
//!
//! [`NullSender`] accepts and counts frames. [`UdpFrameSender`] splits each
//! raw RGBA frame into MTU-sized datagrams so it can cross a plain link
//! without IP fragmentation.
//!
//! ## Wire format
//!
//! **Frame header datagram** (28 bytes):
//! ```text
//! sequence:       u32  (4)
//! frame_number:   u64  (8)
//! width:          u32  (4)
//! height:         u32  (4)
//! total_chunks:   u32  (4)
//! payload_len:    u32  (4)
//! ```
//!
//! **Chunk datagram** (12 byte header + payload):
//! ```text
//! sequence:       u32  (4)
//! chunk_index:    u32  (4)
//! chunk_size:     u32  (4)
//! data:           [u8] (variable, ≤ MTU − 12)
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use tokio::net::UdpSocket;
use tracing::{debug, info};

use framecast_core::{Frame, SendError, SenderFactory, VideoSender};

use crate::config::{SenderConfig, SenderKind};

// ── Constants ────────────────────────────────────────────────────

/// Maximum transmission unit minus IP (20) + UDP (8) headers.
pub const DEFAULT_MTU: usize = 1400;

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    u64::from(read_u32(data, at)) | (u64::from(read_u32(data, at + 4)) << 32)
}

// ── FrameHeader ──────────────────────────────────────────────────

/// Per-frame metadata sent as the first datagram of each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence: u32,
    pub frame_number: u64,
    pub width: u32,
    pub height: u32,
    pub total_chunks: u32,
    pub payload_len: u32,
}

impl FrameHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 28;

    /// Serialize to bytes (little-endian).
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.sequence.to_le_bytes());
        buf[4..12].copy_from_slice(&self.frame_number.to_le_bytes());
        buf[12..16].copy_from_slice(&self.width.to_le_bytes());
        buf[16..20].copy_from_slice(&self.height.to_le_bytes());
        buf[20..24].copy_from_slice(&self.total_chunks.to_le_bytes());
        buf[24..28].copy_from_slice(&self.payload_len.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, SendError> {
        if data.len() < Self::SIZE {
            return Err(SendError::Other(format!(
                "FrameHeader too short: {} < {}",
                data.len(),
                Self::SIZE,
            )));
        }
        Ok(Self {
            sequence: read_u32(data, 0),
            frame_number: read_u64(data, 4),
            width: read_u32(data, 12),
            height: read_u32(data, 16),
            total_chunks: read_u32(data, 20),
            payload_len: read_u32(data, 24),
        })
    }
}

// ── ChunkHeader ──────────────────────────────────────────────────

/// Per-chunk metadata prepended to each data datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub sequence: u32,
    pub chunk_index: u32,
    pub chunk_size: u32,
}

impl ChunkHeader {
    pub const SIZE: usize = 12;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.sequence.to_le_bytes());
        buf[4..8].copy_from_slice(&self.chunk_index.to_le_bytes());
        buf[8..12].copy_from_slice(&self.chunk_size.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, SendError> {
        if data.len() < Self::SIZE {
            return Err(SendError::Other(format!(
                "ChunkHeader too short: {} < {}",
                data.len(),
                Self::SIZE,
            )));
        }
        Ok(Self {
            sequence: read_u32(data, 0),
            chunk_index: read_u32(data, 4),
            chunk_size: read_u32(data, 8),
        })
    }
}

// ── NullSender ───────────────────────────────────────────────────

/// Accepts every frame and keeps a count.
pub struct NullSender {
    label: Mutex<String>,
    frames: AtomicU64,
    closed: AtomicBool,
}

impl NullSender {
    pub fn new(label: &str) -> Self {
        Self {
            label: Mutex::new(label.to_string()),
            frames: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn label(&self) -> String {
        self.label.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl VideoSender for NullSender {
    async fn send(&self, _frame: &Frame) -> Result<(), SendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn rename(&self, label: &str) -> Result<(), SendError> {
        let mut current = self
            .label
            .lock()
            .map_err(|_| SendError::Other("label lock poisoned".into()))?;
        *current = label.to_string();
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(label = %self.label(), frames = self.frames(), "null sender closed");
        }
    }
}

// ── UdpFrameSender ───────────────────────────────────────────────

/// Sends raw frames as a header datagram followed by chunk datagrams.
pub struct UdpFrameSender {
    socket: UdpSocket,
    remote_addr: SocketAddr,
    label: Mutex<String>,
    sequence: AtomicU32,
    mtu: usize,
    bytes_sent: AtomicU64,
    closed: AtomicBool,
}

impl UdpFrameSender {
    /// Bind `bind` and target `remote_addr`.
    pub async fn bind(bind: &str, remote_addr: SocketAddr, label: &str) -> Result<Self, SendError> {
        let socket = UdpSocket::bind(bind).await?;
        Ok(Self {
            socket,
            remote_addr,
            label: Mutex::new(label.to_string()),
            sequence: AtomicU32::new(0),
            mtu: DEFAULT_MTU,
            bytes_sent: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Override the datagram size. Values too small to carry a chunk header
    /// plus one byte are raised to that minimum.
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu.max(ChunkHeader::SIZE + 1).max(FrameHeader::SIZE);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SendError> {
        Ok(self.socket.local_addr()?)
    }

    /// Total bytes sent across all frames.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    fn label(&self) -> String {
        self.label.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl VideoSender for UdpFrameSender {
    async fn send(&self, frame: &Frame) -> Result<(), SendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let pixels = frame.pixels();
        let chunk_payload_max = self.mtu - ChunkHeader::SIZE;
        let total_chunks = pixels.len().div_ceil(chunk_payload_max);

        // 1. Frame header datagram.
        let header = FrameHeader {
            sequence: seq,
            frame_number: frame.sequence(),
            width: frame.width(),
            height: frame.height(),
            total_chunks: total_chunks as u32,
            payload_len: pixels.len() as u32,
        };
        let mut sent_total = self
            .socket
            .send_to(&header.encode(), self.remote_addr)
            .await?;

        // 2. Data chunk datagrams.
        let mut datagram = BytesMut::with_capacity(self.mtu);
        for (idx, chunk) in pixels.chunks(chunk_payload_max).enumerate() {
            let ch = ChunkHeader {
                sequence: seq,
                chunk_index: idx as u32,
                chunk_size: chunk.len() as u32,
            };
            datagram.clear();
            datagram.put_slice(&ch.encode());
            datagram.put_slice(chunk);
            sent_total += self.socket.send_to(&datagram, self.remote_addr).await?;
        }

        self.bytes_sent
            .fetch_add(sent_total as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn rename(&self, label: &str) -> Result<(), SendError> {
        let mut current = self
            .label
            .lock()
            .map_err(|_| SendError::Other("label lock poisoned".into()))?;
        *current = label.to_string();
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(
                label = %self.label(),
                bytes = self.bytes_sent(),
                "udp sender closed"
            );
        }
    }
}

// ── Factory ──────────────────────────────────────────────────────

/// Opens the sender kind named in `[sender]` for each output.
pub struct DaemonSenderFactory {
    config: SenderConfig,
}

impl DaemonSenderFactory {
    pub fn new(config: SenderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SenderFactory for DaemonSenderFactory {
    async fn open(
        &self,
        label: &str,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<Arc<dyn VideoSender>, SendError> {
        match self.config.kind {
            SenderKind::Null => Ok(Arc::new(NullSender::new(label))),
            SenderKind::Udp => {
                let remote: SocketAddr = self.config.destination.parse().map_err(|e| {
                    SendError::Other(format!(
                        "bad destination {:?}: {e}",
                        self.config.destination
                    ))
                })?;
                let sender = UdpFrameSender::bind(&self.config.bind, remote, label)
                    .await?
                    .with_mtu(self.config.mtu);
                info!(
                    label,
                    %remote,
                    "udp sender open ({width}x{height} @ {frame_rate} fps)"
                );
                Ok(Arc::new(sender))
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
