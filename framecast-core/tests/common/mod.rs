//! In-memory renderer and sender used by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use framecast_core::{
    Frame, FrameSubscription, OutputConfig, OutputId, PushMetadata, PushedFrame, RenderError,
    Renderer, SendError, SenderFactory, SurfaceHandle, VideoSender,
};
use image::{ImageBuffer, ImageFormat, Rgba};

/// Shared, ordered record of collaborator calls.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn count(log: &EventLog, prefix: &str) -> usize {
    log.lock().unwrap().iter().filter(|e| e.starts_with(prefix)).count()
}

pub fn png(width: u32, height: u32, px: [u8; 4]) -> Bytes {
    let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_pixel(width, height, Rgba(px));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    Bytes::from(out.into_inner())
}

pub fn output(id: &str, width: u32, height: u32, fps: u32) -> OutputConfig {
    OutputConfig::new(id)
        .with_geometry(width, height)
        .with_frame_rate(fps)
        .with_label(id.to_uppercase())
}

// ── MockRenderer ─────────────────────────────────────────────────

pub struct MockRenderer {
    pub log: EventLog,
    still: Mutex<Bytes>,
    /// Simulated time spent rendering each still.
    pub latency: Mutex<Duration>,
    /// Every Nth capture returns garbage (0 = never).
    pub corrupt_every: AtomicU64,
    pub fail_allocate: Mutex<HashSet<String>>,
    /// Outputs whose captures panic inside the renderer.
    pub panic_on_capture: Mutex<HashSet<String>>,
    pub streaming: AtomicBool,
    pub captures: AtomicU64,
    in_flight: AtomicU32,
    pub max_in_flight: AtomicU32,
    pub capture_starts: Mutex<Vec<tokio::time::Instant>>,
}

impl MockRenderer {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            still: Mutex::new(png(16, 9, [10, 20, 30, 255])),
            latency: Mutex::new(Duration::ZERO),
            corrupt_every: AtomicU64::new(0),
            fail_allocate: Mutex::new(HashSet::new()),
            panic_on_capture: Mutex::new(HashSet::new()),
            streaming: AtomicBool::new(false),
            captures: AtomicU64::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            capture_starts: Mutex::new(Vec::new()),
        }
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn set_still(&self, still: Bytes) {
        *self.still.lock().unwrap() = still;
    }

    pub fn fail_allocation_for(&self, id: &str) {
        self.fail_allocate.lock().unwrap().insert(id.to_string());
    }

    pub fn panic_on_capture_for(&self, id: &str) {
        self.panic_on_capture.lock().unwrap().insert(id.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail_allocate.lock().unwrap().clear();
        self.panic_on_capture.lock().unwrap().clear();
    }
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn allocate_surface(
        &self,
        id: &OutputId,
        width: u32,
        height: u32,
        _target: &str,
    ) -> Result<SurfaceHandle, RenderError> {
        if self.fail_allocate.lock().unwrap().contains(id.as_str()) {
            return Err(RenderError::Unavailable("no GPU".into()));
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("allocate {id} {width}x{height}"));
        Ok(SurfaceHandle {
            id: id.clone(),
            width,
            height,
        })
    }

    async fn capture_still(&self, id: &OutputId) -> Result<Option<Bytes>, RenderError> {
        let panics = self.panic_on_capture.lock().unwrap().contains(id.as_str());
        if panics {
            panic!("renderer crashed capturing {id}");
        }
        self.capture_starts
            .lock()
            .unwrap()
            .push(tokio::time::Instant::now());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let n = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let every = self.corrupt_every.load(Ordering::SeqCst);
        if every != 0 && n % every == 0 {
            return Ok(Some(Bytes::from_static(b"\x89PNG\r\n\x1a\ntruncated")));
        }
        Ok(Some(self.still.lock().unwrap().clone()))
    }

    async fn subscribe_stream(
        &self,
        id: &OutputId,
        max_rate: u32,
    ) -> Result<FrameSubscription, RenderError> {
        if !self.streaming.load(Ordering::SeqCst) {
            return Err(RenderError::StreamingUnsupported);
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("subscribe {id} {max_rate}"));

        let (sub, mut publisher) = FrameSubscription::channel();
        let still = self.still.lock().unwrap().clone();
        let interval = Duration::from_secs_f64(1.0 / max_rate.max(1) as f64);
        tokio::spawn(async move {
            let mut seq = 0;
            loop {
                seq += 1;
                let frame = PushedFrame {
                    data: still.clone(),
                    metadata: PushMetadata {
                        sequence: seq,
                        device_width: 16,
                        device_height: 9,
                    },
                };
                if !publisher.push(frame).await {
                    break;
                }
                tokio::time::sleep(interval).await;
            }
        });
        Ok(sub)
    }

    async fn release_surface(&self, id: &OutputId) {
        self.log.lock().unwrap().push(format!("release {id}"));
    }
}

// ── MockSender ───────────────────────────────────────────────────

pub struct MockSenderFactory {
    pub log: EventLog,
    pub fail_open: AtomicBool,
    pub fail_sends: Arc<AtomicBool>,
    pub fail_renames: Arc<AtomicBool>,
    pub send_latency: Arc<Mutex<Duration>>,
    pub sent: Arc<AtomicU64>,
    pub last_sent: Arc<Mutex<Option<(u64, u32, u32)>>>,
}

impl MockSenderFactory {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail_open: AtomicBool::new(false),
            fail_sends: Arc::new(AtomicBool::new(false)),
            fail_renames: Arc::new(AtomicBool::new(false)),
            send_latency: Arc::new(Mutex::new(Duration::ZERO)),
            sent: Arc::new(AtomicU64::new(0)),
            last_sent: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl SenderFactory for MockSenderFactory {
    async fn open(
        &self,
        label: &str,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<Arc<dyn VideoSender>, SendError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(SendError::Other("sender library missing".into()));
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("open {label} {width}x{height}@{frame_rate}"));
        Ok(Arc::new(MockSender {
            label: Mutex::new(label.to_string()),
            log: Arc::clone(&self.log),
            fail_sends: Arc::clone(&self.fail_sends),
            fail_renames: Arc::clone(&self.fail_renames),
            latency: Arc::clone(&self.send_latency),
            sent: Arc::clone(&self.sent),
            last_sent: Arc::clone(&self.last_sent),
            closed: AtomicBool::new(false),
        }))
    }
}

pub struct MockSender {
    label: Mutex<String>,
    log: EventLog,
    fail_sends: Arc<AtomicBool>,
    fail_renames: Arc<AtomicBool>,
    latency: Arc<Mutex<Duration>>,
    sent: Arc<AtomicU64>,
    last_sent: Arc<Mutex<Option<(u64, u32, u32)>>>,
    closed: AtomicBool,
}

#[async_trait]
impl VideoSender for MockSender {
    async fn send(&self, frame: &Frame) -> Result<(), SendError> {
        if self.closed.load(Ordering::SeqCst) {
            self.log.lock().unwrap().push("send after close".into());
            return Err(SendError::Closed);
        }
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SendError::Other("network unreachable".into()));
        }
        assert_eq!(
            frame.pixels().len(),
            frame.width() as usize * frame.height() as usize * 4
        );
        *self.last_sent.lock().unwrap() = Some((frame.sequence(), frame.width(), frame.height()));
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rename(&self, label: &str) -> Result<(), SendError> {
        if self.fail_renames.load(Ordering::SeqCst) {
            return Err(SendError::Other("name already taken".into()));
        }
        let mut current = self.label.lock().unwrap();
        self.log
            .lock()
            .unwrap()
            .push(format!("rename {} -> {label}", *current));
        *current = label.to_string();
        Ok(())
    }

    async fn set_frame_rate(&self, frame_rate: u32) -> Result<(), SendError> {
        let label = self.label.lock().unwrap().clone();
        self.log
            .lock()
            .unwrap()
            .push(format!("rate {label} {frame_rate}"));
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            self.log.lock().unwrap().push("double close".into());
            return;
        }
        let label = self.label.lock().unwrap().clone();
        self.log.lock().unwrap().push(format!("close {label}"));
    }
}

// ── Harness ──────────────────────────────────────────────────────

pub struct Harness {
    pub log: EventLog,
    pub renderer: Arc<MockRenderer>,
    pub senders: Arc<MockSenderFactory>,
}

impl Harness {
    pub fn new() -> Self {
        let log: EventLog = Arc::new(Mutex::new(Vec::new()));
        Self {
            renderer: Arc::new(MockRenderer::new(Arc::clone(&log))),
            senders: Arc::new(MockSenderFactory::new(Arc::clone(&log))),
            log,
        }
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }
}
