//! One output's capture → buffer → transmission chain.
//!
//! ```text
//! Renderer ──capture_still──► CaptureLoop ──publish──► FrameBuffer
//!                                                          │ latest
//!                                     VideoSender ◄──send── TransmissionLoop
//! ```
//!
//! The pipeline owns both loops, the buffer and the sender. The render
//! surface belongs to the shared renderer and is only released on teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::buffer::FrameBuffer;
use crate::capture::{CaptureContext, CaptureLoop};
use crate::config::{CaptureStrategy, OutputConfig, OutputId, PipelineSettings};
use crate::error::{CreateStage, PipelineError, SendError};
use crate::external::{Renderer, SenderFactory, SurfaceHandle, VideoSender};
use crate::transmit::{TransmissionLoop, TransmitContext};

// ── PipelineState ────────────────────────────────────────────────

/// Lifecycle of an [`OutputPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Creating,
    Active,
    Updating,
    Destroying,
    Destroyed,
}

// ── PipelineStats ────────────────────────────────────────────────

/// Observability snapshot of one pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStats {
    pub id: OutputId,
    pub state: PipelineState,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub strategy: CaptureStrategy,
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub capture_failures: u64,
    pub send_failures: u64,
    pub sends_skipped: u64,
    pub capture_running: bool,
    pub transmit_running: bool,
    pub last_frame_age: Option<Duration>,
    pub uptime: Duration,
}

// ── OutputPipeline ───────────────────────────────────────────────

pub struct OutputPipeline {
    id: OutputId,
    config: OutputConfig,
    state: PipelineState,
    frame_rate: Arc<AtomicU32>,
    buffer: FrameBuffer,
    capture: CaptureLoop,
    transmit: TransmissionLoop,
    renderer: Arc<dyn Renderer>,
    sender: Arc<dyn VideoSender>,
    surface: SurfaceHandle,
    created_at: Instant,
}

impl OutputPipeline {
    /// Allocate the sender and render surface, then start both loops.
    ///
    /// On failure anything already allocated is released again and the
    /// error names the stage that failed.
    pub async fn create(
        config: OutputConfig,
        renderer: Arc<dyn Renderer>,
        senders: &dyn SenderFactory,
        settings: &PipelineSettings,
    ) -> Result<Self, PipelineError> {
        let id = config.id.clone();
        debug!(output = %id, state = ?PipelineState::Creating, "creating pipeline");

        let sender = senders
            .open(&config.label, config.width, config.height, config.frame_rate)
            .await
            .map_err(|e| PipelineError::Create {
                id: id.clone(),
                stage: CreateStage::Sender,
                source: e.into(),
            })?;

        let surface = match renderer
            .allocate_surface(&id, config.width, config.height, &config.target)
            .await
        {
            Ok(surface) => surface,
            Err(e) => {
                sender.close().await;
                return Err(PipelineError::Create {
                    id,
                    stage: CreateStage::Surface,
                    source: e.into(),
                });
            }
        };

        let frame_rate = Arc::new(AtomicU32::new(config.frame_rate));
        let buffer = FrameBuffer::new();

        let capture = CaptureLoop::spawn(CaptureContext {
            id: id.clone(),
            renderer: Arc::clone(&renderer),
            buffer: buffer.clone(),
            frame_rate: Arc::clone(&frame_rate),
            strategy: config.strategy(),
            capture_timeout: settings.capture_timeout(),
            log_every: settings.log_every,
        });
        let transmit = TransmissionLoop::spawn(TransmitContext {
            id: id.clone(),
            sender: Arc::clone(&sender),
            buffer: buffer.clone(),
            frame_rate: Arc::clone(&frame_rate),
            max_in_flight: settings.max_in_flight_sends,
            drain_timeout: settings.drain_timeout(),
            log_every: settings.log_every,
        });

        info!(
            output = %id,
            width = config.width,
            height = config.height,
            fps = config.frame_rate,
            strategy = %config.strategy(),
            "pipeline active"
        );

        Ok(Self {
            id,
            config,
            state: PipelineState::Active,
            frame_rate,
            buffer,
            capture,
            transmit,
            renderer,
            sender,
            surface,
            created_at: Instant::now(),
        })
    }

    pub fn id(&self) -> &OutputId {
        &self.id
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn surface(&self) -> &SurfaceHandle {
        &self.surface
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Retime both loops. The buffer keeps its frame, so the stream has no
    /// gap.
    pub async fn update_frame_rate(&mut self, fps: u32) -> Result<(), PipelineError> {
        self.ensure_live()?;
        let fps = fps.max(1);
        if fps == self.config.frame_rate {
            return Ok(());
        }

        self.state = PipelineState::Updating;
        self.frame_rate.store(fps, Ordering::Relaxed);
        self.config.frame_rate = fps;
        if let Err(e) = self.sender.set_frame_rate(fps).await {
            warn!(output = %self.id, "sender rejected frame rate {fps}: {e}");
        }
        self.state = PipelineState::Active;

        info!(output = %self.id, fps, "frame rate updated");
        Ok(())
    }

    /// Rename the outbound stream without touching capture.
    ///
    /// A rejected rename keeps the old label, so a later sync retries it.
    pub async fn update_label(&mut self, label: &str) -> Result<(), PipelineError> {
        self.ensure_live()?;
        if label == self.config.label {
            return Ok(());
        }

        self.state = PipelineState::Updating;
        let renamed: Result<(), SendError> = self.sender.rename(label).await;
        self.state = PipelineState::Active;

        match renamed {
            Ok(()) => {
                info!(output = %self.id, label, "stream renamed");
                self.config.label = label.to_string();
                Ok(())
            }
            Err(e) => Err(PipelineError::Update {
                id: self.id.clone(),
                source: e.into(),
            }),
        }
    }

    /// Tear the pipeline down: transmission first so nothing else is sent,
    /// then capture, then the sender and the surface, then the buffer.
    ///
    /// Calling it again is a no-op.
    pub async fn destroy(&mut self) {
        if matches!(
            self.state,
            PipelineState::Destroying | PipelineState::Destroyed
        ) {
            return;
        }
        self.state = PipelineState::Destroying;
        debug!(output = %self.id, "destroying pipeline");

        self.transmit.stop().await;
        self.capture.stop().await;
        self.sender.close().await;
        self.renderer.release_surface(&self.id).await;
        self.buffer.reset();

        self.state = PipelineState::Destroyed;
        info!(output = %self.id, "pipeline destroyed");
    }

    /// Both loops are still alive. A loop that panicked makes this `false`.
    pub fn is_healthy(&self) -> bool {
        self.capture.is_running() && self.transmit.is_running()
    }

    pub fn stats(&self) -> PipelineStats {
        let capture = self.capture.stats();
        let transmit = self.transmit.stats();
        PipelineStats {
            id: self.id.clone(),
            state: self.state,
            width: self.config.width,
            height: self.config.height,
            frame_rate: self.config.frame_rate,
            strategy: capture.strategy,
            frames_captured: capture.frames_captured,
            frames_sent: transmit.frames_sent,
            capture_failures: capture.failures,
            send_failures: transmit.failures,
            sends_skipped: transmit.sends_skipped,
            capture_running: capture.running,
            transmit_running: transmit.running,
            last_frame_age: self.buffer.age(),
            uptime: self.created_at.elapsed(),
        }
    }

    fn ensure_live(&self) -> Result<(), PipelineError> {
        match self.state {
            PipelineState::Destroying | PipelineState::Destroyed => {
                Err(PipelineError::Destroyed(self.id.clone()))
            }
            _ => Ok(()),
        }
    }
}
