//! # framecast-core
//!
//! Frame pipeline and output lifecycle for offscreen-rendered video streams.
//!
//! This crate contains:
//! - **Frames**: `Frame`, the immutable RGBA8 image passed between stages
//! - **Decoding**: `PixelDecoder`, PNG still → RGBA8
//! - **Buffering**: `FrameBuffer`, the single-slot latest-frame cell
//! - **Loops**: `CaptureLoop` and `TransmissionLoop`, independently paced
//! - **Pipeline**: `OutputPipeline`, one output's loops plus its resources
//! - **Orchestration**: `Orchestrator` and `Reconciler`, which diff
//!   configuration snapshots against running pipelines
//! - **Seams**: `Renderer`, `SenderFactory`, `VideoSender` traits
//! - **Error**: typed, `thiserror`-based error hierarchy

pub mod buffer;
pub mod capture;
pub mod config;
pub mod decoder;
pub mod error;
pub mod external;
pub mod frame;
pub mod orchestrator;
pub mod pipeline;
pub mod reconciler;
pub mod throttle;
pub mod transmit;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use buffer::FrameBuffer;
pub use capture::{CaptureLoop, CaptureStats};
pub use config::{CaptureMode, CaptureStrategy, OutputConfig, OutputId, PipelineSettings};
pub use decoder::{DecodedImage, PixelDecoder};
pub use error::{
    ConfigError, CreateStage, DecodeError, FramecastError, PipelineError, RenderError, SendError,
};
pub use external::{
    FramePublisher, FrameSubscription, PushMetadata, PushedFrame, Renderer, SenderFactory,
    SurfaceHandle, VideoSender,
};
pub use frame::Frame;
pub use orchestrator::{AggregatedStats, Orchestrator, ReconcileReport};
pub use pipeline::{OutputPipeline, PipelineState, PipelineStats};
pub use reconciler::Reconciler;
pub use transmit::{TransmissionLoop, TransmitStats};
