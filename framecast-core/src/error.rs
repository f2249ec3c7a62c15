//! Domain-specific error types for the frame pipeline.
//!
//! Loop-internal failures ([`DecodeError`], [`RenderError`], [`SendError`])
//! are recovered where they occur. Only allocation failures travel upward,
//! as [`PipelineError`], to the orchestrator.

use std::time::Duration;
use thiserror::Error;

use crate::config::OutputId;

// ── DecodeError ──────────────────────────────────────────────────

/// Failure to turn a compressed still into a raw frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The buffer is not a still image in the expected format.
    #[error("unsupported still format")]
    UnsupportedFormat,

    /// The image is truncated or otherwise corrupt.
    #[error("malformed still image: {0}")]
    Malformed(String),

    /// The header declared a zero-sized image.
    #[error("still image has zero size ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    /// Decoded payload does not match `width * height * 4`.
    #[error("pixel buffer length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

// ── RenderError ──────────────────────────────────────────────────

/// Errors reported by the external renderer.
#[derive(Debug, Error)]
pub enum RenderError {
    /// No surface is allocated for this output.
    #[error("no render surface for output {0}")]
    NoSurface(OutputId),

    /// The renderer cannot be reached (closed page, detached session, ...).
    #[error("renderer unavailable: {0}")]
    Unavailable(String),

    /// Streaming capture is not offered by this renderer.
    #[error("streaming capture not supported")]
    StreamingUnsupported,

    /// A capture request exceeded its deadline.
    #[error("capture timed out after {0:?}")]
    Timeout(Duration),

    /// Catch-all for adapter-specific failures.
    #[error("{0}")]
    Other(String),
}

// ── SendError ────────────────────────────────────────────────────

/// Errors reported by the external stream sender.
#[derive(Debug, Error)]
pub enum SendError {
    /// The sender was closed before the operation.
    #[error("sender closed")]
    Closed,

    /// The underlying transport failed.
    #[error("sender I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for adapter-specific failures.
    #[error("{0}")]
    Other(String),
}

// ── ConfigError ──────────────────────────────────────────────────

/// A single output entry failed validation at the settings boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The output has no identity.
    #[error("output identity must not be empty")]
    EmptyIdentity,

    /// Push capture cannot carry an alpha channel.
    #[error("output {0}: transparent outputs require polling capture")]
    TransparencyRequiresPolling(OutputId),
}

// ── PipelineError ────────────────────────────────────────────────

/// Stage of [`OutputPipeline::create`](crate::pipeline::OutputPipeline::create)
/// that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStage {
    /// Opening the stream sender.
    Sender,
    /// Allocating the render surface.
    Surface,
}

impl std::fmt::Display for CreateStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CreateStage::Sender => f.write_str("sender"),
            CreateStage::Surface => f.write_str("render surface"),
        }
    }
}

/// Errors surfaced by pipeline lifecycle operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Resource allocation failed; partial allocations were rolled back.
    #[error("output {id}: {stage} allocation failed: {source}")]
    Create {
        id: OutputId,
        stage: CreateStage,
        #[source]
        source: FramecastError,
    },

    /// An in-place update was rejected; the pipeline keeps its old settings.
    #[error("output {id}: update rejected: {source}")]
    Update {
        id: OutputId,
        #[source]
        source: FramecastError,
    },

    /// The pipeline was already torn down.
    #[error("output {0}: pipeline destroyed")]
    Destroyed(OutputId),
}

impl PipelineError {
    /// The failed stage, if this is a creation failure.
    pub fn stage(&self) -> Option<CreateStage> {
        match self {
            PipelineError::Create { stage, .. } => Some(*stage),
            PipelineError::Update { .. } | PipelineError::Destroyed(_) => None,
        }
    }
}

// ── FramecastError ───────────────────────────────────────────────

/// Umbrella error for the crate.
#[derive(Debug, Error)]
pub enum FramecastError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("send error: {0}")]
    Send(#[from] SendError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("channel closed")]
    ChannelClosed,

    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for FramecastError {
    fn from(s: String) -> Self {
        FramecastError::Other(s)
    }
}

impl From<&str> for FramecastError {
    fn from(s: &str) -> Self {
        FramecastError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for FramecastError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        FramecastError::ChannelClosed
    }
}

impl From<image::ImageError> for DecodeError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::Unsupported(_) => DecodeError::UnsupportedFormat,
            other => DecodeError::Malformed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = DecodeError::LengthMismatch {
            expected: 1000,
            actual: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));

        let e = PipelineError::Create {
            id: OutputId::from("left"),
            stage: CreateStage::Surface,
            source: RenderError::Unavailable("gone".into()).into(),
        };
        let text = e.to_string();
        assert!(text.contains("left"));
        assert!(text.contains("render surface"));
    }

    #[test]
    fn create_error_exposes_stage() {
        let e = PipelineError::Create {
            id: OutputId::from("a"),
            stage: CreateStage::Sender,
            source: SendError::Closed.into(),
        };
        assert_eq!(e.stage(), Some(CreateStage::Sender));
        assert_eq!(PipelineError::Destroyed(OutputId::from("a")).stage(), None);
    }

    #[test]
    fn update_error_names_output_and_cause() {
        let e = PipelineError::Update {
            id: OutputId::from("a"),
            source: SendError::Other("name already taken".into()).into(),
        };
        assert_eq!(e.stage(), None);
        let text = e.to_string();
        assert!(text.contains("output a"));
        assert!(text.contains("name already taken"));
    }

    #[test]
    fn from_string() {
        let e: FramecastError = "something broke".into();
        assert!(matches!(e, FramecastError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: SendError = io_err.into();
        assert!(matches!(e, SendError::Io(_)));
    }
}
