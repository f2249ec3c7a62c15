//! Output configuration as seen by the pipeline.
//!
//! [`OutputConfig`] values come from the settings document. They are
//! validated and clamped once by [`OutputConfig::sanitized`]; everything
//! downstream trusts them.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── Limits ───────────────────────────────────────────────────────

pub const MIN_WIDTH: u32 = 320;
pub const MAX_WIDTH: u32 = 7680;
pub const MIN_HEIGHT: u32 = 240;
pub const MAX_HEIGHT: u32 = 4320;
pub const MIN_FRAME_RATE: u32 = 1;
pub const MAX_FRAME_RATE: u32 = 240;

// ── OutputId ─────────────────────────────────────────────────────

/// Stable identity of one logical output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputId(Arc<str>);

impl OutputId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OutputId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for OutputId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl Default for OutputId {
    fn default() -> Self {
        Self::new("")
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── CaptureMode ──────────────────────────────────────────────────

/// Requested capture strategy for an output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Push when the output is opaque, polling otherwise.
    #[default]
    Auto,
    /// One still per cycle, requested by the capture loop.
    Polling,
    /// Renderer-driven frame stream, rate-limited by the renderer.
    Push,
}

/// The strategy a capture loop actually runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureStrategy {
    Polling,
    Push,
}

impl CaptureMode {
    /// Resolve the mode against the transparency requirement.
    ///
    /// Push capture drops the alpha channel, so `transparent` forces polling.
    pub fn resolve(self, transparent: bool) -> CaptureStrategy {
        match (self, transparent) {
            (_, true) | (CaptureMode::Polling, false) => CaptureStrategy::Polling,
            (CaptureMode::Auto, false) | (CaptureMode::Push, false) => CaptureStrategy::Push,
        }
    }
}

impl fmt::Display for CaptureStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureStrategy::Polling => f.write_str("polling"),
            CaptureStrategy::Push => f.write_str("push"),
        }
    }
}

// ── OutputConfig ─────────────────────────────────────────────────

/// Desired state of one output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Identity; immutable for the lifetime of the output.
    pub id: OutputId,
    /// Whether a pipeline should run for this output.
    pub enabled: bool,
    /// Surface width in pixels.
    pub width: u32,
    /// Surface height in pixels.
    pub height: u32,
    /// Capture and transmission rate.
    pub frame_rate: u32,
    /// Stream name announced by the sender.
    pub label: String,
    /// Navigation target loaded into the render surface.
    pub target: String,
    /// Requested capture strategy.
    pub capture: CaptureMode,
    /// Preserve the alpha channel end to end.
    pub transparent: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            id: OutputId::default(),
            enabled: true,
            width: 1920,
            height: 1080,
            frame_rate: 30,
            label: String::new(),
            target: String::new(),
            capture: CaptureMode::Auto,
            transparent: false,
        }
    }
}

impl OutputConfig {
    /// An enabled output with default settings.
    pub fn new(id: impl Into<OutputId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
        .with_defaults_filled()
    }

    /// Builder-style geometry setter.
    pub fn with_geometry(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Builder-style frame rate setter.
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps;
        self
    }

    /// Builder-style label setter.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Validate and clamp a raw settings entry.
    pub fn sanitized(mut self) -> Result<Self, ConfigError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ConfigError::EmptyIdentity);
        }
        if self.transparent && self.capture == CaptureMode::Push {
            return Err(ConfigError::TransparencyRequiresPolling(self.id));
        }
        self.width = self.width.clamp(MIN_WIDTH, MAX_WIDTH);
        self.height = self.height.clamp(MIN_HEIGHT, MAX_HEIGHT);
        self.frame_rate = self.frame_rate.clamp(MIN_FRAME_RATE, MAX_FRAME_RATE);
        Ok(self.with_defaults_filled())
    }

    fn with_defaults_filled(mut self) -> Self {
        if self.label.is_empty() {
            self.label = self.id.to_string();
        }
        if self.target.is_empty() {
            self.target = format!("/output/{}", self.id);
        }
        self
    }

    /// Strategy the capture loop should start with.
    pub fn strategy(&self) -> CaptureStrategy {
        self.capture.resolve(self.transparent)
    }

    /// Interval between cycles at the configured frame rate.
    pub fn frame_interval(&self) -> Duration {
        frame_interval(self.frame_rate)
    }

    /// Whether `other` can be applied without reallocating the render
    /// surface or restarting capture.
    ///
    /// Geometry, target and capture settings are fixed at creation.
    pub fn same_surface(&self, other: &OutputConfig) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.target == other.target
            && self.capture == other.capture
            && self.transparent == other.transparent
    }
}

/// `1s / fps`, with `fps` floored at 1.
pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / fps.max(1) as f64)
}

// ── PipelineSettings ─────────────────────────────────────────────

/// Tuning shared by every pipeline the orchestrator creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Deadline for a single still capture, in milliseconds.
    pub capture_timeout_ms: u64,
    /// Log the first failure and then every Nth.
    pub log_every: u64,
    /// Sends allowed to run concurrently per output.
    pub max_in_flight_sends: usize,
    /// How long teardown waits for in-flight sends, in milliseconds.
    pub drain_timeout_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            capture_timeout_ms: 2000,
            log_every: 100,
            max_in_flight_sends: 2,
            drain_timeout_ms: 1000,
        }
    }
}

impl PipelineSettings {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms.max(1))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
