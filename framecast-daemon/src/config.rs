//! Configuration for the framecast daemon.
//!
//! One TOML document carries both the daemon's own settings and the
//! `[[outputs]]` list. The outputs section is re-read on every change to
//! the file and handed to the reconciler as a snapshot.

use std::path::Path;

use framecast_core::{OutputConfig, PipelineSettings};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Pipeline tuning shared by every output.
    pub pipeline: PipelineSettings,
    /// Built-in pattern renderer.
    pub renderer: RendererConfig,
    /// Where frames go.
    pub sender: SenderConfig,
    /// Periodic stats reporting.
    pub stats: StatsConfig,
    /// Outputs to run.
    pub outputs: Vec<OutputConfig>,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive, used when `RUST_LOG` is unset.
    pub level: String,
}

/// Pattern renderer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Offer push delivery in addition to still capture.
    pub streaming: bool,
    /// Width of the pattern's stripes, in pixels.
    pub stripe_width: u32,
    /// Simulated paint time per still, in milliseconds.
    pub paint_delay_ms: u64,
}

/// Which sender implementation to open for each output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderKind {
    /// Count frames and drop them.
    #[default]
    Null,
    /// Chunk raw frames into UDP datagrams.
    Udp,
}

/// Sender settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    pub kind: SenderKind,
    /// Local address the UDP socket binds to.
    pub bind: String,
    /// Remote address datagrams are sent to.
    pub destination: String,
    /// Largest datagram written, header included.
    pub mtu: usize,
}

/// Stats reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Seconds between aggregated stats lines (0 disables).
    pub interval_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            streaming: true,
            stripe_width: 64,
            paint_delay_ms: 0,
        }
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            kind: SenderKind::Null,
            bind: "0.0.0.0:0".into(),
            destination: "127.0.0.1:7400".into(),
            mtu: crate::sender::DEFAULT_MTU,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self { interval_secs: 10 }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl DaemonConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Default configuration with one example output, for `--gen-config`.
    pub fn example() -> Self {
        Self {
            outputs: vec![OutputConfig::new("main").with_label("Main")],
            ..Self::default()
        }
    }

    /// Sanitized output snapshot. Entries that fail validation are skipped.
    pub fn snapshot(&self) -> Vec<OutputConfig> {
        self.outputs
            .iter()
            .cloned()
            .filter_map(|raw| match raw.sanitized() {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("skipping output: {e}");
                    None
                }
            })
            .collect()
    }
}

/// Re-read only the outputs of the document at `path`.
///
/// A missing or unparsable document yields an empty snapshot, so every
/// running output is torn down rather than left on stale settings.
pub fn load_outputs(path: &Path) -> Vec<OutputConfig> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!("cannot read {}: {e}; no outputs enabled", path.display());
            return Vec::new();
        }
    };
    match DaemonConfig::parse(&text) {
        Ok(config) => config.snapshot(),
        Err(e) => {
            warn!("invalid config {}: {e}; no outputs enabled", path.display());
            Vec::new()
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
