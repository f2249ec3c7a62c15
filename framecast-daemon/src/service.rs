//! Daemon service core logic.
//!
//! Wires the pattern renderer and the configured sender into a
//! [`Reconciler`], then keeps the running outputs in line with the config
//! file until stopped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use framecast_core::{Orchestrator, OutputId, Reconciler, ReconcileReport};

use crate::config::{DaemonConfig, load_outputs};
use crate::pattern::PatternRenderer;
use crate::sender::DaemonSenderFactory;
use crate::watcher::ConfigWatcher;

// ── DaemonService ────────────────────────────────────────────────

/// The top-level daemon service.
pub struct DaemonService {
    config: DaemonConfig,
    config_path: PathBuf,
    cancel: CancellationToken,
}

impl DaemonService {
    /// `config` is the already-loaded content of `config_path`, which is
    /// watched for changes while running.
    pub fn new(config: DaemonConfig, config_path: PathBuf) -> Self {
        Self {
            config,
            config_path,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn stop_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Run until stopped.
    ///
    /// 1. Creates a pipeline for every enabled output in the config.
    /// 2. Re-reads `[[outputs]]` whenever the file changes and hands the
    ///    snapshot to the reconciler.
    /// 3. Logs aggregated stats every `[stats] interval_secs`.
    /// 4. Tears every output down on stop.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let renderer = Arc::new(PatternRenderer::new(self.config.renderer.clone()));
        let senders = Arc::new(DaemonSenderFactory::new(self.config.sender.clone()));
        let orchestrator =
            Orchestrator::with_settings(renderer, senders, self.config.pipeline.clone());
        let mut reconciler = Reconciler::spawn(orchestrator);

        let mut current = self.config.snapshot();
        let report = reconciler.sync(current.clone()).await?;
        log_report(&report);

        let mut watcher = match ConfigWatcher::new(&self.config_path) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(
                    "cannot watch {}: {e}; live reload disabled",
                    self.config_path.display()
                );
                None
            }
        };

        let stats_every = match self.config.stats.interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let mut ticker = stats_every.map(|every| {
            let mut t = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            t
        });

        info!("framecast daemon running");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = next_change(&mut watcher) => {
                    if changed.is_none() {
                        warn!("config watcher stopped; live reload disabled");
                        watcher = None;
                        continue;
                    }
                    let next = load_outputs(&self.config_path);
                    reconciler.on_changed(next.clone(), &current);
                    current = next;
                }
                _ = next_tick(&mut ticker) => {
                    match reconciler.aggregated_stats().await {
                        Ok(s) => info!(
                            outputs = s.output_count,
                            captured = s.total_frames_captured,
                            sent = s.total_frames_sent,
                            "stats"
                        ),
                        Err(e) => warn!("stats unavailable: {e}"),
                    }
                }
            }
        }

        reconciler.shutdown().await;
        info!("framecast daemon stopped");
        Ok(())
    }

    /// Whether [`stop`](Self::stop) has been requested.
    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ── Internal ─────────────────────────────────────────────────────

async fn next_change(watcher: &mut Option<ConfigWatcher>) -> Option<()> {
    match watcher {
        Some(w) => w.changed().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn log_report(report: &ReconcileReport) {
    let ids = |list: &[OutputId]| {
        list.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(", ")
    };
    if !report.created.is_empty() {
        info!("outputs started: {}", ids(&report.created));
    }
    for (id, e) in &report.failed {
        warn!(output = %id, "output failed to start: {e}");
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SenderKind, StatsConfig};
    use framecast_core::OutputConfig;

    fn small_config() -> DaemonConfig {
        let mut cfg = DaemonConfig::default();
        cfg.sender.kind = SenderKind::Null;
        cfg.stats = StatsConfig { interval_secs: 1 };
        cfg.outputs = vec![
            OutputConfig::new("a").with_geometry(320, 240).with_frame_rate(10),
            OutputConfig {
                enabled: false,
                ..OutputConfig::new("b")
            },
        ];
        cfg
    }

    #[test]
    fn service_creates_with_defaults() {
        let svc = DaemonService::new(DaemonConfig::default(), "framecast.toml".into());
        assert!(!svc.is_stopping());
        svc.stop();
        assert!(svc.is_stopping());
    }

    #[tokio::test]
    async fn run_returns_after_stop() {
        let dir = std::env::temp_dir().join(format!("framecast-svc-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("framecast.toml");
        let cfg = small_config();
        std::fs::write(&path, toml::to_string_pretty(&cfg).unwrap()).unwrap();

        let svc = Arc::new(DaemonService::new(cfg, path.clone()));
        let stop = svc.stop_handle();
        let running = Arc::clone(&svc);
        let handle = tokio::spawn(async move { running.run().await.map_err(|e| e.to_string()) });

        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(&path, "[[outputs]]\nid = \"a\"\nenabled = false\n").unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        stop.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
