//! Owned reconciliation task.
//!
//! Configuration callbacks never touch the pipeline map. They hand a
//! snapshot to the [`Reconciler`], whose task owns the [`Orchestrator`] and
//! applies snapshots one at a time. Snapshots travel over a `watch` channel,
//! so several changes arriving during one reconciliation collapse into the
//! newest. A pending snapshot is always applied before any later command,
//! which keeps `submit` and `sync` in call order.

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::OutputConfig;
use crate::error::FramecastError;
use crate::orchestrator::{AggregatedStats, Orchestrator, ReconcileReport};
use crate::pipeline::PipelineStats;

enum Command {
    Sync(Vec<OutputConfig>, oneshot::Sender<ReconcileReport>),
    Stats(oneshot::Sender<Vec<PipelineStats>>),
    Aggregated(oneshot::Sender<AggregatedStats>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the task that owns the [`Orchestrator`].
pub struct Reconciler {
    snapshots: watch::Sender<Vec<OutputConfig>>,
    commands: mpsc::Sender<Command>,
    handle: Option<JoinHandle<()>>,
}

impl Reconciler {
    /// Move `orchestrator` into its own task.
    pub fn spawn(orchestrator: Orchestrator) -> Self {
        let (snapshots, snapshot_rx) = watch::channel(Vec::new());
        let (commands, command_rx) = mpsc::channel(32);
        let handle = tokio::spawn(run(orchestrator, snapshot_rx, command_rx));
        Self {
            snapshots,
            commands,
            handle: Some(handle),
        }
    }

    /// Queue `snapshot` for reconciliation without waiting. A snapshot still
    /// queued when a newer one arrives is skipped.
    pub fn submit(&self, snapshot: Vec<OutputConfig>) {
        self.snapshots.send_replace(snapshot);
    }

    /// Change notification from the settings source.
    pub fn on_changed(&self, new: Vec<OutputConfig>, old: &[OutputConfig]) {
        let enabled = |s: &[OutputConfig]| s.iter().filter(|c| c.enabled).count();
        debug!(
            before = enabled(old),
            after = enabled(&new),
            "output configuration changed"
        );
        self.submit(new);
    }

    /// Reconcile `snapshot` now and wait for the outcome.
    ///
    /// A snapshot submitted earlier and not yet applied is applied first, so
    /// `snapshot` is the one left in force.
    pub async fn sync(
        &self,
        snapshot: Vec<OutputConfig>,
    ) -> Result<ReconcileReport, FramecastError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Sync(snapshot, tx)).await?;
        rx.await.map_err(|_| FramecastError::ChannelClosed)
    }

    pub async fn stats(&self) -> Result<Vec<PipelineStats>, FramecastError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Stats(tx)).await?;
        rx.await.map_err(|_| FramecastError::ChannelClosed)
    }

    pub async fn aggregated_stats(&self) -> Result<AggregatedStats, FramecastError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::Aggregated(tx)).await?;
        rx.await.map_err(|_| FramecastError::ChannelClosed)
    }

    /// Destroy every pipeline and end the task. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
        if let Err(e) = handle.await {
            warn!("reconciler task ended abnormally: {e}");
        }
    }
}

async fn run(
    mut orchestrator: Orchestrator,
    mut snapshots: watch::Receiver<Vec<OutputConfig>>,
    mut commands: mpsc::Receiver<Command>,
) {
    loop {
        tokio::select! {
            biased;

            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                apply_pending(&mut orchestrator, &mut snapshots).await;
            }
            command = commands.recv() => match command {
                Some(Command::Sync(snapshot, reply)) => {
                    apply_pending(&mut orchestrator, &mut snapshots).await;
                    let report = orchestrator.sync_outputs(&snapshot).await;
                    let _ = reply.send(report);
                }
                Some(Command::Stats(reply)) => {
                    let _ = reply.send(orchestrator.stats());
                }
                Some(Command::Aggregated(reply)) => {
                    let _ = reply.send(orchestrator.aggregated_stats());
                }
                Some(Command::Shutdown(reply)) => {
                    orchestrator.shutdown_all().await;
                    info!("all outputs shut down");
                    let _ = reply.send(());
                    return;
                }
                None => break,
            },
        }
    }
    orchestrator.shutdown_all().await;
}

/// Apply the submitted snapshot if it has not been seen yet.
async fn apply_pending(
    orchestrator: &mut Orchestrator,
    snapshots: &mut watch::Receiver<Vec<OutputConfig>>,
) {
    if !snapshots.has_changed().unwrap_or(false) {
        return;
    }
    let snapshot = snapshots.borrow_and_update().clone();
    orchestrator.sync_outputs(&snapshot).await;
}
