//! Reconciliation of running pipelines against configuration snapshots.
//!
//! The [`Orchestrator`] owns every [`OutputPipeline`], keyed by identity.
//! Only [`sync_outputs`](Orchestrator::sync_outputs) and
//! [`shutdown_all`](Orchestrator::shutdown_all) mutate that map; both take
//! `&mut self`, so reconciliations cannot interleave.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{OutputConfig, OutputId, PipelineSettings};
use crate::error::PipelineError;
use crate::external::{Renderer, SenderFactory};
use crate::pipeline::{OutputPipeline, PipelineStats};

// ── ReconcileReport ──────────────────────────────────────────────

/// What one reconciliation did.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub created: Vec<OutputId>,
    pub recreated: Vec<OutputId>,
    pub updated: Vec<OutputId>,
    pub destroyed: Vec<OutputId>,
    pub unchanged: Vec<OutputId>,
    /// Outputs whose create or update failed. A failed create leaves the
    /// output inactive; a failed update leaves it on its previous settings.
    pub failed: Vec<(OutputId, PipelineError)>,
}

impl ReconcileReport {
    /// `true` when no lifecycle operation was performed.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.recreated.is_empty()
            && self.updated.is_empty()
            && self.destroyed.is_empty()
            && self.failed.is_empty()
    }
}

// ── AggregatedStats ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatedStats {
    pub output_count: usize,
    pub total_frames_captured: u64,
    pub total_frames_sent: u64,
}

// ── Orchestrator ─────────────────────────────────────────────────

pub struct Orchestrator {
    renderer: Arc<dyn Renderer>,
    senders: Arc<dyn SenderFactory>,
    settings: PipelineSettings,
    pipelines: BTreeMap<OutputId, OutputPipeline>,
}

impl Orchestrator {
    pub fn new(renderer: Arc<dyn Renderer>, senders: Arc<dyn SenderFactory>) -> Self {
        Self::with_settings(renderer, senders, PipelineSettings::default())
    }

    pub fn with_settings(
        renderer: Arc<dyn Renderer>,
        senders: Arc<dyn SenderFactory>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            renderer,
            senders,
            settings,
            pipelines: BTreeMap::new(),
        }
    }

    /// Bring the running set in line with `snapshot`.
    ///
    /// Pipelines that are gone or disabled are destroyed, new enabled outputs
    /// are created, geometry changes and dead loops recreate, and frame rate
    /// or label changes are applied in place. Running it twice with the same
    /// snapshot does nothing the second time.
    pub async fn sync_outputs(&mut self, snapshot: &[OutputConfig]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let desired = dedup_enabled(snapshot);

        // 1. Destroy what is no longer wanted.
        let stale: Vec<OutputId> = self
            .pipelines
            .keys()
            .filter(|id| !desired.contains_key(*id))
            .cloned()
            .collect();
        for id in stale {
            if let Some(mut pipeline) = self.pipelines.remove(&id) {
                pipeline.destroy().await;
                report.destroyed.push(id);
            }
        }

        for (id, config) in desired {
            match self.pipelines.get_mut(&id) {
                // 2. Create.
                None => match self.create(config).await {
                    Ok(()) => report.created.push(id),
                    Err(e) => report.failed.push((id, e)),
                },
                // 3a. Recreate when the surface cannot be reused or a loop died.
                Some(pipeline)
                    if !pipeline.config().same_surface(config) || !pipeline.is_healthy() =>
                {
                    if !pipeline.is_healthy() {
                        warn!(output = %id, "pipeline loop stopped unexpectedly; recreating");
                    }
                    pipeline.destroy().await;
                    self.pipelines.remove(&id);
                    match self.create(config).await {
                        Ok(()) => report.recreated.push(id),
                        Err(e) => {
                            report.destroyed.push(id.clone());
                            report.failed.push((id, e));
                        }
                    }
                }
                // 3b. Update in place.
                Some(pipeline) => {
                    let current = pipeline.config().clone();
                    if current.frame_rate == config.frame_rate && current.label == config.label {
                        report.unchanged.push(id);
                        continue;
                    }
                    let mut result = Ok(());
                    if current.frame_rate != config.frame_rate {
                        result = pipeline.update_frame_rate(config.frame_rate).await;
                    }
                    if result.is_ok() && current.label != config.label {
                        result = pipeline.update_label(&config.label).await;
                    }
                    match result {
                        Ok(()) => report.updated.push(id),
                        Err(e) => report.failed.push((id, e)),
                    }
                }
            }
        }

        for (id, e) in &report.failed {
            warn!(output = %id, "reconciliation failed: {e}");
        }
        if !report.is_noop() {
            info!(
                created = report.created.len(),
                recreated = report.recreated.len(),
                updated = report.updated.len(),
                destroyed = report.destroyed.len(),
                failed = report.failed.len(),
                active = self.pipelines.len(),
                "outputs reconciled"
            );
        }
        report
    }

    /// Destroy every pipeline in identity order.
    pub async fn shutdown_all(&mut self) {
        let pipelines = std::mem::take(&mut self.pipelines);
        for (id, mut pipeline) in pipelines {
            debug!(output = %id, "shutting down");
            pipeline.destroy().await;
        }
    }

    pub fn aggregated_stats(&self) -> AggregatedStats {
        self.pipelines
            .values()
            .map(OutputPipeline::stats)
            .fold(
                AggregatedStats {
                    output_count: self.pipelines.len(),
                    ..AggregatedStats::default()
                },
                |mut acc, s| {
                    acc.total_frames_captured += s.frames_captured;
                    acc.total_frames_sent += s.frames_sent;
                    acc
                },
            )
    }

    /// Per-pipeline stats in identity order.
    pub fn stats(&self) -> Vec<PipelineStats> {
        self.pipelines.values().map(OutputPipeline::stats).collect()
    }

    pub fn get(&self, id: &OutputId) -> Option<&OutputPipeline> {
        self.pipelines.get(id)
    }

    pub fn active_ids(&self) -> Vec<OutputId> {
        self.pipelines.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    async fn create(&mut self, config: &OutputConfig) -> Result<(), PipelineError> {
        let pipeline = OutputPipeline::create(
            config.clone(),
            Arc::clone(&self.renderer),
            self.senders.as_ref(),
            &self.settings,
        )
        .await?;
        self.pipelines.insert(config.id.clone(), pipeline);
        Ok(())
    }
}

/// Enabled entries keyed by identity; the first entry for an identity wins.
fn dedup_enabled(snapshot: &[OutputConfig]) -> BTreeMap<OutputId, &OutputConfig> {
    let mut seen = HashSet::new();
    let mut desired = BTreeMap::new();
    for config in snapshot {
        if !seen.insert(config.id.clone()) {
            warn!(output = %config.id, "duplicate output in snapshot ignored");
            continue;
        }
        if config.enabled {
            desired.insert(config.id.clone(), config);
        }
    }
    desired
}
