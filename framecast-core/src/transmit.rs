//! Per-output transmission loop.
//!
//! Reads the latest frame from the [`FrameBuffer`] on its own cadence and
//! hands it to the output's [`VideoSender`]. It never waits for capture: a
//! slow capture means the same frame goes out again, a fast one means
//! intermediate frames are never seen.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::buffer::FrameBuffer;
use crate::capture::cycle_sleep;
use crate::config::{OutputId, frame_interval};
use crate::external::VideoSender;
use crate::throttle::LogThrottle;

// ── TransmitStats ────────────────────────────────────────────────

#[derive(Debug)]
struct TransmitCounters {
    sent: AtomicU64,
    ticks: AtomicU64,
    skipped: AtomicU64,
    failures: LogThrottle,
}

/// Point-in-time view of a transmission loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitStats {
    pub frames_sent: u64,
    pub ticks: u64,
    /// Ticks dropped because too many sends were still in flight.
    pub sends_skipped: u64,
    pub failures: u64,
    pub running: bool,
}

// ── TransmissionLoop ─────────────────────────────────────────────

/// Everything a transmission task needs.
pub struct TransmitContext {
    pub id: OutputId,
    pub sender: Arc<dyn VideoSender>,
    pub buffer: FrameBuffer,
    pub frame_rate: Arc<AtomicU32>,
    pub max_in_flight: usize,
    pub drain_timeout: Duration,
    pub log_every: u64,
}

/// Handle to a running transmission task.
pub struct TransmissionLoop {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    counters: Arc<TransmitCounters>,
}

impl TransmissionLoop {
    pub fn spawn(ctx: TransmitContext) -> Self {
        let cancel = CancellationToken::new();
        let counters = Arc::new(TransmitCounters {
            sent: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failures: LogThrottle::new(ctx.log_every),
        });
        let task = TransmitTask {
            cancel: cancel.clone(),
            counters: Arc::clone(&counters),
            in_flight: JoinSet::new(),
            ctx,
        };
        Self {
            cancel,
            handle: Some(tokio::spawn(task.run())),
            counters,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> TransmitStats {
        let c = &self.counters;
        TransmitStats {
            frames_sent: c.sent.load(Ordering::Relaxed),
            ticks: c.ticks.load(Ordering::Relaxed),
            sends_skipped: c.skipped.load(Ordering::Relaxed),
            failures: c.failures.count(),
            running: self.is_running(),
        }
    }

    /// Cancel the task and wait until it and its in-flight sends are done.
    /// Idempotent.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!("transmission task panicked before stop");
                }
            }
        }
    }
}

impl Drop for TransmissionLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── TransmitTask ─────────────────────────────────────────────────

struct TransmitTask {
    ctx: TransmitContext,
    cancel: CancellationToken,
    counters: Arc<TransmitCounters>,
    in_flight: JoinSet<()>,
}

impl TransmitTask {
    async fn run(mut self) {
        debug!(output = %self.ctx.id, "transmission loop started");

        while !self.cancel.is_cancelled() {
            let started = Instant::now();
            self.counters.ticks.fetch_add(1, Ordering::Relaxed);

            while self.in_flight.try_join_next().is_some() {}

            if let Some(frame) = self.ctx.buffer.latest() {
                if self.in_flight.len() >= self.ctx.max_in_flight.max(1) {
                    self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                } else {
                    let sender = Arc::clone(&self.ctx.sender);
                    let counters = Arc::clone(&self.counters);
                    let id = self.ctx.id.clone();
                    self.in_flight.spawn(async move {
                        match sender.send(&frame).await {
                            Ok(()) => {
                                counters.sent.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                if let Some(n) = counters.failures.hit() {
                                    warn!(output = %id, failures = n, "send failed: {e}");
                                }
                            }
                        }
                    });
                }
            }

            let interval = frame_interval(self.ctx.frame_rate.load(Ordering::Relaxed));
            let wait = cycle_sleep(interval, started.elapsed());
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        self.drain().await;
        debug!(output = %self.ctx.id, "transmission loop stopped");
    }

    /// Wait for in-flight sends so none outlives the sender.
    async fn drain(&mut self) {
        let pending = self.in_flight.len();
        if pending == 0 {
            return;
        }
        let in_flight = &mut self.in_flight;
        let drained = tokio::time::timeout(self.ctx.drain_timeout, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(output = %self.ctx.id, pending, "in-flight sends did not finish; aborting");
            self.in_flight.shutdown().await;
        }
    }
}
