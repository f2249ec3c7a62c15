//! Per-output capture loop.
//!
//! Pulls stills from the [`Renderer`], decodes them with [`PixelDecoder`] and
//! publishes the result into the output's [`FrameBuffer`].
//!
//! Pacing is adaptive rather than a fixed tick: each cycle sleeps for
//! `max(1ms, interval - elapsed)`, so a slow capture never overlaps the next
//! one and a late cycle starts the following one immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::FrameBuffer;
use crate::config::{CaptureStrategy, OutputId, frame_interval};
use crate::decoder::PixelDecoder;
use crate::error::{FramecastError, RenderError};
use crate::external::Renderer;
use crate::frame::Frame;
use crate::throttle::LogThrottle;

/// Shortest sleep between two cycles.
pub const MIN_CYCLE_SLEEP: Duration = Duration::from_millis(1);

// ── CaptureStats ─────────────────────────────────────────────────

/// Counters shared between a capture task and its owner.
#[derive(Debug)]
pub struct CaptureCounters {
    captured: AtomicU64,
    cycles: AtomicU64,
    push_active: AtomicBool,
    failures: LogThrottle,
}

impl CaptureCounters {
    fn new(log_every: u64) -> Self {
        Self {
            captured: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            push_active: AtomicBool::new(false),
            failures: LogThrottle::new(log_every),
        }
    }
}

/// Point-in-time view of a capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub cycles: u64,
    pub failures: u64,
    pub strategy: CaptureStrategy,
    pub running: bool,
}

// ── CaptureLoop ──────────────────────────────────────────────────

/// Everything a capture task needs.
pub struct CaptureContext {
    pub id: OutputId,
    pub renderer: Arc<dyn Renderer>,
    pub buffer: FrameBuffer,
    /// Shared with the owning pipeline so rate changes apply on the next
    /// cycle.
    pub frame_rate: Arc<AtomicU32>,
    pub strategy: CaptureStrategy,
    pub capture_timeout: Duration,
    pub log_every: u64,
}

/// Handle to a running capture task.
pub struct CaptureLoop {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    counters: Arc<CaptureCounters>,
}

impl CaptureLoop {
    /// Spawn the capture task on the current runtime.
    pub fn spawn(ctx: CaptureContext) -> Self {
        let cancel = CancellationToken::new();
        let counters = Arc::new(CaptureCounters::new(ctx.log_every));
        let task = CaptureTask {
            decoder: PixelDecoder::new(),
            cancel: cancel.clone(),
            counters: Arc::clone(&counters),
            ctx,
        };
        let handle = tokio::spawn(task.run());
        Self {
            cancel,
            handle: Some(handle),
            counters,
        }
    }

    /// Whether the task is still alive. A panicked task reports `false`.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn stats(&self) -> CaptureStats {
        let c = &self.counters;
        CaptureStats {
            frames_captured: c.captured.load(Ordering::Relaxed),
            cycles: c.cycles.load(Ordering::Relaxed),
            failures: c.failures.count(),
            strategy: if c.push_active.load(Ordering::Relaxed) {
                CaptureStrategy::Push
            } else {
                CaptureStrategy::Polling
            },
            running: self.is_running(),
        }
    }

    /// Cancel the task and wait for it to exit. Idempotent.
    ///
    /// A sleeping task wakes at once; an in-flight capture finishes (or
    /// times out) and its result is discarded.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!("capture task panicked before stop");
                }
            }
        }
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── CaptureTask ──────────────────────────────────────────────────

enum PushOutcome {
    Stopped,
    Fallback(RenderError),
}

struct CaptureTask {
    ctx: CaptureContext,
    decoder: PixelDecoder,
    cancel: CancellationToken,
    counters: Arc<CaptureCounters>,
}

impl CaptureTask {
    async fn run(self) {
        debug!(output = %self.ctx.id, strategy = %self.ctx.strategy, "capture loop started");

        if self.ctx.strategy == CaptureStrategy::Push {
            self.counters.push_active.store(true, Ordering::Relaxed);
            match self.run_push().await {
                PushOutcome::Stopped => {
                    debug!(output = %self.ctx.id, "capture loop stopped");
                    return;
                }
                PushOutcome::Fallback(e) => {
                    info!(output = %self.ctx.id, "push capture unavailable ({e}); polling instead");
                    self.counters.push_active.store(false, Ordering::Relaxed);
                }
            }
        }

        self.run_polling().await;
        debug!(output = %self.ctx.id, "capture loop stopped");
    }

    async fn run_polling(&self) {
        while !self.cancel.is_cancelled() {
            let started = Instant::now();
            self.counters.cycles.fetch_add(1, Ordering::Relaxed);

            match self.capture_once().await {
                Ok(Some(still)) => self.decode_and_publish(still).await,
                Ok(None) => {}
                Err(e) => self.record_failure(&e.into()),
            }

            let wait = cycle_sleep(self.interval(), started.elapsed());
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn run_push(&self) -> PushOutcome {
        loop {
            let rate = self.ctx.frame_rate.load(Ordering::Relaxed);
            let mut sub = match self.ctx.renderer.subscribe_stream(&self.ctx.id, rate).await {
                Ok(sub) => sub,
                Err(e) => return PushOutcome::Fallback(e),
            };
            debug!(output = %self.ctx.id, rate, "subscribed to frame stream");

            loop {
                let pushed = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        sub.unsubscribe();
                        return PushOutcome::Stopped;
                    }
                    pushed = sub.next() => pushed,
                };
                let Some(pushed) = pushed else {
                    return PushOutcome::Fallback(RenderError::Unavailable(
                        "frame stream ended".into(),
                    ));
                };

                self.counters.cycles.fetch_add(1, Ordering::Relaxed);
                self.decode_and_publish(pushed.data).await;

                if let Err(e) = sub.ack(pushed.metadata.sequence).await {
                    return PushOutcome::Fallback(e);
                }
                if self.ctx.frame_rate.load(Ordering::Relaxed) != rate {
                    sub.unsubscribe();
                    break;
                }
            }
        }
    }

    async fn capture_once(&self) -> Result<Option<Bytes>, RenderError> {
        let timeout = self.ctx.capture_timeout;
        match tokio::time::timeout(timeout, self.ctx.renderer.capture_still(&self.ctx.id)).await {
            Ok(result) => result,
            Err(_) => Err(RenderError::Timeout(timeout)),
        }
    }

    /// Decode on the blocking pool and publish unless stopped meanwhile.
    async fn decode_and_publish(&self, still: Bytes) {
        let decoder = self.decoder;
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(&still)).await;

        let image = match decoded {
            Ok(Ok(image)) => image,
            Ok(Err(e)) => return self.record_failure(&e.into()),
            Err(e) => return self.record_failure(&FramecastError::Other(e.to_string())),
        };
        if self.cancel.is_cancelled() {
            return;
        }

        let seq = self.counters.captured.load(Ordering::Relaxed) + 1;
        match Frame::new(image.pixels, image.width, image.height, seq) {
            Ok(frame) => {
                self.ctx.buffer.publish(Arc::new(frame));
                self.counters.captured.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => self.record_failure(&e.into()),
        }
    }

    fn record_failure(&self, e: &FramecastError) {
        if let Some(n) = self.counters.failures.hit() {
            warn!(output = %self.ctx.id, failures = n, "capture failed: {e}");
        }
    }

    fn interval(&self) -> Duration {
        frame_interval(self.ctx.frame_rate.load(Ordering::Relaxed))
    }
}

/// Sleep before the next cycle: the rest of `interval`, at least
/// [`MIN_CYCLE_SLEEP`].
pub fn cycle_sleep(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed).max(MIN_CYCLE_SLEEP)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_fills_remaining_interval() {
        let d = cycle_sleep(Duration::from_millis(33), Duration::from_millis(10));
        assert_eq!(d, Duration::from_millis(23));
    }

    #[test]
    fn late_cycle_never_sleeps_negative() {
        let d = cycle_sleep(Duration::from_millis(33), Duration::from_millis(80));
        assert_eq!(d, MIN_CYCLE_SLEEP);
        let d = cycle_sleep(Duration::from_millis(33), Duration::from_millis(33));
        assert_eq!(d, MIN_CYCLE_SLEEP);
    }
}
