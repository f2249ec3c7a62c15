//! Seams to the collaborators the pipeline drives but does not own.
//!
//! A [`Renderer`] paints outputs offscreen and hands back compressed stills.
//! A [`SenderFactory`] opens one [`VideoSender`] per output stream.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::OutputId;
use crate::error::{RenderError, SendError};
use crate::frame::Frame;

// ── Renderer ─────────────────────────────────────────────────────

/// Proof that a render surface was allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceHandle {
    pub id: OutputId,
    pub width: u32,
    pub height: u32,
}

/// Offscreen renderer, shared by every pipeline and keyed by output.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Allocate a surface of fixed geometry and navigate it to `target`.
    async fn allocate_surface(
        &self,
        id: &OutputId,
        width: u32,
        height: u32,
        target: &str,
    ) -> Result<SurfaceHandle, RenderError>;

    /// Capture one compressed still. `Ok(None)` means nothing was painted
    /// yet.
    async fn capture_still(&self, id: &OutputId) -> Result<Option<Bytes>, RenderError>;

    /// Start renderer-driven capture at up to `max_rate` frames per second.
    ///
    /// Streams carry no alpha channel.
    async fn subscribe_stream(
        &self,
        id: &OutputId,
        max_rate: u32,
    ) -> Result<FrameSubscription, RenderError> {
        let _ = (id, max_rate);
        Err(RenderError::StreamingUnsupported)
    }

    /// Give the surface back. The renderer itself stays alive.
    async fn release_surface(&self, id: &OutputId);
}

// ── Push capture ─────────────────────────────────────────────────

/// Metadata delivered with each pushed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushMetadata {
    /// Renderer-assigned sequence, echoed back in the acknowledgement.
    pub sequence: u64,
    pub device_width: u32,
    pub device_height: u32,
}

/// One compressed frame pushed by the renderer.
#[derive(Debug, Clone)]
pub struct PushedFrame {
    pub data: Bytes,
    pub metadata: PushMetadata,
}

/// Consumer half of a renderer frame stream.
///
/// The renderer must not push frame `n + 1` before frame `n` is acknowledged,
/// which keeps at most one undelivered frame between the two sides. Dropping
/// the subscription unsubscribes.
pub struct FrameSubscription {
    frames: mpsc::Receiver<PushedFrame>,
    acks: mpsc::Sender<u64>,
    cancel: CancellationToken,
}

/// Producer half handed to the renderer side of a subscription.
pub struct FramePublisher {
    pub frames: mpsc::Sender<PushedFrame>,
    pub acks: mpsc::Receiver<u64>,
    /// Cancelled when the consumer unsubscribes.
    pub cancelled: CancellationToken,
}

impl FrameSubscription {
    /// Create a connected subscription/publisher pair.
    pub fn channel() -> (FrameSubscription, FramePublisher) {
        let (frame_tx, frame_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        (
            FrameSubscription {
                frames: frame_rx,
                acks: ack_tx,
                cancel: cancel.clone(),
            },
            FramePublisher {
                frames: frame_tx,
                acks: ack_rx,
                cancelled: cancel,
            },
        )
    }

    /// Next pushed frame; `None` once the renderer ends the stream.
    pub async fn next(&mut self) -> Option<PushedFrame> {
        self.frames.recv().await
    }

    /// Acknowledge `sequence`, allowing the renderer to push the next frame.
    pub async fn ack(&self, sequence: u64) -> Result<(), RenderError> {
        self.acks
            .send(sequence)
            .await
            .map_err(|_| RenderError::Unavailable("frame stream closed".into()))
    }

    /// Stop the stream.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FrameSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl FramePublisher {
    /// Push one frame and wait for its acknowledgement.
    ///
    /// Returns `false` once the consumer is gone.
    pub async fn push(&mut self, frame: PushedFrame) -> bool {
        let seq = frame.metadata.sequence;
        tokio::select! {
            _ = self.cancelled.cancelled() => return false,
            sent = self.frames.send(frame) => {
                if sent.is_err() {
                    return false;
                }
            }
        }
        loop {
            let ack = tokio::select! {
                _ = self.cancelled.cancelled() => return false,
                ack = self.acks.recv() => ack,
            };
            match ack {
                Some(n) if n == seq => return true,
                Some(_) => continue,
                None => return false,
            }
        }
    }
}

// ── Sender ───────────────────────────────────────────────────────

/// Opens stream senders.
#[async_trait]
pub trait SenderFactory: Send + Sync {
    async fn open(
        &self,
        label: &str,
        width: u32,
        height: u32,
        frame_rate: u32,
    ) -> Result<Arc<dyn VideoSender>, SendError>;
}

/// One outbound video stream.
#[async_trait]
pub trait VideoSender: Send + Sync {
    /// Transmit one RGBA8 frame.
    async fn send(&self, frame: &Frame) -> Result<(), SendError>;

    /// Change the announced stream name. Adapters that cannot rename in
    /// place reopen internally.
    async fn rename(&self, label: &str) -> Result<(), SendError>;

    /// Inform the sender of a new nominal frame rate.
    async fn set_frame_rate(&self, frame_rate: u32) -> Result<(), SendError> {
        let _ = frame_rate;
        Ok(())
    }

    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pushed(seq: u64) -> PushedFrame {
        PushedFrame {
            data: Bytes::from_static(b"png"),
            metadata: PushMetadata {
                sequence: seq,
                device_width: 1,
                device_height: 1,
            },
        }
    }

    #[tokio::test]
    async fn push_waits_for_ack() {
        let (mut sub, mut publisher) = FrameSubscription::channel();

        let producer = tokio::spawn(async move {
            assert!(publisher.push(pushed(1)).await);
            assert!(publisher.push(pushed(2)).await);
            publisher
        });

        let first = sub.next().await.unwrap();
        assert_eq!(first.metadata.sequence, 1);
        sub.ack(1).await.unwrap();

        let second = sub.next().await.unwrap();
        assert_eq!(second.metadata.sequence, 2);
        sub.ack(2).await.unwrap();

        producer.await.unwrap();
    }

    #[tokio::test]
    async fn dropping_subscription_stops_publisher() {
        let (sub, mut publisher) = FrameSubscription::channel();
        drop(sub);
        assert!(publisher.cancelled.is_cancelled());
        assert!(!publisher.push(pushed(1)).await);
    }
}
