//! Single-slot latest-frame cell.
//!
//! Each output has exactly one [`FrameBuffer`], written by its capture loop
//! and read by its transmission loop. A write replaces the slot; nothing is
//! ever queued, so a slow reader sees the newest frame rather than a backlog.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::frame::Frame;

/// Latest-frame cell backed by a `tokio::sync::watch` channel.
///
/// `watch` swaps the whole `Option<Arc<Frame>>` under its lock, so a reader
/// observes either no frame or one complete frame. Clones share the slot.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    slot: Arc<watch::Sender<Option<Arc<Frame>>>>,
    published: Arc<AtomicU64>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            slot: Arc::new(tx),
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replace the held frame, discarding any previous one.
    pub fn publish(&self, frame: Arc<Frame>) {
        self.slot.send_replace(Some(frame));
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// The most recently published frame, if any.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.borrow().clone()
    }

    /// Time since the held frame was captured.
    pub fn age(&self) -> Option<Duration> {
        self.slot.borrow().as_ref().map(|f| f.captured_at().elapsed())
    }

    /// Drop the held frame. `latest()` returns `None` until the next publish.
    pub fn reset(&self) {
        self.slot.send_replace(None);
    }

    /// Total publishes since construction.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seq: u64, fill: u8) -> Arc<Frame> {
        Arc::new(Frame::new(vec![fill; 2 * 2 * 4], 2, 2, seq).unwrap())
    }

    #[test]
    fn empty_before_first_publish() {
        let buf = FrameBuffer::new();
        assert!(buf.latest().is_none());
        assert!(buf.age().is_none());
        assert_eq!(buf.published(), 0);
    }

    #[test]
    fn publish_then_latest_returns_same_frame() {
        let buf = FrameBuffer::new();
        let f = frame(1, 0x11);
        buf.publish(Arc::clone(&f));

        let got = buf.latest().unwrap();
        assert!(Arc::ptr_eq(&got, &f));
        assert_eq!(got.pixels(), f.pixels());
        assert_eq!((got.width(), got.height()), (2, 2));
    }

    #[test]
    fn latest_wins_after_many_publishes() {
        let buf = FrameBuffer::new();
        for i in 1..=50u64 {
            buf.publish(frame(i, i as u8));
        }
        let got = buf.latest().unwrap();
        assert_eq!(got.sequence(), 50);
        assert!(got.pixels().iter().all(|&b| b == 50));
        assert_eq!(buf.published(), 50);
    }

    #[test]
    fn reset_clears_slot() {
        let buf = FrameBuffer::new();
        buf.publish(frame(1, 0));
        buf.reset();
        assert!(buf.latest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn age_tracks_capture_time() {
        let buf = FrameBuffer::new();
        buf.publish(frame(1, 0));
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(buf.age(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn concurrent_reader_never_sees_torn_frame() {
        let buf = FrameBuffer::new();
        let reader = buf.clone();

        let writer = std::thread::spawn(move || {
            for i in 0..2000u64 {
                buf.publish(frame(i, (i % 251) as u8));
            }
        });

        for _ in 0..2000 {
            if let Some(f) = reader.latest() {
                let first = f.pixels()[0];
                assert!(f.pixels().iter().all(|&b| b == first));
                assert_eq!(first as u64, f.sequence() % 251);
            }
        }
        writer.join().unwrap();
    }
}
