//! Decoded frame representation shared between pipeline stages.

use bytes::Bytes;
use tokio::time::Instant;

use crate::error::DecodeError;

/// Bytes per pixel in the normalized layout (RGBA8).
pub const BYTES_PER_PIXEL: usize = 4;

/// A decoded, immutable RGBA8 image.
///
/// `pixels` holds `height` tightly-packed rows of `width * 4` bytes.
/// The only constructor checks that invariant, and the buffer is never
/// mutated afterwards, so frames are shared as `Arc<Frame>`.
#[derive(Clone)]
pub struct Frame {
    pixels: Bytes,
    width: u32,
    height: u32,
    captured_at: Instant,
    sequence: u64,
}

impl Frame {
    /// Wrap an RGBA8 buffer, rejecting one whose length disagrees with the
    /// geometry.
    pub fn new(
        pixels: impl Into<Bytes>,
        width: u32,
        height: u32,
        sequence: u64,
    ) -> Result<Self, DecodeError> {
        let pixels = pixels.into();
        let expected = byte_len(width, height);
        if pixels.len() != expected {
            return Err(DecodeError::LengthMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at: Instant::now(),
            sequence,
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Per-output capture counter at the time this frame was published.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("size", &self.pixels.len())
            .finish()
    }
}

/// Expected RGBA8 buffer length for a `width` x `height` image.
pub fn byte_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_matching_length() {
        let f = Frame::new(vec![0u8; 4 * 3 * 4], 4, 3, 7).unwrap();
        assert_eq!(f.width(), 4);
        assert_eq!(f.height(), 3);
        assert_eq!(f.pixels().len(), 48);
        assert_eq!(f.sequence(), 7);
    }

    #[test]
    fn rejects_short_buffer() {
        let err = Frame::new(vec![0u8; 10], 4, 3, 0).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::LengthMismatch {
                expected: 48,
                actual: 10
            }
        ));
    }
}
