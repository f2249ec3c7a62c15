//! Still-image decoder.
//!
//! Turns the PNG stills produced by the renderer into tightly-packed RGBA8
//! buffers. Stateless; the input is only borrowed for the duration of the
//! call.

use image::ImageFormat;

use crate::error::DecodeError;
use crate::frame::byte_len;

/// PNG file signature.
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Raw pixels plus geometry read from the image header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// RGBA8, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
}

/// Stateless PNG → RGBA8 decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelDecoder;

impl PixelDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode one still.
    ///
    /// Opaque images gain an alpha channel of `0xFF`; transparent images keep
    /// theirs.
    pub fn decode(&self, compressed: &[u8]) -> Result<DecodedImage, DecodeError> {
        if compressed.len() < PNG_SIGNATURE.len() || compressed[..8] != PNG_SIGNATURE {
            return Err(DecodeError::UnsupportedFormat);
        }

        let img = image::load_from_memory_with_format(compressed, ImageFormat::Png)?;
        let (width, height) = (img.width(), img.height());
        if width == 0 || height == 0 {
            return Err(DecodeError::EmptyImage { width, height });
        }

        let pixels = img.into_rgba8().into_raw();
        let expected = byte_len(width, height);
        if pixels.len() != expected {
            return Err(DecodeError::LengthMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        Ok(DecodedImage {
            width,
            height,
            pixels,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
