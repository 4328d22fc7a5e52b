//! RGB frames and their PNG encoding.

use image::{ImageFormat, RgbImage};
use std::io::Cursor;

/// A decoded RGB8 video frame or stored enrollment image.
#[derive(Clone, PartialEq)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Source sequence number; 0 for frames decoded from storage.
    pub sequence: u64,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl Frame {
    /// Wrap packed RGB8 pixels, validating the buffer length.
    pub fn from_rgb(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self, FrameError> {
        let expected = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            pixels,
            width,
            height,
            sequence,
        })
    }

    /// Horizontally flipped copy, used for captures from user-facing cameras.
    pub fn mirrored(&self) -> Frame {
        let w = self.width as usize;
        if w == 0 {
            return self.clone();
        }
        let mut pixels = Vec::with_capacity(self.pixels.len());
        for row in self.pixels.chunks_exact(w * 3) {
            for px in row.chunks_exact(3).rev() {
                pixels.extend_from_slice(px);
            }
        }
        Frame {
            pixels,
            width: self.width,
            height: self.height,
            sequence: self.sequence,
        }
    }

    /// Encode as PNG (lossless, so stored images decode to identical pixels).
    pub fn encode_png(&self) -> Result<Vec<u8>, FrameError> {
        let img = RgbImage::from_raw(self.width, self.height, self.pixels.clone()).ok_or(
            FrameError::InvalidLength {
                expected: (self.width as usize) * (self.height as usize) * 3,
                actual: self.pixels.len(),
            },
        )?;
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    /// Decode any image format the `image` crate understands into an RGB8 frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let img = image::load_from_memory(bytes)?.to_rgb8();
        let (width, height) = img.dimensions();
        Ok(Self {
            pixels: img.into_raw(),
            width,
            height,
            sequence: 0,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid RGB length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("image codec: {0}")]
    Codec(#[from] image::ImageError),
}
