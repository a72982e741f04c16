//! Grayscale frames and pixel-format conversion.

use image::{GrayImage, ImageFormat};

/// A captured frame, already reduced to 8-bit grayscale.
#[derive(Clone)]
pub struct Frame {
    pub image: GrayImage,
    pub sequence: u32,
}

impl Frame {
    pub fn new(image: GrayImage, sequence: u32) -> Self {
        Self { image, sequence }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let pixels = self.image.as_raw();
        if pixels.is_empty() {
            return 0.0;
        }
        pixels.iter().map(|&p| p as f32).sum::<f32>() / pixels.len() as f32
    }

    pub fn is_dark(&self) -> bool {
        is_dark_frame(self.image.as_raw(), DARK_FRAME_RATIO)
    }
}

/// Share of near-black pixels above which a frame counts as dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPEG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}

/// Extract the Y plane of packed YUYV 4:2:2 ([Y0, U, Y1, V] per pixel pair).
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    let luma: Vec<u8> = yuyv[..expected].iter().step_by(2).copied().collect();
    GrayImage::from_raw(width, height, luma).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

/// Copy an 8-bit GREY buffer into an image.
pub fn grey_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<GrayImage, FrameError> {
    let expected = (width * height) as usize;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    GrayImage::from_raw(width, height, buf[..expected].to_vec()).ok_or(FrameError::InvalidLength {
        expected,
        actual: buf.len(),
    })
}

/// Decode one MJPEG buffer (a complete JPEG image) to grayscale.
pub fn mjpeg_to_grayscale(buf: &[u8]) -> Result<GrayImage, FrameError> {
    Ok(image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_luma8())
}

/// True when more than `threshold_pct` of pixels fall below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < 32).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}
