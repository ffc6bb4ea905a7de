//! Frame type, pixel conversion, and JPEG encoding.

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder};
use rollcall_core::EncodedImage;

/// JPEG quality for preview frames sent to the recognition service.
pub const PREVIEW_JPEG_QUALITY: u8 = 80;
/// JPEG quality for captured enrollment/attendance photos.
pub const CAPTURE_JPEG_QUALITY: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// 8-bit grayscale, 1 byte/pixel.
    Gray,
    /// Packed 8-bit RGB, 3 bytes/pixel.
    Rgb,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Rgb => 3,
        }
    }

    fn color_type(self) -> ExtendedColorType {
        match self {
            Self::Gray => ExtendedColorType::L8,
            Self::Rgb => ExtendedColorType::Rgb8,
        }
    }
}

/// A captured camera frame.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub sequence: u32,
    pub timestamp: std::time::Instant,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        layout: PixelLayout,
        sequence: u32,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * layout.bytes_per_pixel();
        if width == 0 || height == 0 || data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            layout,
            sequence,
            timestamp: std::time::Instant::now(),
        })
    }

    /// Encode the frame as JPEG at the given quality (1–100).
    pub fn encode_jpeg(&self, quality: u8) -> Result<EncodedImage, FrameError> {
        let mut out = Vec::with_capacity(self.data.len() / 4);
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).write_image(
            &self.data,
            self.width,
            self.height,
            self.layout.color_type(),
        )?;
        Ok(EncodedImage::new(out))
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("jpeg encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}
