//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame, PixelLayout};
use crate::source::{CameraError, VideoSource};
use std::io;
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Requested capture size; drivers may negotiate something else.
const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelFormat {
    /// YUYV 4:2:2 packed, Y channel extracted.
    Yuyv,
    /// 8-bit grayscale.
    Grey,
    /// Packed 24-bit RGB.
    Rgb3,
}

/// V4L2 camera device handle.
pub struct V4lCamera {
    device: Option<Device>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pixel_format: PixelFormat,
}

impl V4lCamera {
    /// Open a V4L2 camera by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| open_error(device_path, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device
            .format()
            .map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
            })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device
            .set_format(&fmt)
            .map_err(|e| {
                CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
            })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else if fourcc == FourCC::new(b"RGB3") {
            PixelFormat::Rgb3
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV, GREY, or RGB3)"
            )));
        };

        tracing::info!(
            device = device_path,
            card = %caps.card,
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "opened camera"
        );

        Ok(Self {
            device: Some(device),
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            pixel_format,
        })
    }

    fn to_frame(&self, buf: &[u8], sequence: u32) -> Result<Frame, CameraError> {
        let pixels = (self.width * self.height) as usize;
        let (data, layout) = match self.pixel_format {
            PixelFormat::Yuyv => (
                frame::yuyv_to_grayscale(buf, self.width, self.height)
                    .map_err(|e| {
                        CameraError::CaptureFailed(format!("YUYV conversion failed: {e}"))
                    })?,
                PixelLayout::Gray,
            ),
            PixelFormat::Grey => (truncated(buf, pixels)?, PixelLayout::Gray),
            PixelFormat::Rgb3 => (truncated(buf, pixels * 3)?, PixelLayout::Rgb),
        };
        Frame::new(data, self.width, self.height, layout, sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }
}

fn truncated(buf: &[u8], len: usize) -> Result<Vec<u8>, CameraError> {
    if buf.len() < len {
        return Err(CameraError::CaptureFailed(format!(
            "buffer too short: expected {len}, got {}",
            buf.len()
        )));
    }
    Ok(buf[..len].to_vec())
}

fn open_error(device_path: &str, e: io::Error) -> CameraError {
    match e.kind() {
        io::ErrorKind::PermissionDenied => {
            CameraError::PermissionDenied(format!("{device_path}: {e}"))
        }
        io::ErrorKind::NotFound => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
        _ if e.raw_os_error() == Some(16) => CameraError::DeviceBusy,
        _ => CameraError::DeviceNotFound(format!("{device_path}: {e}")),
    }
}

impl VideoSource for V4lCamera {
    fn is_ready(&self) -> bool {
        self.device.is_some() && self.width > 0 && self.height > 0
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn grab_frame(&mut self) -> Result<Frame, CameraError> {
        let device = self.device.as_ref().ok_or(CameraError::Stopped)?;

        let mut stream = MmapStream::with_buffers(device, BufType::VideoCapture, 4).map_err(|e| {
            if e.raw_os_error() == Some(16) {
                CameraError::DeviceBusy
            } else {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            }
        })?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        self.to_frame(buf, meta.sequence)
    }

    fn stop(&mut self) {
        if self.device.take().is_some() {
            tracing::info!(device = %self.device_path, "camera released");
        }
    }

    fn is_stopped(&self) -> bool {
        self.device.is_none()
    }
}
