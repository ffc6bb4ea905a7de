//! Video sources: the camera abstraction the detection loop owns.

use crate::frame::{Frame, PixelLayout};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera permission denied: {0}")]
    PermissionDenied(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("camera stream has been stopped")]
    Stopped,
}

impl CameraError {
    /// What the user can do about it.
    pub fn remedy(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "Please allow camera permissions and try again.",
            Self::DeviceNotFound(_) => "No camera found on this device.",
            Self::DeviceBusy => "Camera is already in use by another application.",
            Self::Stopped => "Restart the camera and try again.",
            _ => "Please check your camera settings and try again.",
        }
    }
}

/// A live camera stream.
///
/// Exactly one owner holds a source at a time; it is moved into the
/// detection loop on start and handed back, stopped, on stop.
pub trait VideoSource: Send {
    /// Playing and reporting non-zero dimensions.
    fn is_ready(&self) -> bool;

    fn dimensions(&self) -> (u32, u32);

    /// Grab the current frame.
    fn grab_frame(&mut self) -> Result<Frame, CameraError>;

    /// Stop every track and release the device. Idempotent.
    fn stop(&mut self);

    fn is_stopped(&self) -> bool;
}

/// Shared view of a [`SyntheticSource`]'s state, kept by whoever handed the
/// source off.
#[derive(Clone, Default)]
pub struct SourceHandle {
    playing: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    grabbed: Arc<AtomicU32>,
}

impl SourceHandle {
    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn frames_grabbed(&self) -> u32 {
        self.grabbed.load(Ordering::SeqCst)
    }
}

/// Generated frames: a fixed image or a moving gradient.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    fixed: Option<Vec<u8>>,
    handle: SourceHandle,
}

impl SyntheticSource {
    /// A playing source producing a gradient that shifts every frame.
    pub fn new(width: u32, height: u32) -> Self {
        let handle = SourceHandle::default();
        handle.set_playing(true);
        Self {
            width,
            height,
            fixed: None,
            handle,
        }
    }

    /// A source that always yields the same grayscale image.
    pub fn fixed(width: u32, height: u32, gray: Vec<u8>) -> Self {
        let mut source = Self::new(width, height);
        source.fixed = Some(gray);
        source
    }

    pub fn handle(&self) -> SourceHandle {
        self.handle.clone()
    }

    fn gradient(&self, sequence: u32) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                data.push(((x + y + sequence as usize) % 256) as u8);
            }
        }
        data
    }
}

impl VideoSource for SyntheticSource {
    fn is_ready(&self) -> bool {
        self.handle.playing.load(Ordering::SeqCst)
            && !self.handle.is_stopped()
            && self.width > 0
            && self.height > 0
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn grab_frame(&mut self) -> Result<Frame, CameraError> {
        if self.handle.is_stopped() {
            return Err(CameraError::Stopped);
        }
        let sequence = self.handle.grabbed.fetch_add(1, Ordering::SeqCst);
        let data = match &self.fixed {
            Some(gray) => gray.clone(),
            None => self.gradient(sequence),
        };
        Frame::new(data, self.width, self.height, PixelLayout::Gray, sequence)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))
    }

    fn stop(&mut self) {
        if !self.handle.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!("synthetic source stopped");
        }
        self.handle.set_playing(false);
    }

    fn is_stopped(&self) -> bool {
        self.handle.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remedies_per_cause() {
        assert_eq!(
            CameraError::PermissionDenied("x".into()).remedy(),
            "Please allow camera permissions and try again."
        );
        assert_eq!(
            CameraError::DeviceNotFound("x".into()).remedy(),
            "No camera found on this device."
        );
        assert_eq!(
            CameraError::DeviceBusy.remedy(),
            "Camera is already in use by another application."
        );
    }

    #[test]
    fn test_synthetic_ready_and_stop() {
        let mut source = SyntheticSource::new(8, 6);
        let handle = source.handle();
        assert!(source.is_ready());

        let frame = source.grab_frame().unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
        assert_eq!(handle.frames_grabbed(), 1);

        source.stop();
        assert!(handle.is_stopped());
        assert!(!source.is_ready());
        assert!(matches!(source.grab_frame(), Err(CameraError::Stopped)));
    }

    #[test]
    fn test_zero_size_source_is_not_ready() {
        assert!(!SyntheticSource::new(0, 0).is_ready());
    }

    #[test]
    fn test_paused_source_is_not_ready() {
        let source = SyntheticSource::new(4, 4);
        source.handle().set_playing(false);
        assert!(!source.is_ready());
    }
}
