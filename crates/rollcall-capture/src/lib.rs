//! rollcall-capture: camera sources and the live detection loop.
//!
//! A [`VideoSource`] is moved into a [`DetectionLoop`], which samples it,
//! asks the recognition service whether a face is present, and publishes
//! the answer. Stopping the loop hands the source back with its tracks
//! stopped.

#[cfg(feature = "v4l")]
pub mod camera;
pub mod detection_loop;
pub mod frame;
pub mod source;

#[cfg(feature = "v4l")]
pub use camera::V4lCamera;
pub use detection_loop::{AlreadyRunning, CaptureError, DetectionLoop, LoopConfig};
pub use frame::{Frame, FrameError, PixelLayout, CAPTURE_JPEG_QUALITY, PREVIEW_JPEG_QUALITY};
pub use source::{CameraError, SourceHandle, SyntheticSource, VideoSource};
