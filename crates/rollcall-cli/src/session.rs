//! Camera-driven flows: open a source, wait for a well-framed face, capture.

use anyhow::{bail, Context, Result};
use rollcall_capture::{DetectionLoop, LoopConfig, SyntheticSource, VideoSource};
use rollcall_core::{
    DetectionResult, DetectionState, EncodedImage, RangeMargin, Recognizer, RemoteRecognizer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// `--camera synthetic` selects generated frames instead of a device.
pub const SYNTHETIC_CAMERA: &str = "synthetic";

pub fn open_camera(spec: &str) -> Result<Box<dyn VideoSource>> {
    if spec == SYNTHETIC_CAMERA {
        return Ok(Box::new(SyntheticSource::new(640, 480)));
    }
    open_device(spec)
}

#[cfg(feature = "v4l")]
fn open_device(path: &str) -> Result<Box<dyn VideoSource>> {
    match rollcall_capture::V4lCamera::open(path) {
        Ok(camera) => Ok(Box::new(camera)),
        Err(e) => Err(anyhow::anyhow!("{e}. {}", e.remedy())),
    }
}

#[cfg(not(feature = "v4l"))]
fn open_device(path: &str) -> Result<Box<dyn VideoSource>> {
    bail!("camera {path} needs a build with the `v4l` feature; use --camera {SYNTHETIC_CAMERA}")
}

/// Build a detection loop whose preview calls go through rollcalld.
pub fn detection_loop(daemon_url: &str, interval: Duration, margin: f32) -> Result<DetectionLoop> {
    let config = LoopConfig {
        interval,
        margin: RangeMargin::new(margin),
        ..LoopConfig::default()
    };
    let recognizer: Arc<dyn Recognizer> = Arc::new(
        RemoteRecognizer::new(daemon_url, config.detect_timeout, Duration::from_secs(30))
            .context("failed to build detection client")?,
    );
    Ok(DetectionLoop::new(recognizer, config))
}

pub fn describe(result: &DetectionResult) -> &'static str {
    match result.state() {
        DetectionState::NoFace => "no face detected",
        DetectionState::Looking => "face detected, move to the center of the frame",
        DetectionState::Ready => "ready to capture",
    }
}

/// Wait until the published result is ready to capture.
pub async fn wait_until_ready(
    rx: &mut watch::Receiver<DetectionResult>,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        if rx.borrow_and_update().is_ready_to_capture() {
            return Ok(());
        }
        match tokio::time::timeout_at(deadline, rx.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => bail!("detection loop stopped"),
            Err(_) => bail!("no well-framed face within {}s", timeout.as_secs()),
        }
    }
}

/// Capture `count` photos, each taken only once the face is framed.
/// `on_photo` receives the 1-based slot and the encoded photo.
pub async fn capture_series<F, Fut>(
    detection: &DetectionLoop,
    count: u32,
    ready_timeout: Duration,
    gap: Duration,
    mut on_photo: F,
) -> Result<()>
where
    F: FnMut(u32, EncodedImage) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut rx = detection.subscribe();
    for slot in 1..=count {
        wait_until_ready(&mut rx, ready_timeout)
            .await
            .with_context(|| format!("photo {slot}/{count}"))?;
        let photo = detection
            .capture_photo()
            .await
            .with_context(|| format!("failed to capture photo {slot}/{count}"))?;
        on_photo(slot, photo).await?;
        if slot < count {
            tokio::time::sleep(gap).await;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_capture::{Frame, PixelLayout, PREVIEW_JPEG_QUALITY};
    use rollcall_core::{BoundingBox, FaceDescriptor, SimulatedRecognizer};
    use std::sync::Mutex;

    fn ready() -> DetectionResult {
        DetectionResult {
            face_detected: true,
            face_count: 1,
            bounding_box: Some(BoundingBox::new(20.0, 20.0, 30.0, 30.0)),
            out_of_range: Some(false),
        }
    }

    fn looking() -> DetectionResult {
        DetectionResult {
            out_of_range: Some(true),
            ..ready()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready_returns_on_ready() {
        let (tx, mut rx) = watch::channel(DetectionResult::neutral());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send_replace(looking());
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send_replace(ready());
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let start = Instant::now();
        wait_until_ready(&mut rx, Duration::from_secs(10)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_ready_times_out() {
        let (tx, mut rx) = watch::channel(looking());
        let err = wait_until_ready(&mut rx, Duration::from_secs(3)).await.unwrap_err();
        assert!(err.to_string().contains("within 3s"));
        drop(tx);
    }

    #[tokio::test]
    async fn test_wait_until_ready_fails_when_loop_gone() {
        let (tx, mut rx) = watch::channel(DetectionResult::neutral());
        drop(tx);
        let err = wait_until_ready(&mut rx, Duration::from_secs(3)).await.unwrap_err();
        assert!(err.to_string().contains("stopped"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_series_stores_every_slot() {
        let gray = vec![90u8; 32 * 24];
        let preview = Frame::new(gray.clone(), 32, 24, PixelLayout::Gray, 0)
            .unwrap()
            .encode_jpeg(PREVIEW_JPEG_QUALITY)
            .unwrap();
        let sim = Arc::new(SimulatedRecognizer::new(0));
        sim.script(
            preview.as_bytes(),
            vec![FaceDescriptor {
                bounding_box: BoundingBox::new(20.0, 20.0, 30.0, 30.0),
                features: SimulatedRecognizer::identity_features(1),
            }],
        );

        let mut detection = DetectionLoop::new(sim, LoopConfig::default());
        detection
            .start_detection(Box::new(SyntheticSource::fixed(32, 24, gray)))
            .unwrap();

        let slots = Mutex::new(Vec::new());
        let ready_timeout = Duration::from_secs(5);
        let gap = Duration::from_millis(500);
        capture_series(&detection, 3, ready_timeout, gap, |slot, photo| {
            assert!(!photo.is_empty());
            slots.lock().unwrap().push(slot);
            async { Ok(()) }
        })
        .await
        .unwrap();
        assert_eq!(*slots.lock().unwrap(), vec![1, 2, 3]);

        let source = detection.stop_detection().await.unwrap();
        assert!(source.is_stopped());
    }

    #[test]
    fn test_describe_states() {
        assert_eq!(describe(&DetectionResult::neutral()), "no face detected");
        assert_eq!(describe(&looking()), "face detected, move to the center of the frame");
        assert_eq!(describe(&ready()), "ready to capture");
    }

    #[test]
    fn test_synthetic_camera_opens() {
        let source = open_camera(SYNTHETIC_CAMERA).unwrap();
        assert!(source.is_ready());
        assert_eq!(source.dimensions(), (640, 480));
    }

    #[cfg(not(feature = "v4l"))]
    #[test]
    fn test_device_needs_v4l_feature() {
        let err = open_camera("/dev/video0").err().unwrap();
        assert!(err.to_string().contains("v4l"));
    }
}
