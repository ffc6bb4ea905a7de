//! Live face-detection loop.
//!
//! The loop is a tokio task that owns the camera source. It samples one frame
//! immediately and then once per interval, sends it to the recognition
//! service's preview call, and publishes the classified result on a watch
//! channel. Ticks are serialized: the next one cannot fire until the previous
//! call has settled. Per-tick failures are logged and published as the
//! neutral "no face" result; they never end the loop. Frame grabs run on the
//! blocking pool so a slow device never stalls the runtime.

use crate::frame::{FrameError, CAPTURE_JPEG_QUALITY, PREVIEW_JPEG_QUALITY};
use crate::source::{CameraError, VideoSource};
use rollcall_core::{DetectionResult, EncodedImage, RangeMargin, Recognizer};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("detection loop is not running")]
    NotRunning,
    #[error("video source is not ready")]
    SourceNotReady,
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("detection loop exited")]
    LoopExited,
    #[error("video source was lost")]
    SourceLost,
}

/// Returned by [`DetectionLoop::start_detection`] when a source is already
/// attached; carries the rejected source back so it is not lost.
pub struct AlreadyRunning(pub Box<dyn VideoSource>);

impl std::fmt::Debug for AlreadyRunning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AlreadyRunning")
    }
}

impl std::fmt::Display for AlreadyRunning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("detection loop already owns a video source")
    }
}

impl std::error::Error for AlreadyRunning {}

#[derive(Debug, Clone, Copy)]
pub struct LoopConfig {
    /// Sampling period.
    pub interval: Duration,
    /// Upper bound on one preview call.
    pub detect_timeout: Duration,
    pub margin: RangeMargin,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            detect_timeout: Duration::from_millis(500),
            margin: RangeMargin::default(),
        }
    }
}

/// Requests served by the loop task, the only holder of the camera.
enum LoopRequest {
    Capture {
        reply: oneshot::Sender<Result<EncodedImage, CaptureError>>,
    },
}

struct Running {
    cancel: CancellationToken,
    requests: mpsc::Sender<LoopRequest>,
    task: JoinHandle<Option<Box<dyn VideoSource>>>,
}

pub struct DetectionLoop {
    recognizer: Arc<dyn Recognizer>,
    config: LoopConfig,
    state: watch::Sender<DetectionResult>,
    running: Option<Running>,
}

impl DetectionLoop {
    pub fn new(recognizer: Arc<dyn Recognizer>, config: LoopConfig) -> Self {
        let (state, _) = watch::channel(DetectionResult::neutral());
        Self {
            recognizer,
            config,
            state,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Take ownership of `source` and begin polling. Must be called from
    /// within a tokio runtime.
    pub fn start_detection(&mut self, source: Box<dyn VideoSource>) -> Result<(), AlreadyRunning> {
        if self.running.is_some() {
            return Err(AlreadyRunning(source));
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(4);
        let worker = Worker {
            source: Some(source),
            recognizer: self.recognizer.clone(),
            config: self.config,
            state: self.state.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run(rx));

        tracing::info!(interval_ms = self.config.interval.as_millis() as u64, "detection started");
        self.running = Some(Running {
            cancel,
            requests: tx,
            task,
        });
        Ok(())
    }

    /// Halt polling and hand the source back with every track stopped.
    ///
    /// Once this returns no further results are published; the state is
    /// reset to the neutral result.
    pub async fn stop_detection(&mut self) -> Option<Box<dyn VideoSource>> {
        let running = self.running.take()?;
        running.cancel.cancel();

        let source = match running.task.await {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(error = %e, "detection task failed; camera dropped");
                None
            }
        };

        self.state.send_replace(DetectionResult::neutral());
        tracing::info!("detection stopped");
        source
    }

    /// The most recent result.
    pub fn last_result(&self) -> DetectionResult {
        self.state.borrow().clone()
    }

    /// A live view of the detection state.
    pub fn subscribe(&self) -> watch::Receiver<DetectionResult> {
        self.state.subscribe()
    }

    /// Capture a still photo from the running source.
    pub async fn capture_photo(&self) -> Result<EncodedImage, CaptureError> {
        let running = self.running.as_ref().ok_or(CaptureError::NotRunning)?;
        let (reply, rx) = oneshot::channel();
        running
            .requests
            .send(LoopRequest::Capture { reply })
            .await
            .map_err(|_| CaptureError::LoopExited)?;
        rx.await.map_err(|_| CaptureError::LoopExited)?
    }
}

impl Drop for DetectionLoop {
    fn drop(&mut self) {
        // The task stops the source's tracks on its way out.
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

struct Worker {
    /// Out only while a blocking grab holds it.
    source: Option<Box<dyn VideoSource>>,
    recognizer: Arc<dyn Recognizer>,
    config: LoopConfig,
    state: watch::Sender<DetectionResult>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<LoopRequest>,
    ) -> Option<Box<dyn VideoSource>> {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(request) = requests.recv() => self.serve(request).await,
                _ = ticker.tick() => {
                    if let Some(result) = self.poll_once().await {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        self.state.send_replace(result);
                    }
                }
            }
        }

        let mut source = self.source.take()?;
        source.stop();
        Some(source)
    }

    async fn serve(&mut self, request: LoopRequest) {
        match request {
            LoopRequest::Capture { reply } => {
                let result = self.grab_encoded(CAPTURE_JPEG_QUALITY).await;
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "photo capture failed");
                }
                let _ = reply.send(result);
            }
        }
    }

    fn source_ready(&self) -> bool {
        self.source.as_ref().is_some_and(|source| source.is_ready())
    }

    /// Grab and encode one frame on the blocking pool. A device read waits
    /// for the next frame from the driver.
    async fn grab_encoded(&mut self, quality: u8) -> Result<EncodedImage, CaptureError> {
        if !self.source_ready() {
            return Err(CaptureError::SourceNotReady);
        }
        let mut source = self.source.take().ok_or(CaptureError::SourceLost)?;
        let grabbed = tokio::task::spawn_blocking(move || {
            let result = source
                .grab_frame()
                .map_err(CaptureError::from)
                .and_then(|frame| Ok(frame.encode_jpeg(quality)?));
            (source, result)
        })
        .await;

        match grabbed {
            Ok((source, result)) => {
                self.source = Some(source);
                result
            }
            Err(e) => {
                tracing::error!(error = %e, "frame grab panicked; camera dropped");
                Err(CaptureError::SourceLost)
            }
        }
    }

    /// One sample. `None` means the tick was skipped or cancelled.
    async fn poll_once(&mut self) -> Option<DetectionResult> {
        if !self.source_ready() {
            tracing::trace!("video source not ready; skipping tick");
            return None;
        }

        let grabbed = self.grab_encoded(PREVIEW_JPEG_QUALITY).await;
        if self.cancel.is_cancelled() {
            return None;
        }
        let image = match grabbed {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(error = %e, "failed to grab preview frame");
                return Some(DetectionResult::neutral());
            }
        };

        let call = tokio::time::timeout(self.config.detect_timeout, self.recognizer.detect(&image));
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            outcome = call => outcome,
        };

        Some(match outcome {
            Ok(Ok(result)) => result.classified(self.config.margin),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "preview detection failed; reporting no face");
                DetectionResult::neutral()
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.config.detect_timeout.as_millis() as u64,
                    "preview detection timed out; reporting no face"
                );
                DetectionResult::neutral()
            }
        })
    }
}
