//! Deterministic stand-in for the recognition service.
//!
//! Images can be scripted with an exact set of faces; anything unscripted is
//! answered from an RNG seeded by the image's SHA-256 digest, so the same
//! bytes always get the same answer.

use crate::detection::{DetectionResult, RangeMargin};
use crate::recognizer::{EncodedImage, FaceDescriptor, RecognitionError, Recognizer};
use crate::types::{BoundingBox, FeatureError, FeatureVector, FEATURE_DIM};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Probability that an unscripted preview frame contains a face.
const UNSCRIPTED_FACE_PROBABILITY: f64 = 0.8;

type ImageDigest = [u8; 32];

pub struct SimulatedRecognizer {
    seed: u64,
    scenes: Mutex<HashMap<ImageDigest, Vec<FaceDescriptor>>>,
    latency: Option<Duration>,
    failing: AtomicBool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SimulatedRecognizer {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            scenes: Mutex::new(HashMap::new()),
            latency: None,
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Delay every answer by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make `image` contain exactly `faces`, in this order.
    pub fn script(&self, image: &[u8], faces: Vec<FaceDescriptor>) {
        let mut scenes = self.scenes.lock().unwrap_or_else(|e| e.into_inner());
        scenes.insert(digest(image), faces);
    }

    /// Toggle a simulated outage: every call fails as unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls answered or failed so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// A deterministic feature vector for `identity`, with components in [-1, 1].
    pub fn identity_features(identity: u64) -> FeatureVector {
        let mut rng = StdRng::seed_from_u64(identity);
        let values = (0..FEATURE_DIM).map(|_| rng.gen_range(-1.0f32..=1.0)).collect();
        FeatureVector::from_generated(values)
    }

    /// `base` shifted along its first axis so it lies exactly `distance` away.
    pub fn at_distance(base: &FeatureVector, distance: f32) -> Result<FeatureVector, FeatureError> {
        let mut values = base.values().to_vec();
        values[0] += distance;
        FeatureVector::new(values)
    }

    fn scene(&self, image: &EncodedImage) -> Option<Vec<FaceDescriptor>> {
        let scenes = self.scenes.lock().unwrap_or_else(|e| e.into_inner());
        scenes.get(&digest(image.as_bytes())).cloned()
    }

    fn rng_for(&self, image: &EncodedImage) -> StdRng {
        let d = digest(image.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&d[..8]);
        StdRng::seed_from_u64(self.seed ^ u64::from_le_bytes(prefix))
    }

    async fn enter(&self) -> Result<CallGuard<'_>, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = CallGuard(&self.in_flight);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(RecognitionError::Unreachable("simulated outage".into()));
        }
        Ok(guard)
    }
}

impl Default for SimulatedRecognizer {
    fn default() -> Self {
        Self::new(0)
    }
}

struct CallGuard<'a>(&'a AtomicUsize);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn digest(bytes: &[u8]) -> ImageDigest {
    Sha256::digest(bytes).into()
}

#[async_trait]
impl Recognizer for SimulatedRecognizer {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn detect(&self, image: &EncodedImage) -> Result<DetectionResult, RecognitionError> {
        let _guard = self.enter().await?;

        if let Some(faces) = self.scene(image) {
            let result = DetectionResult {
                face_detected: !faces.is_empty(),
                face_count: faces.len() as u32,
                bounding_box: faces.first().map(|f| f.bounding_box),
                out_of_range: None,
            };
            return Ok(result.classified(RangeMargin::default()));
        }

        let mut rng = self.rng_for(image);
        if !rng.gen_bool(UNSCRIPTED_FACE_PROBABILITY) {
            return Ok(DetectionResult::neutral());
        }
        let bounding_box = BoundingBox::new(
            rng.gen_range(25.0..55.0),
            rng.gen_range(25.0..55.0),
            rng.gen_range(20.0..30.0),
            rng.gen_range(25.0..40.0),
        );
        Ok(DetectionResult {
            face_detected: true,
            face_count: 1,
            bounding_box: Some(bounding_box),
            out_of_range: None,
        }
        .classified(RangeMargin::default()))
    }

    async fn describe_faces(
        &self,
        image: &EncodedImage,
    ) -> Result<Vec<FaceDescriptor>, RecognitionError> {
        let _guard = self.enter().await?;

        if let Some(faces) = self.scene(image) {
            return Ok(faces);
        }

        // Unscripted images hold exactly one face whose features are a pure
        // function of the image bytes.
        let mut rng = self.rng_for(image);
        let features = Self::identity_features(rng.gen());
        Ok(vec![FaceDescriptor {
            bounding_box: BoundingBox::new(35.0, 30.0, 30.0, 40.0),
            features,
        }])
    }
}
