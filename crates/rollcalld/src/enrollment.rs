//! Enrollment: collect N photos per student, then reduce them to a signature.

use crate::photos::{validate_student_name, PhotoStore, PhotoStoreError};
use crate::store::{NewEnrollment, Repository, StoreError};
use rollcall_core::{EncodedImage, Extraction, FeatureVector, RecognitionError, Recognizer};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error(transparent)]
    InvalidStudentName(PhotoStoreError),
    #[error("photo slot {slot} is outside 1..={max}")]
    InvalidSlot { slot: u32, max: u32 },
    #[error("expected {expected} photos, got {actual}")]
    PhotoCountMismatch { expected: u32, actual: u32 },
    #[error("missing enrollment photos for slots {0:?}")]
    MissingPhotos(Vec<u32>),
    #[error("no usable photos: none contained exactly one face")]
    NoUsablePhotos,
    #[error("only {valid} of the required {required} photos contained exactly one face")]
    Incomplete { valid: u32, required: u32 },
    #[error("recognition service error: {0}")]
    Recognition(#[from] RecognitionError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Photo(PhotoStoreError),
}

impl From<PhotoStoreError> for EnrollmentError {
    fn from(e: PhotoStoreError) -> Self {
        match e {
            PhotoStoreError::InvalidName(_) => Self::InvalidStudentName(e),
            PhotoStoreError::Io(_) => Self::Photo(e),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnrollmentSettings {
    /// Photos per student (N).
    pub photo_count: u32,
    /// Valid photos required to write a signature.
    pub min_valid_photos: u32,
    /// Bound on each feature extraction call.
    pub extract_timeout: Duration,
}

/// Result of a successful finalize.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentOutcome {
    pub student_id: i64,
    pub valid_photos: u32,
    pub total_photos: u32,
}

pub struct EnrollmentPipeline {
    recognizer: Arc<dyn Recognizer>,
    repo: Arc<dyn Repository>,
    photos: PhotoStore,
    settings: EnrollmentSettings,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl EnrollmentPipeline {
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        repo: Arc<dyn Repository>,
        photos: PhotoStore,
        settings: EnrollmentSettings,
    ) -> Self {
        Self {
            recognizer,
            repo,
            photos,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to one student's photos and signature.
    async fn lock_student(&self, student: &str) -> StudentLock<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(student.to_string()).or_default().clone()
        };
        StudentLock {
            locks: &self.locks,
            student: student.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Persist one enrollment photo at 1-based `slot`.
    pub async fn store_photo(
        &self,
        student: &str,
        image: &EncodedImage,
        slot: u32,
    ) -> Result<PathBuf, EnrollmentError> {
        let student = validate_student_name(student)?;
        if slot == 0 || slot > self.settings.photo_count {
            return Err(EnrollmentError::InvalidSlot {
                slot,
                max: self.settings.photo_count,
            });
        }

        let _lock = self.lock_student(student).await;
        let path = self.photos.store(student, slot, image).await?;
        tracing::info!(student, slot, bytes = image.len(), "stored enrollment photo");
        Ok(path)
    }

    /// Extract features from every stored photo and write the mean as the
    /// student's signature. Nothing is written unless the validity floor is met.
    pub async fn finalize_enrollment(
        &self,
        student: &str,
        photo_count: u32,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        let student = validate_student_name(student)?;
        let expected = self.settings.photo_count;
        if photo_count != expected {
            return Err(EnrollmentError::PhotoCountMismatch {
                expected,
                actual: photo_count,
            });
        }

        let _lock = self.lock_student(student).await;

        let mut images = Vec::with_capacity(expected as usize);
        let mut missing = Vec::new();
        for slot in 1..=expected {
            match self.photos.load(student, slot).await? {
                Some(image) => images.push((slot, image)),
                None => missing.push(slot),
            }
        }
        if !missing.is_empty() {
            tracing::warn!(student, ?missing, "cannot finalize: photos missing");
            return Err(EnrollmentError::MissingPhotos(missing));
        }

        let mut valid = Vec::with_capacity(images.len());
        for (slot, image) in &images {
            match self.extract(image).await? {
                Extraction::Face { features, .. } => valid.push(features),
                Extraction::NoFace => {
                    tracing::warn!(student, slot, "skipping photo: no face detected")
                }
                Extraction::MultipleFaces(n) => {
                    tracing::warn!(student, slot, faces = n, "skipping photo: more than one face")
                }
            }
        }

        let valid_photos = valid.len() as u32;
        let Some(signature) = FeatureVector::mean(&valid) else {
            return Err(EnrollmentError::NoUsablePhotos);
        };
        if valid_photos < self.settings.min_valid_photos {
            return Err(EnrollmentError::Incomplete {
                valid: valid_photos,
                required: self.settings.min_valid_photos,
            });
        }

        let folder_path = self.photos.student_dir(student)?;
        let student_id = self
            .repo
            .upsert_signature(NewEnrollment {
                student_name: student.to_string(),
                folder_path: folder_path.to_string_lossy().into_owned(),
                photo_count: expected,
                features: signature,
            })
            .await?;

        tracing::info!(
            student,
            student_id,
            valid_photos,
            total_photos = expected,
            "enrollment finalized"
        );
        Ok(EnrollmentOutcome {
            student_id,
            valid_photos,
            total_photos: expected,
        })
    }

    async fn extract(&self, image: &EncodedImage) -> Result<Extraction, RecognitionError> {
        let timeout = self.settings.extract_timeout;
        tokio::time::timeout(timeout, self.recognizer.extract_features(image))
            .await
            .map_err(|_| RecognitionError::Timeout(timeout.as_millis() as u64))?
    }
}

/// Held for the duration of one student's critical section. The map entry is
/// removed once no other task holds or waits on it.
struct StudentLock<'a> {
    locks: &'a Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    student: String,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for StudentLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.student)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.student);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::ReadOnlyStore;
    use crate::store::SqliteStore;
    use rollcall_core::{BoundingBox, FaceDescriptor, SimulatedRecognizer};
    use tempfile::TempDir;

    struct Fixture {
        sim: Arc<SimulatedRecognizer>,
        store: Arc<SqliteStore>,
        pipeline: EnrollmentPipeline,
        _dir: TempDir,
    }

    async fn fixture(photo_count: u32, min_valid_photos: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(SimulatedRecognizer::new(7));
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let pipeline = EnrollmentPipeline::new(
            sim.clone(),
            store.clone(),
            PhotoStore::new(dir.path()),
            EnrollmentSettings {
                photo_count,
                min_valid_photos,
                extract_timeout: Duration::from_secs(5),
            },
        );
        Fixture {
            sim,
            store,
            pipeline,
            _dir: dir,
        }
    }

    fn face(features: FeatureVector) -> FaceDescriptor {
        FaceDescriptor {
            bounding_box: BoundingBox::new(30.0, 30.0, 30.0, 30.0),
            features,
        }
    }

    fn photo(student: &str, slot: u32) -> EncodedImage {
        EncodedImage::new(format!("{student}-photo-{slot}").into_bytes())
    }

    /// Store N photos for `student`, each scripted to one face near `identity`.
    async fn enroll_photos(fx: &Fixture, student: &str, identity: u64, slots: u32) {
        let base = SimulatedRecognizer::identity_features(identity);
        for slot in 1..=slots {
            let image = photo(student, slot);
            let features = SimulatedRecognizer::at_distance(&base, slot as f32 * 0.001).unwrap();
            fx.sim.script(image.as_bytes(), vec![face(features)]);
            fx.pipeline.store_photo(student, &image, slot).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_full_enrollment_writes_one_signature() {
        let fx = fixture(10, 10).await;
        enroll_photos(&fx, "Alice", 1, 10).await;

        let outcome = fx.pipeline.finalize_enrollment("Alice", 10).await.unwrap();
        assert_eq!(outcome.valid_photos, 10);
        assert_eq!(outcome.total_photos, 10);

        let sigs = fx.store.find_signatures().await.unwrap();
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].student_id, outcome.student_id);
        let base = SimulatedRecognizer::identity_features(1);
        assert!(sigs[0].features.euclidean_distance(&base) < 0.01);
    }

    #[tokio::test]
    async fn test_nine_valid_photos_fail_and_keep_prior_signature() {
        let fx = fixture(10, 10).await;
        enroll_photos(&fx, "Alice", 1, 10).await;
        fx.pipeline.finalize_enrollment("Alice", 10).await.unwrap();
        let before = fx.store.find_signatures().await.unwrap();

        // re-enroll with a different identity, one photo faceless
        enroll_photos(&fx, "Alice", 2, 10).await;
        fx.sim.script(photo("Alice", 4).as_bytes(), vec![]);

        let err = fx.pipeline.finalize_enrollment("Alice", 10).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::Incomplete { valid: 9, required: 10 }));
        assert_eq!(fx.store.find_signatures().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_prior_signature() {
        let fx = fixture(3, 3).await;
        enroll_photos(&fx, "Alice", 1, 3).await;
        fx.pipeline.finalize_enrollment("Alice", 3).await.unwrap();
        let before = fx.store.find_signatures().await.unwrap();

        let failing = EnrollmentPipeline::new(
            fx.sim.clone(),
            Arc::new(ReadOnlyStore(fx.store.clone())),
            PhotoStore::new(fx._dir.path()),
            EnrollmentSettings {
                photo_count: 3,
                min_valid_photos: 3,
                extract_timeout: Duration::from_secs(5),
            },
        );
        enroll_photos(&fx, "Alice", 2, 3).await;

        let err = failing.finalize_enrollment("Alice", 3).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::Storage(_)), "{err}");
        assert_eq!(fx.store.find_signatures().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_student_locks_are_released() {
        let fx = fixture(3, 3).await;
        let (a, b) = (photo("Alice", 1), photo("Alice", 2));
        let (first, second) = tokio::join!(
            fx.pipeline.store_photo("Alice", &a, 1),
            fx.pipeline.store_photo("Alice", &b, 2),
        );
        first.unwrap();
        second.unwrap();
        enroll_photos(&fx, "Bob", 3, 3).await;
        fx.pipeline.finalize_enrollment("Bob", 3).await.unwrap();

        assert!(fx.pipeline.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lower_floor_accepts_partial_set() {
        let fx = fixture(10, 8).await;
        enroll_photos(&fx, "Alice", 1, 10).await;
        let two = vec![
            face(SimulatedRecognizer::identity_features(5)),
            face(SimulatedRecognizer::identity_features(6)),
        ];
        fx.sim.script(photo("Alice", 2).as_bytes(), two);
        fx.sim.script(photo("Alice", 3).as_bytes(), vec![]);

        let outcome = fx.pipeline.finalize_enrollment("Alice", 10).await.unwrap();
        assert_eq!(outcome.valid_photos, 8);
    }

    #[tokio::test]
    async fn test_no_usable_photos() {
        let fx = fixture(3, 1).await;
        for slot in 1..=3 {
            let image = photo("Bob", slot);
            fx.sim.script(image.as_bytes(), vec![]);
            fx.pipeline.store_photo("Bob", &image, slot).await.unwrap();
        }
        let err = fx.pipeline.finalize_enrollment("Bob", 3).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::NoUsablePhotos));
        assert_eq!(fx.store.count_students().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_slot_fails() {
        let fx = fixture(3, 3).await;
        enroll_photos(&fx, "Alice", 1, 2).await;
        let err = fx.pipeline.finalize_enrollment("Alice", 3).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::MissingPhotos(ref slots) if slots == &[3]));
    }

    #[tokio::test]
    async fn test_photo_count_must_match() {
        let fx = fixture(10, 10).await;
        let err = fx.pipeline.finalize_enrollment("Alice", 5).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::PhotoCountMismatch { expected: 10, actual: 5 }));
    }

    #[tokio::test]
    async fn test_slot_bounds() {
        let fx = fixture(10, 10).await;
        let image = photo("Alice", 0);
        for slot in [0, 11] {
            let err = fx.pipeline.store_photo("Alice", &image, slot).await.unwrap_err();
            assert!(matches!(err, EnrollmentError::InvalidSlot { max: 10, .. }));
        }
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let fx = fixture(10, 10).await;
        let err = fx.pipeline.store_photo("../x", &photo("x", 1), 1).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::InvalidStudentName(_)));
    }

    #[tokio::test]
    async fn test_service_outage_is_surfaced() {
        let fx = fixture(2, 1).await;
        enroll_photos(&fx, "Alice", 1, 2).await;
        fx.sim.set_failing(true);

        let err = fx.pipeline.finalize_enrollment("Alice", 2).await.unwrap_err();
        assert!(matches!(err, EnrollmentError::Recognition(ref e) if e.is_unreachable()));
        assert_eq!(fx.store.count_students().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_slot_stores() {
        let fx = Arc::new(fixture(10, 10).await);
        let base = SimulatedRecognizer::identity_features(3);
        let mut tasks = Vec::new();
        for slot in 1..=10 {
            let fx = fx.clone();
            let image = photo("Carol", slot);
            fx.sim.script(image.as_bytes(), vec![face(base.clone())]);
            tasks.push(tokio::spawn(async move {
                fx.pipeline.store_photo("Carol", &image, slot).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        let outcome = fx.pipeline.finalize_enrollment("Carol", 10).await.unwrap();
        assert_eq!(outcome.valid_photos, 10);
    }
}
