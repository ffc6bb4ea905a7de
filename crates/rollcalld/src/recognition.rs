use crate::store::{Repository, StoreError};
use rollcall_core::{
    match_faces, EncodedImage, EuclideanMatcher, MatchPolicy, Period, RecognitionError,
    RecognizedFace, Recognizer,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error("recognition service error: {0}")]
    Recognition(#[from] RecognitionError),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Faces found in one group photo and the students they matched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupRecognition {
    /// `None` when the photo was never sent to the service.
    pub faces_detected: Option<u32>,
    pub recognized: Vec<RecognizedFace>,
}

/// Matches group photos against every enrolled signature.
pub struct RecognitionEngine {
    recognizer: Arc<dyn Recognizer>,
    repo: Arc<dyn Repository>,
    matcher: EuclideanMatcher,
    policy: MatchPolicy,
    timeout: Duration,
}

impl RecognitionEngine {
    pub fn new(
        recognizer: Arc<dyn Recognizer>,
        repo: Arc<dyn Repository>,
        policy: MatchPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            recognizer,
            repo,
            matcher: EuclideanMatcher,
            policy,
            timeout,
        }
    }

    pub async fn recognize_group(
        &self,
        image: &EncodedImage,
        period: &Period,
    ) -> Result<GroupRecognition, RecognizeError> {
        let gallery = self.repo.find_signatures().await?;
        if gallery.is_empty() {
            tracing::info!(%period, "no enrolled students; skipping recognition");
            return Ok(GroupRecognition::default());
        }

        let faces = tokio::time::timeout(self.timeout, self.recognizer.describe_faces(image))
            .await
            .map_err(|_| RecognitionError::Timeout(self.timeout.as_millis() as u64))??;

        let recognized = match_faces(&self.matcher, &faces, &gallery, &self.policy);
        tracing::info!(
            %period,
            faces = faces.len(),
            enrolled = gallery.len(),
            recognized = recognized.len(),
            "group recognition complete"
        );
        Ok(GroupRecognition {
            faces_detected: Some(faces.len() as u32),
            recognized,
        })
    }
}
