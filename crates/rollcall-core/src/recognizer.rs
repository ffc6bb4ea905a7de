//! Recognition service contract.
//!
//! The detector and embedder live behind this trait; the pipeline only
//! depends on the three operations below. Two strategies ship with the
//! crate: [`RemoteRecognizer`](crate::remote::RemoteRecognizer) talks to an
//! HTTP service, [`SimulatedRecognizer`](crate::simulated::SimulatedRecognizer)
//! answers deterministically for development and tests.

use crate::detection::DetectionResult;
use crate::types::{BoundingBox, FeatureVector};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("recognition service unreachable: {0}")]
    Unreachable(String),
    #[error("recognition service timed out after {0} ms")]
    Timeout(u64),
    #[error("recognition service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed response from recognition service: {0}")]
    BadResponse(String),
    #[error("invalid image data: {0}")]
    InvalidImage(String),
}

impl RecognitionError {
    /// Whether the failure means the service could not be reached at all
    /// (as opposed to rejecting the request).
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }
}

/// Encoded image bytes (JPEG or PNG) as sent to the recognition service.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage(Vec<u8>);

impl EncodedImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `data:image/jpeg;base64,...` form used on the wire.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), STANDARD.encode(&self.0))
    }

    /// Decode either a data URL or a bare base64 string.
    pub fn from_data_url(s: &str) -> Result<Self, RecognitionError> {
        let payload = match s.split_once(',') {
            Some((header, rest)) if header.starts_with("data:") => rest,
            _ => s,
        };
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| RecognitionError::InvalidImage(format!("base64: {e}")))?;
        if bytes.is_empty() {
            return Err(RecognitionError::InvalidImage("empty image".into()));
        }
        Ok(Self(bytes))
    }

    fn mime_type(&self) -> &'static str {
        if self.0.starts_with(&[0x89, b'P', b'N', b'G']) {
            "image/png"
        } else {
            "image/jpeg"
        }
    }
}

impl std::fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncodedImage({} bytes)", self.0.len())
    }
}

/// Outcome of extracting a single face from an enrollment photo.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Face {
        features: FeatureVector,
        bounding_box: BoundingBox,
    },
    NoFace,
    MultipleFaces(usize),
}

/// One face in a group photo, with its feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceDescriptor {
    pub bounding_box: BoundingBox,
    pub features: FeatureVector,
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Short label for logs and the health endpoint.
    fn name(&self) -> &'static str;

    /// Cheap preview detection.
    async fn detect(&self, image: &EncodedImage) -> Result<DetectionResult, RecognitionError>;

    /// Every face in `image` with its feature vector, in detection order.
    async fn describe_faces(
        &self,
        image: &EncodedImage,
    ) -> Result<Vec<FaceDescriptor>, RecognitionError>;

    /// Extract the single face of an enrollment photo.
    async fn extract_features(&self, image: &EncodedImage) -> Result<Extraction, RecognitionError> {
        let mut faces = self.describe_faces(image).await?;
        Ok(match faces.len() {
            0 => Extraction::NoFace,
            1 => {
                let face = faces.remove(0);
                Extraction::Face {
                    features: face.features,
                    bounding_box: face.bounding_box,
                }
            }
            n => Extraction::MultipleFaces(n),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_roundtrip() {
        let img = EncodedImage::new(vec![0xFF, 0xD8, 0xFF, 0x00, 0x01]);
        let url = img.to_data_url();
        assert!(url.starts_with("data:image/jpeg;base64,"));
        assert_eq!(EncodedImage::from_data_url(&url).unwrap(), img);
    }

    #[test]
    fn test_bare_base64_accepted() {
        let decoded = EncodedImage::from_data_url("aGVsbG8=").unwrap();
        assert_eq!(decoded.as_bytes(), b"hello");
    }

    #[test]
    fn test_png_mime_detected() {
        let img = EncodedImage::new(vec![0x89, b'P', b'N', b'G', 0x0D]);
        assert!(img.to_data_url().starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_invalid_base64_rejected() {
        assert!(matches!(
            EncodedImage::from_data_url("data:image/jpeg;base64,@@@"),
            Err(RecognitionError::InvalidImage(_))
        ));
        assert!(EncodedImage::from_data_url("").is_err());
    }

    #[test]
    fn test_unreachable_classification() {
        assert!(RecognitionError::Timeout(500).is_unreachable());
        assert!(RecognitionError::Unreachable("refused".into()).is_unreachable());
        assert!(!RecognitionError::Status { status: 500, message: String::new() }.is_unreachable());
    }
}
