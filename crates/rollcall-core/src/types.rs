use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of every feature vector produced by the recognition service.
pub const FEATURE_DIM: usize = 128;

/// Bounding box of a detected face, in percent of the frame (0–100).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    /// Convert a pixel-space box into frame percentages.
    pub fn from_pixels(
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        frame_w: u32,
        frame_h: u32,
    ) -> Self {
        let fw = frame_w.max(1) as f32;
        let fh = frame_h.max(1) as f32;
        Self {
            x: x / fw * 100.0,
            y: y / fh * 100.0,
            width: width / fw * 100.0,
            height: height / fh * 100.0,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum FeatureError {
    #[error("expected 128-dim feature vector, got {0} values")]
    WrongDimension(usize),
    #[error("feature vector contains non-finite values")]
    NonFinite,
}

/// Face feature vector (128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Result<Self, FeatureError> {
        if values.len() != FEATURE_DIM {
            return Err(FeatureError::WrongDimension(values.len()));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FeatureError::NonFinite);
        }
        Ok(Self { values })
    }

    /// Callers guarantee `FEATURE_DIM` finite values.
    pub(crate) fn from_generated(values: Vec<f32>) -> Self {
        debug_assert!(values.len() == FEATURE_DIM && values.iter().all(|v| v.is_finite()));
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Euclidean distance between two feature vectors.
    pub fn euclidean_distance(&self, other: &FeatureVector) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Element-wise mean of a set of vectors. `None` for an empty set.
    pub fn mean(vectors: &[FeatureVector]) -> Option<FeatureVector> {
        if vectors.is_empty() {
            return None;
        }
        // Accumulate in f64 so ten photos average without drift.
        let mut sums = vec![0.0f64; FEATURE_DIM];
        for v in vectors {
            for (acc, x) in sums.iter_mut().zip(v.values.iter()) {
                *acc += f64::from(*x);
            }
        }
        let n = vectors.len() as f64;
        Some(FeatureVector {
            values: sums.into_iter().map(|s| (s / n) as f32).collect(),
        })
    }

    /// Little-endian byte encoding used for storage.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, FeatureError> {
        if bytes.len() % 4 != 0 {
            return Err(FeatureError::WrongDimension(bytes.len() / 4));
        }
        let values = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Self::new(values)
    }
}

impl TryFrom<Vec<f32>> for FeatureVector {
    type Error = FeatureError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<FeatureVector> for Vec<f32> {
    fn from(v: FeatureVector) -> Self {
        v.values
    }
}

/// An enrolled student's stored signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub student_id: i64,
    pub student_name: String,
    pub features: FeatureVector,
}

/// A face in a group photo that matched an enrolled student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedFace {
    pub bounding_box: BoundingBox,
    pub student_id: i64,
    pub student_name: String,
    pub distance: f32,
    /// Match confidence in [0, 1].
    pub confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(v: f32) -> FeatureVector {
        FeatureVector::new(vec![v; FEATURE_DIM]).unwrap()
    }

    #[test]
    fn test_rejects_wrong_dimension() {
        assert_eq!(
            FeatureVector::new(vec![0.0; 3]),
            Err(FeatureError::WrongDimension(3))
        );
    }

    #[test]
    fn test_rejects_nan() {
        let mut values = vec![0.0; FEATURE_DIM];
        values[7] = f32::NAN;
        assert_eq!(FeatureVector::new(values), Err(FeatureError::NonFinite));
    }

    #[test]
    fn test_euclidean_distance() {
        let a = filled(0.0);
        let mut values = vec![0.0; FEATURE_DIM];
        values[0] = 3.0;
        values[1] = 4.0;
        let b = FeatureVector::new(values).unwrap();
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_mean_of_vectors() {
        let mean = FeatureVector::mean(&[filled(1.0), filled(2.0), filled(6.0)]).unwrap();
        assert!(mean.values().iter().all(|v| (v - 3.0).abs() < 1e-6));
    }

    #[test]
    fn test_mean_of_nothing() {
        assert!(FeatureVector::mean(&[]).is_none());
    }

    #[test]
    fn test_le_bytes_rejects_truncated_blob() {
        let bytes = filled(0.5).to_le_bytes();
        assert!(FeatureVector::from_le_bytes(&bytes[..bytes.len() - 4]).is_err());
        assert!(FeatureVector::from_le_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert_eq!(FeatureVector::from_le_bytes(&bytes).unwrap(), filled(0.5));
    }

    #[test]
    fn test_deserialize_validates_length() {
        let err = serde_json::from_str::<FeatureVector>("[1.0, 2.0]");
        assert!(err.is_err());
    }

    #[test]
    fn test_bounding_box_from_pixels() {
        let b = BoundingBox::from_pixels(64.0, 36.0, 320.0, 180.0, 640, 360);
        assert!((b.x - 10.0).abs() < 1e-4);
        assert!((b.y - 10.0).abs() < 1e-4);
        assert!((b.width - 50.0).abs() < 1e-4);
        assert!((b.right() - 60.0).abs() < 1e-4);
    }
}
