//! Nearest-signature matching for faces found in a group photo.

use crate::recognizer::FaceDescriptor;
use crate::types::{FeatureVector, RecognizedFace, Signature};
use std::collections::HashSet;

/// Distances closer than this are treated as equal.
const TIE_EPSILON: f32 = 1e-6;

/// Acceptance threshold and confidence floor for a match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    /// Maximum Euclidean distance (exclusive) for an accepted match.
    pub threshold: f32,
    /// Lowest confidence reported for an accepted match.
    pub min_confidence: f32,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            min_confidence: 0.85,
        }
    }
}

impl MatchPolicy {
    /// Confidence for an accepted distance, clamped to `[min_confidence, 1]`.
    pub fn confidence(&self, distance: f32) -> f32 {
        (1.0 - distance / self.threshold).clamp(self.min_confidence, 1.0)
    }
}

/// Result of matching one probe against the enrolled signatures.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the nearest signature (`f32::INFINITY` for an empty gallery).
    pub distance: f32,
    pub student_id: Option<i64>,
    pub student_name: Option<String>,
    pub confidence: f32,
}

impl MatchResult {
    fn none(distance: f32) -> Self {
        Self {
            matched: false,
            distance,
            student_id: None,
            student_name: None,
            confidence: 0.0,
        }
    }
}

/// Strategy for comparing a probe against the enrolled signatures.
pub trait Matcher {
    fn compare(
        &self,
        probe: &FeatureVector,
        gallery: &[Signature],
        policy: &MatchPolicy,
    ) -> MatchResult;
}

/// Minimum Euclidean distance matcher.
///
/// Ties resolve to the lowest student id, i.e. the earliest registration,
/// independent of gallery order.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        probe: &FeatureVector,
        gallery: &[Signature],
        policy: &MatchPolicy,
    ) -> MatchResult {
        let mut best: Option<(f32, &Signature)> = None;

        for sig in gallery {
            let distance = probe.euclidean_distance(&sig.features);
            let better = match best {
                None => true,
                Some((best_d, best_sig)) => {
                    distance < best_d - TIE_EPSILON
                        || ((distance - best_d).abs() <= TIE_EPSILON
                                && sig.student_id < best_sig.student_id)
                }
            };
            if better {
                best = Some((distance, sig));
            }
        }

        match best {
            Some((distance, sig)) if distance < policy.threshold => MatchResult {
                matched: true,
                distance,
                student_id: Some(sig.student_id),
                student_name: Some(sig.student_name.clone()),
                confidence: policy.confidence(distance),
            },
            Some((distance, _)) => MatchResult::none(distance),
            None => MatchResult::none(f32::INFINITY),
        }
    }
}

/// Match every detected face independently and keep the accepted ones.
///
/// A student is reported at most once: the first region (in detection order)
/// that matches them wins and later regions matching the same student are
/// dropped.
pub fn match_faces<M: Matcher>(
    matcher: &M,
    faces: &[FaceDescriptor],
    gallery: &[Signature],
    policy: &MatchPolicy,
) -> Vec<RecognizedFace> {
    let mut seen = HashSet::new();
    let mut recognized = Vec::new();

    for (region, face) in faces.iter().enumerate() {
        let result = matcher.compare(&face.features, gallery, policy);
        let (Some(student_id), Some(student_name)) = (result.student_id, result.student_name) else {
            tracing::debug!(region, distance = result.distance, "face did not match any signature");
            continue;
        };

        if !seen.insert(student_id) {
            tracing::debug!(
                region,
                student = %student_name,
                distance = result.distance,
                "dropping duplicate match; earlier region already matched this student"
            );
            continue;
        }

        tracing::info!(
            student = %student_name,
            distance = result.distance,
            confidence = result.confidence,
            "recognized student"
        );
        recognized.push(RecognizedFace {
            bounding_box: face.bounding_box,
            student_id,
            student_name,
            distance: result.distance,
            confidence: result.confidence,
        });
    }

    recognized
}
