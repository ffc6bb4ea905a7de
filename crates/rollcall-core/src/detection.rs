//! Preview detection results and the out-of-range policy.

use crate::types::BoundingBox;
use serde::{Deserialize, Serialize};

/// Default safe margin from each frame edge, in percent.
pub const DEFAULT_MARGIN_PCT: f32 = 15.0;

/// Result of one preview detection call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub face_detected: bool,
    pub face_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box: Option<BoundingBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_of_range: Option<bool>,
}

/// Three-valued presence state derived from a [`DetectionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionState {
    NoFace,
    /// A face was found but sits too close to a frame edge.
    Looking,
    Ready,
}

impl DetectionResult {
    /// The neutral "no face" result used on reset and on failure.
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Re-derive `out_of_range` for the first face using `margin`.
    pub fn classified(mut self, margin: RangeMargin) -> Self {
        self.out_of_range = match (self.face_detected, &self.bounding_box) {
            (true, Some(b)) => Some(margin.is_out_of_range(b)),
            (true, None) => self.out_of_range,
            (false, _) => None,
        };
        self
    }

    pub fn state(&self) -> DetectionState {
        if !self.face_detected || self.face_count == 0 {
            DetectionState::NoFace
        } else if self.out_of_range.unwrap_or(false) {
            DetectionState::Looking
        } else {
            DetectionState::Ready
        }
    }

    /// `faceDetected && !outOfRange`: the only condition under which a
    /// capture should be taken.
    pub fn is_ready_to_capture(&self) -> bool {
        self.state() == DetectionState::Ready
    }
}

/// Safe band, in percent of the frame, that a face box must stay inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeMargin(f32);

impl RangeMargin {
    /// Margins are clamped to `[0, 50)`; anything wider leaves no safe area.
    pub fn new(pct: f32) -> Self {
        Self(pct.clamp(0.0, 49.9))
    }

    pub fn pct(&self) -> f32 {
        self.0
    }

    pub fn is_out_of_range(&self, b: &BoundingBox) -> bool {
        let m = self.0;
        b.x < m || b.y < m || b.right() > 100.0 - m || b.bottom() > 100.0 - m
    }
}

impl Default for RangeMargin {
    fn default() -> Self {
        Self(DEFAULT_MARGIN_PCT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected(b: BoundingBox) -> DetectionResult {
        DetectionResult {
            face_detected: true,
            face_count: 1,
            bounding_box: Some(b),
            out_of_range: None,
        }
    }

    #[test]
    fn test_box_touching_corner_is_out_of_range() {
        let margin = RangeMargin::default();
        assert!(margin.is_out_of_range(&BoundingBox::new(5.0, 5.0, 50.0, 50.0)));
    }

    #[test]
    fn test_centered_box_is_in_range() {
        let margin = RangeMargin::default();
        assert!(!margin.is_out_of_range(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)));
    }

    #[test]
    fn test_box_breaching_far_edge() {
        let margin = RangeMargin::default();
        // right edge at 86 > 85
        assert!(margin.is_out_of_range(&BoundingBox::new(40.0, 40.0, 46.0, 10.0)));
        // exactly on the band is still in range
        assert!(!margin.is_out_of_range(&BoundingBox::new(15.0, 15.0, 70.0, 70.0)));
    }

    #[test]
    fn test_classified_states() {
        let margin = RangeMargin::default();

        let edge = detected(BoundingBox::new(5.0, 5.0, 50.0, 50.0)).classified(margin);
        assert_eq!(edge.out_of_range, Some(true));
        assert!(edge.face_detected);
        assert_eq!(edge.state(), DetectionState::Looking);
        assert!(!edge.is_ready_to_capture());

        let centered = detected(BoundingBox::new(20.0, 20.0, 30.0, 30.0)).classified(margin);
        assert_eq!(centered.out_of_range, Some(false));
        assert_eq!(centered.state(), DetectionState::Ready);
        assert!(centered.is_ready_to_capture());
    }

    #[test]
    fn test_classification_overrides_remote_flag() {
        let mut remote = detected(BoundingBox::new(12.0, 12.0, 30.0, 30.0));
        // a service using a 10% margin called this in range
        remote.out_of_range = Some(false);
        assert_eq!(remote.classified(RangeMargin::new(15.0)).out_of_range, Some(true));
    }

    #[test]
    fn test_neutral_is_not_ready() {
        let neutral = DetectionResult::neutral();
        assert_eq!(neutral.state(), DetectionState::NoFace);
        assert_eq!(neutral.face_count, 0);
        assert!(!neutral.is_ready_to_capture());
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(
            detected(BoundingBox::new(20.0, 20.0, 30.0, 30.0)).classified(RangeMargin::default()),
        )
        .unwrap();
        assert_eq!(json["faceDetected"], true);
        assert_eq!(json["faceCount"], 1);
        assert_eq!(json["outOfRange"], false);
        assert_eq!(json["boundingBox"]["width"], 30.0);

        let neutral = serde_json::to_value(DetectionResult::neutral()).unwrap();
        assert!(neutral.get("boundingBox").is_none());
    }
}
