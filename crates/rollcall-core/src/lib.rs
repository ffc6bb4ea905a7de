//! rollcall-core: face signatures, matching, and the recognition service
//! contract used by the attendance pipeline.
//!
//! The detector and embedder are external; this crate only defines what is
//! asked of them ([`Recognizer`]) and what is done with the answers.

pub mod api;
pub mod detection;
pub mod matcher;
pub mod period;
pub mod recognizer;
pub mod remote;
pub mod simulated;
pub mod types;

pub use detection::{DetectionResult, DetectionState, RangeMargin};
pub use matcher::{match_faces, EuclideanMatcher, MatchPolicy, MatchResult, Matcher};
pub use period::Period;
pub use recognizer::{EncodedImage, Extraction, FaceDescriptor, RecognitionError, Recognizer};
pub use remote::RemoteRecognizer;
pub use simulated::SimulatedRecognizer;
pub use types::{BoundingBox, FeatureVector, RecognizedFace, Signature, FEATURE_DIM};
