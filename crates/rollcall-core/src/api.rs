//! JSON wire types shared by the daemon, the CLI, and the remote recognizer.

use crate::recognizer::FaceDescriptor;
use crate::types::{BoundingBox, RecognizedFace};
use serde::{Deserialize, Serialize};

/// Body of `POST /detect-face` and `POST /face-descriptors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    /// Data URL or bare base64.
    pub image: String,
}

/// Response of the recognition service's `POST /face-descriptors`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaceDescriptorsResponse {
    pub faces: Vec<FaceDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePhotoRequest {
    pub student_name: String,
    pub image_data: String,
    pub photo_index: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePhotoResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractFeaturesRequest {
    pub student_name: String,
    pub photo_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractFeaturesResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_photos: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_photos: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizeGroupRequest {
    pub group_image: String,
    pub period: String,
}

/// One recognized student as reported to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedStudent {
    pub name: String,
    pub confidence: f32,
    pub position: BoundingBox,
}

impl From<&RecognizedFace> for RecognizedStudent {
    fn from(face: &RecognizedFace) -> Self {
        Self {
            name: face.student_name.clone(),
            confidence: face.confidence,
            position: face.bounding_box,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizeGroupResponse {
    pub success: bool,
    #[serde(default)]
    pub recognized_students: Vec<RecognizedStudent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faces_detected: Option<u32>,
    /// Net-new attendance rows written by this call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Generic failure body for non-2xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: i64,
    pub name: String,
    pub folder_path: String,
    pub photo_count: u32,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_name: String,
    /// `YYYY-MM-DD`.
    pub date: String,
    pub period: String,
    /// `HH:MM:SS` wall-clock capture time.
    pub time: String,
    pub confidence: f32,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_students: u64,
    pub today_attendance: u64,
    /// Percent of the roster present today, rounded.
    pub attendance_rate: u32,
    pub current_period: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub recognizer: String,
    pub timestamp: String,
}
