//! HTTP interface for browser and CLI clients.

use crate::enrollment::{EnrollmentError, EnrollmentPipeline};
use crate::ledger::AttendanceLedger;
use crate::recognition::{RecognitionEngine, RecognizeError};
use crate::store::{Repository, StoreError};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use rollcall_core::api::{
    AttendanceRecord, DashboardStats, ErrorResponse, ExtractFeaturesRequest,
    ExtractFeaturesResponse, Health, ImageRequest, RecognizeGroupRequest, RecognizeGroupResponse,
    RecognizedStudent, StorePhotoRequest, StorePhotoResponse, StudentSummary,
};
use rollcall_core::{
    DetectionResult, EncodedImage, Period, RangeMargin, RecognitionError, Recognizer,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;

const DEFAULT_RECENT_LIMIT: u32 = 10;
const MAX_RECENT_LIMIT: u32 = 500;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub recognizer: Arc<dyn Recognizer>,
    pub repo: Arc<dyn Repository>,
    pub enrollment: Arc<EnrollmentPipeline>,
    pub engine: Arc<RecognitionEngine>,
    pub ledger: Arc<AttendanceLedger>,
    pub margin: RangeMargin,
    pub detect_timeout: Duration,
    /// Largest accepted request body, sized for base64 images.
    pub body_limit: usize,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.body_limit;
    Router::new()
        .route("/health", get(health))
        .route("/detect-face", post(detect_face))
        .route("/store-photo", post(store_photo))
        .route("/extract-features", post(extract_features))
        .route("/recognize-group", post(recognize_group))
        .route("/students", get(students))
        .route("/attendance", get(attendance))
        .route("/attendance/recent", get(recent_attendance))
        .route("/stats", get(stats))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler failure, rendered as `{ success: false, error }`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    TooLarge(String),
    Unprocessable(String),
    Unavailable(String),
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::TooLarge(m)
            | Self::Unprocessable(m)
            | Self::Unavailable(m)
            | Self::BadGateway(m)
            | Self::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = self.message(), "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = self.message(), "request rejected");
        }
        (status, Json(ErrorResponse::new(self.message()))).into_response()
    }
}

impl From<RecognitionError> for ApiError {
    fn from(e: RecognitionError) -> Self {
        match e {
            RecognitionError::InvalidImage(_) => Self::BadRequest(e.to_string()),
            RecognitionError::Unreachable(_) | RecognitionError::Timeout(_) => {
                Self::Unavailable(e.to_string())
            }
            RecognitionError::Status { .. } | RecognitionError::BadResponse(_) => {
                Self::BadGateway(e.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<EnrollmentError> for ApiError {
    fn from(e: EnrollmentError) -> Self {
        match e {
            EnrollmentError::InvalidStudentName(_)
            | EnrollmentError::InvalidSlot { .. }
            | EnrollmentError::PhotoCountMismatch { .. } => Self::BadRequest(e.to_string()),
            EnrollmentError::MissingPhotos(_)
            | EnrollmentError::NoUsablePhotos
            | EnrollmentError::Incomplete { .. } => {
                Self::Unprocessable(e.to_string())
            }
            EnrollmentError::Recognition(e) => e.into(),
            EnrollmentError::Storage(_) | EnrollmentError::Photo(_) => {
                Self::Internal(e.to_string())
            }
        }
    }
}

impl From<RecognizeError> for ApiError {
    fn from(e: RecognizeError) -> Self {
        match e {
            RecognizeError::Recognition(e) => e.into(),
            RecognizeError::Storage(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::TooLarge(e.body_text())
        } else {
            Self::BadRequest(e.body_text())
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

fn decode_image(data: &str) -> Result<EncodedImage, ApiError> {
    Ok(EncodedImage::from_data_url(data)?)
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy".to_string(),
        recognizer: state.recognizer.name().to_string(),
        timestamp: chrono::Local::now().to_rfc3339(),
    })
}

async fn detect_face(
    State(state): State<AppState>,
    payload: Result<Json<ImageRequest>, JsonRejection>,
) -> Result<Json<DetectionResult>, ApiError> {
    let Json(req) = payload?;
    let image = decode_image(&req.image)?;
    let result = tokio::time::timeout(state.detect_timeout, state.recognizer.detect(&image))
        .await
        .map_err(|_| RecognitionError::Timeout(state.detect_timeout.as_millis() as u64))??;
    Ok(Json(result.classified(state.margin)))
}

async fn store_photo(
    State(state): State<AppState>,
    payload: Result<Json<StorePhotoRequest>, JsonRejection>,
) -> Result<Json<StorePhotoResponse>, ApiError> {
    let Json(req) = payload?;
    let image = decode_image(&req.image_data)?;
    let path = state
        .enrollment
        .store_photo(&req.student_name, &image, req.photo_index)
        .await?;
    Ok(Json(StorePhotoResponse {
        success: true,
        file_path: Some(path.to_string_lossy().into_owned()),
        error: None,
    }))
}

async fn extract_features(
    State(state): State<AppState>,
    payload: Result<Json<ExtractFeaturesRequest>, JsonRejection>,
) -> Result<Json<ExtractFeaturesResponse>, ApiError> {
    let Json(req) = payload?;
    let outcome = state
        .enrollment
        .finalize_enrollment(&req.student_name, req.photo_count)
        .await?;
    Ok(Json(ExtractFeaturesResponse {
        success: true,
        valid_photos: Some(outcome.valid_photos),
        total_photos: Some(outcome.total_photos),
        error: None,
    }))
}

async fn recognize_group(
    State(state): State<AppState>,
    payload: Result<Json<RecognizeGroupRequest>, JsonRejection>,
) -> Result<Json<RecognizeGroupResponse>, ApiError> {
    let Json(req) = payload?;
    let period = Period::new(req.period).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let image = decode_image(&req.group_image)?;

    let group = state.engine.recognize_group(&image, &period).await?;
    let today = chrono::Local::now().date_naive();
    let outcome = state.ledger.record(&group.recognized, &period, today).await?;

    Ok(Json(RecognizeGroupResponse {
        success: true,
        recognized_students: group.recognized.iter().map(RecognizedStudent::from).collect(),
        faces_detected: group.faces_detected,
        attendance_count: Some(outcome.recorded as u32),
        period: Some(period.to_string()),
        error: None,
    }))
}

async fn students(State(state): State<AppState>) -> Result<Json<Vec<StudentSummary>>, ApiError> {
    Ok(Json(state.repo.list_students().await?))
}

#[derive(Debug, Deserialize)]
struct AttendanceQuery {
    date: Option<String>,
    period: Option<String>,
}

async fn attendance(
    State(state): State<AppState>,
    query: Result<Query<AttendanceQuery>, QueryRejection>,
) -> Result<Json<Vec<AttendanceRecord>>, ApiError> {
    let Query(q) = query?;
    let date = match q.date.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| {
                ApiError::BadRequest(format!("invalid date {raw:?}, expected YYYY-MM-DD"))
            })?,
        None => chrono::Local::now().date_naive(),
    };
    // a blank period means "all periods"
    let period = q.period.and_then(|p| Period::new(p).ok());
    Ok(Json(state.ledger.attendance_on(date, period).await?))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<u32>,
}

async fn recent_attendance(
    State(state): State<AppState>,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<Json<Vec<AttendanceRecord>>, ApiError> {
    let Query(q) = query?;
    let limit = q.limit.unwrap_or(DEFAULT_RECENT_LIMIT).min(MAX_RECENT_LIMIT);
    Ok(Json(state.ledger.recent(limit).await?))
}

async fn stats(State(state): State<AppState>) -> Result<Json<DashboardStats>, ApiError> {
    Ok(Json(state.ledger.stats(chrono::Local::now().naive_local()).await?))
}
