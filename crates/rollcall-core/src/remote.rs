//! HTTP client for a remote recognition service.

use crate::api::{FaceDescriptorsResponse, ImageRequest};
use crate::detection::DetectionResult;
use crate::recognizer::{EncodedImage, FaceDescriptor, RecognitionError, Recognizer};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Recognizer backed by `POST {base}/detect-face` and
/// `POST {base}/face-descriptors`.
pub struct RemoteRecognizer {
    client: reqwest::Client,
    base_url: String,
    detect_timeout: Duration,
    extract_timeout: Duration,
}

impl RemoteRecognizer {
    pub fn new(
        base_url: impl Into<String>,
        detect_timeout: Duration,
        extract_timeout: Duration,
    ) -> Result<Self, RecognitionError> {
        let client = reqwest::Client::builder()
            .connect_timeout(detect_timeout.max(Duration::from_secs(2)))
            .build()
            .map_err(|e| RecognitionError::Unreachable(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            detect_timeout,
            extract_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        image: &EncodedImage,
        timeout: Duration,
    ) -> Result<T, RecognitionError> {
        let url = format!("{}{}", self.base_url, path);
        let body = ImageRequest {
            image: image.to_data_url(),
        };

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify(e, timeout))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| classify(e, timeout))?;

        if !status.is_success() {
            return Err(RecognitionError::Status {
                status: status.as_u16(),
                message: text.chars().take(200).collect(),
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| RecognitionError::BadResponse(format!("{path}: {e}")))
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> RecognitionError {
    if err.is_timeout() {
        RecognitionError::Timeout(timeout.as_millis() as u64)
    } else {
        RecognitionError::Unreachable(err.to_string())
    }
}

#[async_trait]
impl Recognizer for RemoteRecognizer {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn detect(&self, image: &EncodedImage) -> Result<DetectionResult, RecognitionError> {
        self.post("/detect-face", image, self.detect_timeout).await
    }

    async fn describe_faces(
        &self,
        image: &EncodedImage,
    ) -> Result<Vec<FaceDescriptor>, RecognitionError> {
        let resp: FaceDescriptorsResponse = self
            .post("/face-descriptors", image, self.extract_timeout)
            .await?;
        tracing::debug!(faces = resp.faces.len(), url = %self.base_url, "remote face descriptors");
        Ok(resp.faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::Extraction;
    use crate::types::FEATURE_DIM;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn recognizer(url: &str) -> RemoteRecognizer {
        RemoteRecognizer::new(url, Duration::from_millis(300), Duration::from_secs(2)).unwrap()
    }

    fn image() -> EncodedImage {
        EncodedImage::new(vec![0xFF, 0xD8, 0xFF, 0xE0])
    }

    #[tokio::test]
    async fn test_detect_parses_service_response() {
        let url = serve(Router::new().route(
            "/detect-face",
            post(|Json(body): Json<Value>| async move {
                assert!(body["image"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
                Json(json!({
                    "faceDetected": true,
                    "faceCount": 1,
                    "boundingBox": {"x": 20.0, "y": 20.0, "width": 30.0, "height": 30.0},
                    "outOfRange": false
                }))
            }),
        ))
        .await;

        let result = recognizer(&url).detect(&image()).await.unwrap();
        assert!(result.face_detected);
        assert_eq!(result.face_count, 1);
        assert_eq!(result.bounding_box.unwrap().width, 30.0);
    }

    #[tokio::test]
    async fn test_extract_reports_multiple_faces() {
        let url = serve(Router::new().route(
            "/face-descriptors",
            post(|| async {
                let features = vec![0.0f32; FEATURE_DIM];
                let face = json!({
                    "boundingBox": {"x": 10.0, "y": 10.0, "width": 10.0, "height": 10.0},
                    "features": features,
                });
                Json(json!({ "faces": [face.clone(), face] }))
            }),
        ))
        .await;

        let result = recognizer(&url).extract_features(&image()).await.unwrap();
        assert_eq!(result, Extraction::MultipleFaces(2));
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let url = serve(Router::new().route(
            "/detect-face",
            post(|| async {
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "detector not loaded",
                )
            }),
        ))
        .await;

        let err = recognizer(&url).detect(&image()).await.unwrap_err();
        assert!(matches!(err, RecognitionError::Status { status: 500, .. }), "{err}");
    }

    #[tokio::test]
    async fn test_wrong_feature_length_is_bad_response() {
        let url = serve(Router::new().route(
            "/face-descriptors",
            post(|| async {
                Json(json!({ "faces": [{
                    "boundingBox": {"x": 10.0, "y": 10.0, "width": 10.0, "height": 10.0},
                    "features": [0.1, 0.2],
                }]}))
            }),
        ))
        .await;

        let err = recognizer(&url).describe_faces(&image()).await.unwrap_err();
        assert!(matches!(err, RecognitionError::BadResponse(_)), "{err}");
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let url = serve(Router::new().route(
            "/detect-face",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({ "faceDetected": false, "faceCount": 0 }))
            }),
        ))
        .await;

        let err = recognizer(&url).detect(&image()).await.unwrap_err();
        assert!(matches!(err, RecognitionError::Timeout(300)), "{err}");
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = recognizer(&format!("http://{addr}")).detect(&image()).await.unwrap_err();
        assert!(err.is_unreachable(), "{err}");
    }
}
