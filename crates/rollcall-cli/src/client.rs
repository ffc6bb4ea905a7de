//! Thin HTTP client for the rollcalld API.

use anyhow::{anyhow, bail, Context, Result};
use rollcall_core::api::{
    AttendanceRecord, DashboardStats, ErrorResponse, ExtractFeaturesRequest,
    ExtractFeaturesResponse, Health, RecognizeGroupRequest, RecognizeGroupResponse,
    StorePhotoRequest, StorePhotoResponse,
};
use rollcall_core::EncodedImage;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

pub struct DaemonClient {
    http: reqwest::Client,
    base_url: String,
}

impl DaemonClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .with_context(|| format!("failed to read response from {path}"))?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            bail!("{path} failed ({status}): {message}");
        }
        serde_json::from_slice(&body).with_context(|| format!("unexpected response from {path}"))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .query(query)
            .send()
            .await
            .map_err(|e| anyhow!("cannot reach rollcalld at {}: {e}", self.base_url))?;
        self.decode(path, response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| anyhow!("cannot reach rollcalld at {}: {e}", self.base_url))?;
        self.decode(path, response).await
    }

    pub async fn health(&self) -> Result<Health> {
        self.get("/health", &[]).await
    }

    pub async fn stats(&self) -> Result<DashboardStats> {
        self.get("/stats", &[]).await
    }

    pub async fn store_photo(
        &self,
        student: &str,
        image: &EncodedImage,
        slot: u32,
    ) -> Result<StorePhotoResponse> {
        let req = StorePhotoRequest {
            student_name: student.to_string(),
            image_data: image.to_data_url(),
            photo_index: slot,
        };
        self.post("/store-photo", &req).await
    }

    pub async fn extract_features(
        &self,
        student: &str,
        photo_count: u32,
    ) -> Result<ExtractFeaturesResponse> {
        let req = ExtractFeaturesRequest {
            student_name: student.to_string(),
            photo_count,
        };
        self.post("/extract-features", &req).await
    }

    pub async fn recognize_group(
        &self,
        image: &EncodedImage,
        period: &str,
    ) -> Result<RecognizeGroupResponse> {
        let req = RecognizeGroupRequest {
            group_image: image.to_data_url(),
            period: period.to_string(),
        };
        self.post("/recognize-group", &req).await
    }

    pub async fn attendance(
        &self,
        date: Option<&str>,
        period: Option<&str>,
    ) -> Result<Vec<AttendanceRecord>> {
        let mut query = Vec::new();
        if let Some(date) = date {
            query.push(("date", date.to_string()));
        }
        if let Some(period) = period {
            query.push(("period", period.to_string()));
        }
        self.get("/attendance", &query).await
    }

    pub async fn recent(&self, limit: u32) -> Result<Vec<AttendanceRecord>> {
        self.get("/attendance/recent", &[("limit", limit.to_string())]).await
    }
}
