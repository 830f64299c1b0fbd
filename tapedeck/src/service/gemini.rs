//! Gemini-backed analysis service
//!
//! Upload flow per the Files API: raw upload, then poll the file resource
//! until it leaves the PROCESSING state. Generation goes through
//! `models/{model}:generateContent` with the uploaded media reference and
//! the instruction payload; the deep tier additionally requests low media
//! resolution so long footage fits a single call.

use super::{AnalysisService, ServiceError, UploadHandle};
use crate::tiers::Tier;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const UPLOAD_POLL_INTERVAL: Duration = Duration::from_secs(5);
const UPLOAD_POLL_LIMIT: u32 = 120;
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);
const GENERATE_TIMEOUT: Duration = Duration::from_secs(1800);
const POLL_TIMEOUT: Duration = Duration::from_secs(30);

/// Gemini Files + generateContent client
pub struct GeminiService {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiService {
    pub fn new(api_key: String) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        Ok(GeminiService {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
        })
    }

    /// Override the endpoint (tests, regional endpoints)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn poll_upload_state(&self, name: &str) -> Result<String, ServiceError> {
        let url = format!("{}/v1beta/{}?key={}", self.base_url, name, self.api_key);
        let response = self
            .http
            .get(&url)
            .timeout(POLL_TIMEOUT)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        let value = Self::check_response(response).await?;
        Ok(value
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or("STATE_UNSPECIFIED")
            .to_string())
    }

    /// Map HTTP status to the error taxonomy, or return the parsed body
    async fn check_response(response: reqwest::Response) -> Result<Value, ServiceError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ServiceError::MalformedResponse(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, &body))
    }
}

fn classify_status(status: StatusCode, body: &str) -> ServiceError {
    match status.as_u16() {
        429 => ServiceError::RateLimited,
        401 => ServiceError::AuthFailed(body.to_string()),
        403 => {
            if body.contains("RESOURCE_EXHAUSTED") || body.contains("quota") {
                ServiceError::QuotaExhausted(body.to_string())
            } else {
                ServiceError::AuthFailed(body.to_string())
            }
        }
        400 | 404 => ServiceError::InvalidRequest(format!("{}: {}", status, body)),
        500..=599 => ServiceError::Transient(format!("{}: {}", status, body)),
        _ => ServiceError::InvalidRequest(format!("{}: {}", status, body)),
    }
}

impl AnalysisService for GeminiService {
    async fn upload(&self, media: &Path) -> Result<UploadHandle, ServiceError> {
        let bytes = tokio::fs::read(media)
            .await
            .map_err(|e| ServiceError::Media(format!("{}: {}", media.display(), e)))?;

        info!(
            file = %media.display(),
            size_mb = bytes.len() / 1_000_000,
            "Uploading media to analysis service"
        );

        let url = format!(
            "{}/upload/v1beta/files?key={}",
            self.base_url, self.api_key
        );
        let response = self
            .http
            .post(&url)
            .header("X-Goog-Upload-Protocol", "raw")
            .header("Content-Type", "video/mp4")
            .timeout(UPLOAD_TIMEOUT)
            .body(bytes)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let value = Self::check_response(response).await?;
        let file = value.get("file").unwrap_or(&value);
        let name = file
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::MalformedResponse("upload reply missing name".into()))?
            .to_string();
        let uri = file
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::MalformedResponse("upload reply missing uri".into()))?
            .to_string();

        // Remote processing must finish before the file is usable
        let mut state = file
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or("PROCESSING")
            .to_string();
        let mut polls = 0;
        while state == "PROCESSING" {
            polls += 1;
            if polls > UPLOAD_POLL_LIMIT {
                return Err(ServiceError::UploadProcessing(format!(
                    "{} still processing after {} polls",
                    name, polls
                )));
            }
            debug!(upload = %name, "Waiting for remote media processing");
            tokio::time::sleep(UPLOAD_POLL_INTERVAL).await;
            state = self.poll_upload_state(&name).await?;
        }

        if state == "FAILED" {
            return Err(ServiceError::UploadProcessing(format!(
                "Remote processing failed for {}",
                name
            )));
        }

        debug!(upload = %name, uri = %uri, "Upload ready");
        Ok(UploadHandle { name, uri })
    }

    async fn generate(
        &self,
        upload: &UploadHandle,
        tier: &Tier,
        instructions: &str,
    ) -> Result<String, ServiceError> {
        let mut body = json!({
            "contents": [{
                "parts": [
                    { "file_data": { "file_uri": upload.uri, "mime_type": "video/mp4" } },
                    { "text": instructions },
                ]
            }]
        });
        if tier.low_resolution {
            body["generationConfig"] = json!({ "mediaResolution": "MEDIA_RESOLUTION_LOW" });
        }

        self.call_generate(&tier.model, body).await
    }

    async fn generate_text(
        &self,
        tier: &Tier,
        instructions: &str,
        context: &str,
    ) -> Result<String, ServiceError> {
        let body = json!({
            "contents": [{
                "parts": [
                    { "text": instructions },
                    { "text": context },
                ]
            }]
        });
        self.call_generate(&tier.model, body).await
    }

    async fn delete_upload(&self, upload: UploadHandle) -> Result<(), ServiceError> {
        let url = format!(
            "{}/v1beta/{}?key={}",
            self.base_url, upload.name, self.api_key
        );
        let response = self
            .http
            .delete(&url)
            .timeout(POLL_TIMEOUT)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        debug!(upload = %upload.name, "Remote media released");
        Ok(())
    }
}

impl GeminiService {
    async fn call_generate(&self, model: &str, body: Value) -> Result<String, ServiceError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        debug!(model = model, "Dispatching generation request");
        let response = self
            .http
            .post(&url)
            .json(&body)
            .timeout(GENERATE_TIMEOUT)
            .send()
            .await
            .map_err(|e| ServiceError::Network(e.to_string()))?;

        let value = Self::check_response(response).await?;
        let parts = value
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ServiceError::MalformedResponse("reply missing candidates/content/parts".into())
            })?;

        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        if text.is_empty() {
            warn!(model = model, "Generation reply contained no text parts");
            return Err(ServiceError::MalformedResponse(
                "reply contained no text".into(),
            ));
        }
        Ok(text)
    }
}
