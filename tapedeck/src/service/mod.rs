//! Remote analysis service interface
//!
//! The remote invocation is an external collaborator: opaque
//! request/response, owned by the service provider. This module defines the
//! seam (trait + error taxonomy) the rate-limited client dispatches through,
//! plus the JSON extraction shared by all passes. The concrete Gemini-backed
//! implementation lives in [`gemini`].

pub mod gemini;

pub use gemini::GeminiService;

use crate::models::AnalysisPass;
use crate::tiers::Tier;
use std::path::Path;
use thiserror::Error;

/// Remote service errors, classified retryable vs. fatal.
///
/// Transient errors are retried with backoff inside the rate-limited client
/// and stay invisible to the orchestrator unless retries exhaust. Everything
/// else surfaces immediately as a failed phase.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Remote rate-limit signal (retryable)
    #[error("Rate limited by remote service")]
    RateLimited,

    /// Transient service-side fault (retryable)
    #[error("Transient service error: {0}")]
    Transient(String),

    /// Network-level failure (retryable)
    #[error("Network error: {0}")]
    Network(String),

    /// Uploaded media not ready or rejected during processing (retryable)
    #[error("Upload processing: {0}")]
    UploadProcessing(String),

    /// Request the service permanently rejects (fatal)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Response violating the expected payload schema (fatal)
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Authentication failure (fatal)
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Permanent quota exhaustion (fatal)
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Local media unreadable (fatal input error, never auto-retried)
    #[error("Media error: {0}")]
    Media(String),

    /// Bounded retries exhausted on a transient error (fatal to the phase)
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

impl ServiceError {
    /// Whether the rate-limited client should retry with backoff
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServiceError::RateLimited
                | ServiceError::Transient(_)
                | ServiceError::Network(_)
                | ServiceError::UploadProcessing(_)
        )
    }
}

/// Reference to a temporary media artifact on the remote side.
///
/// Scoped-resource contract: whoever uploads must delete exactly once,
/// success or failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadHandle {
    /// Remote resource name (used for polling and deletion)
    pub name: String,
    /// Content URI referenced in generation requests
    pub uri: String,
}

/// Seam to the remote analysis service
#[allow(async_fn_in_trait)]
pub trait AnalysisService {
    /// Upload local media and wait until the remote side can serve it
    async fn upload(&self, media: &Path) -> Result<UploadHandle, ServiceError>;

    /// Run one analysis call against uploaded media under the given tier.
    /// Returns the raw model reply text.
    async fn generate(
        &self,
        upload: &UploadHandle,
        tier: &Tier,
        instructions: &str,
    ) -> Result<String, ServiceError>;

    /// Text-only call (corpus synthesis); no media upload involved
    async fn generate_text(
        &self,
        tier: &Tier,
        instructions: &str,
        context: &str,
    ) -> Result<String, ServiceError>;

    /// Release the remote temporary artifact
    async fn delete_upload(&self, upload: UploadHandle) -> Result<(), ServiceError>;
}

/// Extract the JSON payload from a model reply, which may wrap it in
/// markdown fences or surrounding prose.
pub fn extract_json(text: &str) -> Result<serde_json::Value, ServiceError> {
    let text = text.trim();

    if text.starts_with("```") {
        let lines: Vec<&str> = text.lines().collect();
        let end = if lines.last().map(|l| l.trim()) == Some("```") {
            lines.len() - 1
        } else {
            lines.len()
        };
        return extract_json_span(&lines[1..end].join("\n"));
    }

    extract_json_span(text)
}

fn extract_json_span(text: &str) -> Result<serde_json::Value, ServiceError> {
    let start = ['{', '[']
        .iter()
        .filter_map(|c| text.find(*c))
        .min()
        .ok_or_else(|| {
            ServiceError::MalformedResponse(format!("No JSON in reply: {:.200}", text))
        })?;
    let end = ['}', ']']
        .iter()
        .filter_map(|c| text.rfind(*c))
        .max()
        .ok_or_else(|| {
            ServiceError::MalformedResponse(format!("Unterminated JSON in reply: {:.200}", text))
        })?;

    serde_json::from_str(&text[start..=end])
        .map_err(|e| ServiceError::MalformedResponse(format!("JSON parse failed: {}", e)))
}

/// Parse a model reply into a structured analysis pass
pub fn parse_pass(text: &str) -> Result<AnalysisPass, ServiceError> {
    let value = extract_json(text)?;
    serde_json::from_value(value)
        .map_err(|e| ServiceError::MalformedResponse(format!("Schema violation: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_plain_json() {
        let value = extract_json(r#"{"segments": []}"#).unwrap();
        assert!(value.get("segments").is_some());
    }

    #[test]
    fn test_extract_fenced_json() {
        let text = "```json\n{\"segments\": []}\n```";
        let value = extract_json(text).unwrap();
        assert!(value.get("segments").is_some());
    }

    #[test]
    fn test_extract_json_with_surrounding_prose() {
        let text = "Here is the analysis:\n{\"segments\": [{\"start\": \"00:00:10\", \"end\": \"00:00:20\"}]}\nHope this helps!";
        let value = extract_json(text).unwrap();
        assert_eq!(value["segments"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_extract_rejects_no_json() {
        assert!(matches!(
            extract_json("I cannot analyze this video."),
            Err(ServiceError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_pass_schema_violation_is_fatal() {
        let err = parse_pass(r#"{"segments": [{"start": 12}]}"#).unwrap_err();
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(ServiceError::RateLimited.is_transient());
        assert!(ServiceError::Network("reset".into()).is_transient());
        assert!(!ServiceError::AuthFailed("bad key".into()).is_transient());
        assert!(!ServiceError::MalformedResponse("x".into()).is_transient());
        assert!(!ServiceError::RetriesExhausted {
            attempts: 3,
            last: "429".into()
        }
        .is_transient());
    }
}
