//! Rate-limited service client with bounded retries
//!
//! Wraps an [`AnalysisService`] with the three controls every remote call
//! goes through: a global concurrency ceiling (semaphore), a request pacer
//! (governor), and a bounded retry loop with exponential backoff for
//! transient failures. Each attempt is a complete upload/generate/release
//! cycle so no remote artifact outlives its attempt.

use crate::service::{AnalysisService, ServiceError, UploadHandle};
use crate::tiers::Tier;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Retry schedule for transient service errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Backoff before the second attempt
    pub base_backoff: Duration,
    /// Backoff growth factor per further attempt
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // Initial attempt plus three retries, 30s/90s/270s apart
        RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_secs(30),
            multiplier: 3,
        }
    }
}

impl RetryPolicy {
    /// Backoff applied after the given failed attempt (1-based)
    fn backoff_after(&self, attempt: u32) -> Duration {
        self.base_backoff * self.multiplier.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Service wrapper enforcing pacing, concurrency, and retry bounds
pub struct RateLimitedClient<S: AnalysisService> {
    service: S,
    pacer: DefaultDirectRateLimiter,
    permits: Semaphore,
    policy: RetryPolicy,
}

impl<S: AnalysisService> RateLimitedClient<S> {
    /// `requests_per_minute` paces dispatch; `max_in_flight` caps concurrent
    /// remote calls across all items.
    pub fn new(
        service: S,
        requests_per_minute: u32,
        max_in_flight: usize,
        policy: RetryPolicy,
    ) -> Self {
        let per_minute =
            NonZeroU32::new(requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        RateLimitedClient {
            service,
            pacer: RateLimiter::direct(Quota::per_minute(per_minute)),
            permits: Semaphore::new(max_in_flight.max(1)),
            policy,
        }
    }

    /// Upload media, run one generation call, release the upload.
    ///
    /// Transient failures retry up to the policy bound with backoff; the
    /// upload is released on every path, success or failure.
    pub async fn invoke(
        &self,
        media: &Path,
        tier: &Tier,
        instructions: &str,
    ) -> Result<String, ServiceError> {
        let mut last_error = None;
        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let pause = self.policy.backoff_after(attempt - 1);
                warn!(
                    attempt,
                    backoff_secs = pause.as_secs(),
                    media = %media.display(),
                    "Retrying after transient service error"
                );
                tokio::time::sleep(pause).await;
            }

            match self.attempt_media_call(media, tier, instructions).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() => {
                    debug!(attempt, error = %e, "Transient attempt failure");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ServiceError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    /// Text-only call under the same pacing and retry bounds
    pub async fn invoke_text(
        &self,
        tier: &Tier,
        instructions: &str,
        context: &str,
    ) -> Result<String, ServiceError> {
        let mut last_error = None;
        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let pause = self.policy.backoff_after(attempt - 1);
                warn!(attempt, backoff_secs = pause.as_secs(), "Retrying text call");
                tokio::time::sleep(pause).await;
            }

            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| ServiceError::Transient("client shut down".to_string()))?;
            self.pacer.until_ready().await;

            match self.service.generate_text(tier, instructions, context).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() => {
                    debug!(attempt, error = %e, "Transient attempt failure");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(ServiceError::RetriesExhausted {
            attempts: self.policy.max_attempts,
            last: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    /// One complete attempt: upload, generate, release. The release runs on
    /// the failure path too, so each upload is deleted exactly once.
    async fn attempt_media_call(
        &self,
        media: &Path,
        tier: &Tier,
        instructions: &str,
    ) -> Result<String, ServiceError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ServiceError::Transient("client shut down".to_string()))?;
        self.pacer.until_ready().await;

        let upload = self.service.upload(media).await?;
        let outcome = self.service.generate(&upload, tier, instructions).await;
        self.release_upload(upload).await;
        outcome
    }

    async fn release_upload(&self, upload: UploadHandle) {
        let name = upload.name.clone();
        if let Err(e) = self.service.delete_upload(upload).await {
            // The remote side garbage-collects eventually; log and move on
            warn!(upload = %name, error = %e, "Failed to release remote upload");
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted service: pops one response per generate call, counts
    /// uploads and deletions.
    #[derive(Default)]
    struct MockService {
        responses: Mutex<Vec<Result<String, ServiceError>>>,
        uploads: AtomicU32,
        deletes: AtomicU32,
    }

    impl MockService {
        fn scripted(responses: Vec<Result<String, ServiceError>>) -> Self {
            MockService {
                responses: Mutex::new(responses),
                ..Default::default()
            }
        }

        fn next_response(&self) -> Result<String, ServiceError> {
            let mut guard = self.responses.lock().unwrap();
            if guard.is_empty() {
                Ok("ok".to_string())
            } else {
                guard.remove(0)
            }
        }
    }

    impl AnalysisService for MockService {
        async fn upload(&self, _media: &Path) -> Result<UploadHandle, ServiceError> {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(UploadHandle {
                name: format!("files/mock-{}", n),
                uri: format!("https://mock/files/mock-{}", n),
            })
        }

        async fn generate(
            &self,
            _upload: &UploadHandle,
            _tier: &Tier,
            _instructions: &str,
        ) -> Result<String, ServiceError> {
            self.next_response()
        }

        async fn generate_text(
            &self,
            _tier: &Tier,
            _instructions: &str,
            _context: &str,
        ) -> Result<String, ServiceError> {
            self.next_response()
        }

        async fn delete_upload(&self, _upload: UploadHandle) -> Result<(), ServiceError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            multiplier: 3,
        }
    }

    fn tier() -> Tier {
        crate::tiers::TierSet::default().analysis
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retry_then_succeed() {
        let service = MockService::scripted(vec![
            Err(ServiceError::RateLimited),
            Err(ServiceError::Transient("503".into())),
            Ok("analysis text".to_string()),
        ]);
        let client = RateLimitedClient::new(service, 600, 2, fast_policy());

        let reply = client
            .invoke(Path::new("/tmp/tape.mp4"), &tier(), "analyze")
            .await
            .unwrap();
        assert_eq!(reply, "analysis text");
        assert_eq!(client.service().uploads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_transients_then_success_under_default_bound() {
        let service = MockService::scripted(vec![
            Err(ServiceError::RateLimited),
            Err(ServiceError::Transient("503".into())),
            Err(ServiceError::Network("reset".into())),
            Ok("finally".to_string()),
        ]);
        let policy = RetryPolicy {
            base_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let client = RateLimitedClient::new(service, 600, 2, policy);

        // The caller sees only the success, never the intermediate failures
        let reply = client
            .invoke(Path::new("/tmp/tape.mp4"), &tier(), "analyze")
            .await
            .unwrap();
        assert_eq!(reply, "finally");
        assert_eq!(client.service().uploads.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_fails_immediately() {
        let service = MockService::scripted(vec![
            Err(ServiceError::AuthFailed("bad key".into())),
            Ok("never reached".to_string()),
        ]);
        let client = RateLimitedClient::new(service, 600, 2, fast_policy());

        let err = client
            .invoke(Path::new("/tmp/tape.mp4"), &tier(), "analyze")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AuthFailed(_)));
        assert_eq!(client.service().uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_after_bound() {
        let service = MockService::scripted(vec![
            Err(ServiceError::RateLimited),
            Err(ServiceError::RateLimited),
            Err(ServiceError::RateLimited),
        ]);
        let client = RateLimitedClient::new(service, 600, 2, fast_policy());

        let err = client
            .invoke(Path::new("/tmp/tape.mp4"), &tier(), "analyze")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::RetriesExhausted { attempts: 3, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_upload_released_once() {
        let service = MockService::scripted(vec![
            Err(ServiceError::Transient("503".into())),
            Ok("ok".to_string()),
        ]);
        let client = RateLimitedClient::new(service, 600, 2, fast_policy());

        client
            .invoke(Path::new("/tmp/tape.mp4"), &tier(), "analyze")
            .await
            .unwrap();
        let uploads = client.service().uploads.load(Ordering::SeqCst);
        let deletes = client.service().deletes.load(Ordering::SeqCst);
        assert_eq!(uploads, deletes);
        assert_eq!(uploads, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_call_retries() {
        let service = MockService::scripted(vec![
            Err(ServiceError::Network("reset".into())),
            Ok("synthesis".to_string()),
        ]);
        let client = RateLimitedClient::new(service, 600, 2, fast_policy());

        let reply = client
            .invoke_text(&tier(), "synthesize", "records")
            .await
            .unwrap();
        assert_eq!(reply, "synthesis");
        assert_eq!(client.service().uploads.load(Ordering::SeqCst), 0);
    }
}
