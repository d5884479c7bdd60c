//! Remediation dispatch
//!
//! Each finding is POSTed, verbatim, to the remediation service. Delivery
//! is at-least-once: the engine keeps no record of what it already sent,
//! so a finding that persists is dispatched again on every cycle and the
//! service is expected to be idempotent.
//!
//! Without a configured endpoint the dispatcher runs in degraded mode:
//! findings are still logged, no request is made, and no error is raised.

mod http;

pub use http::HttpTransport;

use crate::error::{EngineError, TransportError};
use crate::finding::Finding;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default deadline for a single remediation request
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Response from the remediation service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body, verbatim
    pub body: String,
}

impl TransportResponse {
    /// 2xx status
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Delivery of a request body to the remediation endpoint
///
/// Implement this trait to change how requests travel; the dispatcher keeps
/// ownership of deadlines, retries and cancellation. Any response, whatever
/// its status, is returned as `Ok`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemediationTransport: Send + Sync {
    /// Send one POST with a JSON body
    async fn post(&self, url: &Url, payload: Vec<u8>) -> Result<TransportResponse, TransportError>;
}

/// Result of handing a finding to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// Service acknowledged the finding
    Delivered {
        /// HTTP status code
        status: u16,
        /// Response body, verbatim
        body: String,
        /// Attempts used, including the first
        attempts: u32,
    },
    /// No endpoint configured; nothing was sent
    Disabled,
}

#[derive(Clone)]
enum Target {
    Disabled,
    Endpoint {
        url: Url,
        transport: Arc<dyn RemediationTransport>,
    },
}

/// Sends findings to the remediation service
#[derive(Clone)]
pub struct RemediationDispatcher {
    target: Target,
    retry: RetryPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for RemediationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemediationDispatcher")
            .field("endpoint", &self.endpoint().map(Url::as_str))
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RemediationDispatcher {
    /// Dispatcher that only logs
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            target: Target::Disabled,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    /// Dispatcher posting to `url` through `transport`
    #[must_use]
    pub fn with_transport(url: Url, transport: Arc<dyn RemediationTransport>) -> Self {
        Self {
            target: Target::Endpoint { url, transport },
            retry: RetryPolicy::default(),
            timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    /// Dispatcher over HTTP, or disabled when `url` is `None`
    ///
    /// # Errors
    /// `ConfigurationError` if the HTTP client cannot be built
    pub fn http(url: Option<Url>, timeout: Duration) -> Result<Self, EngineError> {
        let dispatcher = match url {
            Some(url) => Self::with_transport(url, Arc::new(HttpTransport::new(timeout)?)),
            None => Self::disabled(),
        };
        Ok(dispatcher.with_timeout(timeout))
    }

    /// With a different retry policy
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// With a different per-attempt deadline
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configured endpoint, if any
    #[must_use]
    pub fn endpoint(&self) -> Option<&Url> {
        match &self.target {
            Target::Endpoint { url, .. } => Some(url),
            Target::Disabled => None,
        }
    }

    /// Whether requests are actually sent
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.endpoint().is_some()
    }

    /// Deliver one finding
    ///
    /// Transport failures, timeouts, 408, 429 and 5xx responses are retried
    /// with backoff until the attempt budget runs out. Other non-2xx
    /// responses fail immediately.
    ///
    /// # Errors
    /// - `DispatchSerializationError` if the finding cannot be encoded
    /// - `DispatchTransportError` once no further attempt will be made
    /// - `Cancelled` if `cancel` fires before the request settles
    pub async fn dispatch(
        &self,
        finding: &Finding,
        cancel: &CancellationToken,
    ) -> Result<RemediationOutcome, EngineError> {
        let Target::Endpoint { url, transport } = &self.target else {
            tracing::debug!(check = finding.check_key(), "remediation disabled; finding not dispatched");
            return Ok(RemediationOutcome::Disabled);
        };

        let payload = finding.to_payload()?;
        let attempts = self.retry.attempts();
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            attempt += 1;

            let request = tokio::time::timeout(self.timeout, transport.post(url, payload.clone()));
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(EngineError::Cancelled),
                result = request => result.unwrap_or(Err(TransportError::Timeout)),
            };

            let error = match result {
                Ok(response) if response.is_success() => {
                    return Ok(RemediationOutcome::Delivered {
                        status: response.status,
                        body: response.body,
                        attempts: attempt,
                    });
                }
                Ok(response) => TransportError::Status {
                    status: response.status,
                    body: response.body,
                },
                Err(e) => e,
            };

            if !error.is_retryable() || attempt == attempts {
                return Err(EngineError::DispatchTransportError {
                    source: error,
                    attempts: attempt,
                });
            }

            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                check = finding.check_key(),
                resource = finding.resource_id().unwrap_or("<unknown>"),
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "remediation attempt failed; retrying"
            );

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(EngineError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::Sequence;
    use posture_graph::Check;
    use serde_json::json;

    fn finding() -> Finding {
        Finding::from_document(
            &Check::new("public-bucket", "q"),
            json!({ "resource_id": "bucket-A", "message": "public and sensitive" }),
        )
        .unwrap()
    }

    fn url() -> Url {
        Url::parse("http://remediation:8080/remediate").unwrap()
    }

    fn reply(status: u16, body: &str) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status,
            body: body.to_string(),
        })
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_delays(Duration::from_millis(100), Duration::from_secs(1))
            .without_jitter()
    }

    #[tokio::test]
    async fn disabled_dispatcher_sends_nothing() {
        let dispatcher = RemediationDispatcher::disabled();
        let outcome = dispatcher
            .dispatch(&finding(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, RemediationOutcome::Disabled);
        assert!(!dispatcher.is_enabled());
    }

    #[tokio::test]
    async fn posts_document_verbatim() {
        let mut transport = MockRemediationTransport::new();
        transport
            .expect_post()
            .withf(|target, payload| {
                target.path() == "/remediate"
                    && serde_json::from_slice::<serde_json::Value>(payload).unwrap()
                        == json!({ "resource_id": "bucket-A", "message": "public and sensitive" })
            })
            .times(1)
            .returning(|_, _| reply(200, "Remediation triggered"));

        let dispatcher = RemediationDispatcher::with_transport(url(), Arc::new(transport));
        let outcome = dispatcher
            .dispatch(&finding(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RemediationOutcome::Delivered {
                status: 200,
                body: "Remediation triggered".to_string(),
                attempts: 1,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn retries_server_errors_then_succeeds() {
        let mut seq = Sequence::new();
        let mut transport = MockRemediationTransport::new();
        transport
            .expect_post()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| reply(503, "busy"));
        transport
            .expect_post()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| reply(202, "queued"));

        let dispatcher =
            RemediationDispatcher::with_transport(url(), Arc::new(transport)).with_retry(fast_retry(3));
        let started = tokio::time::Instant::now();
        let outcome = dispatcher
            .dispatch(&finding(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome, RemediationOutcome::Delivered { status: 202, attempts: 3, .. }));
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_attempt_budget() {
        let mut transport = MockRemediationTransport::new();
        transport
            .expect_post()
            .times(3)
            .returning(|_, _| Err(TransportError::Request("connection refused".into())));

        let dispatcher =
            RemediationDispatcher::with_transport(url(), Arc::new(transport)).with_retry(fast_retry(3));
        let err = dispatcher
            .dispatch(&finding(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::DispatchTransportError { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let mut transport = MockRemediationTransport::new();
        transport
            .expect_post()
            .times(1)
            .returning(|_, _| reply(400, "bad finding"));

        let dispatcher =
            RemediationDispatcher::with_transport(url(), Arc::new(transport)).with_retry(fast_retry(5));
        let err = dispatcher
            .dispatch(&finding(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            EngineError::DispatchTransportError {
                source: TransportError::Status { status, body },
                attempts,
            } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad finding");
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_service_times_out_per_attempt() {
        struct Stalled;

        #[async_trait]
        impl RemediationTransport for Stalled {
            async fn post(&self, _: &Url, _: Vec<u8>) -> Result<TransportResponse, TransportError> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                reply(200, "late")
            }
        }

        let dispatcher = RemediationDispatcher::with_transport(url(), Arc::new(Stalled))
            .with_timeout(Duration::from_secs(15))
            .with_retry(RetryPolicy::none());
        let started = tokio::time::Instant::now();
        let err = dispatcher
            .dispatch(&finding(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            EngineError::DispatchTransportError { source: TransportError::Timeout, attempts: 1 }
        ));
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let mut transport = MockRemediationTransport::new();
        transport
            .expect_post()
            .times(1)
            .returning(|_, _| reply(500, "down"));

        let dispatcher = RemediationDispatcher::with_transport(url(), Arc::new(transport)).with_retry(
            RetryPolicy::default()
                .with_delays(Duration::from_secs(60), Duration::from_secs(60))
                .without_jitter(),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = dispatcher.dispatch(&finding(), &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn cancelled_before_send_makes_no_request() {
        let mut transport = MockRemediationTransport::new();
        transport.expect_post().times(0);

        let dispatcher = RemediationDispatcher::with_transport(url(), Arc::new(transport));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(matches!(
            dispatcher.dispatch(&finding(), &cancel).await,
            Err(EngineError::Cancelled)
        ));
    }
}
