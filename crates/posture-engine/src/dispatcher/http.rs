//! HTTP transport for the remediation service

use super::{RemediationTransport, TransportResponse};
use crate::error::{EngineError, TransportError};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use std::time::Duration;

/// POSTs JSON bodies with a shared connection pool
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport whose requests give up after `timeout`
    ///
    /// # Errors
    /// `ConfigurationError` if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("posture-engine/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EngineError::ConfigurationError(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    #[inline]
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RemediationTransport for HttpTransport {
    async fn post(&self, url: &Url, payload: Vec<u8>) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::ResponseRead(e.to_string()))?;
        Ok(TransportResponse { status, body })
    }
}
