//! Engine configuration
//!
//! Built from flags and environment variables (see [`crate::cli`]) and
//! validated once at startup. Any validation failure is fatal.

use crate::error::EngineError;
use crate::retry::RetryPolicy;
use crate::scheduler::SchedulerConfig;
use posture_graph::ArangoConfig;
use reqwest::Url;
use serde::Serialize;
use std::time::Duration;

/// Runtime configuration of the engine
#[derive(Clone, Serialize)]
pub struct EngineConfig {
    /// Remediation endpoint; `None` runs in degraded (log-only) mode
    pub remediation_url: Option<String>,
    /// Graph store base URL
    pub store_endpoint: String,
    /// Graph store database
    pub store_database: String,
    /// Graph store user
    pub store_username: String,
    /// Graph store password
    #[serde(skip_serializing)]
    pub store_password: String,
    /// Collection holding check definitions
    pub checks_collection: String,
    /// Pause between the end of one cycle and the start of the next
    pub interval: Duration,
    /// Deadline for each graph store operation
    pub store_timeout: Duration,
    /// Deadline for each remediation attempt
    pub dispatch_timeout: Duration,
    /// Remediation attempts per finding, including the first
    pub dispatch_max_attempts: u32,
    /// Findings of one check dispatched concurrently
    pub dispatch_concurrency: usize,
    /// Result documents read per check per cycle; unbounded when `None`
    pub max_findings_per_check: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let store = ArangoConfig::default();
        Self {
            remediation_url: None,
            store_endpoint: store.endpoint,
            store_database: store.database,
            store_username: store.username,
            store_password: store.password,
            checks_collection: "Checks".to_string(),
            interval: Duration::from_secs(10),
            store_timeout: Duration::from_secs(30),
            dispatch_timeout: Duration::from_secs(15),
            dispatch_max_attempts: 3,
            dispatch_concurrency: 1,
            max_findings_per_check: None,
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("remediation_url", &self.remediation_url)
            .field("store_endpoint", &self.store_endpoint)
            .field("store_database", &self.store_database)
            .field("store_username", &self.store_username)
            .field("store_password", &"<redacted>")
            .field("checks_collection", &self.checks_collection)
            .field("interval", &self.interval)
            .field("store_timeout", &self.store_timeout)
            .field("dispatch_timeout", &self.dispatch_timeout)
            .field("dispatch_max_attempts", &self.dispatch_max_attempts)
            .field("dispatch_concurrency", &self.dispatch_concurrency)
            .field("max_findings_per_check", &self.max_findings_per_check)
            .finish()
    }
}

impl EngineConfig {
    /// With a remediation endpoint
    #[inline]
    #[must_use]
    pub fn with_remediation_url(mut self, url: impl Into<String>) -> Self {
        self.remediation_url = Some(url.into());
        self
    }

    /// With a different graph store endpoint
    #[inline]
    #[must_use]
    pub fn with_store_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.store_endpoint = endpoint.into();
        self
    }

    /// With a different check collection
    #[inline]
    #[must_use]
    pub fn with_checks_collection(mut self, collection: impl Into<String>) -> Self {
        self.checks_collection = collection.into();
        self
    }

    /// With a different cycle interval
    #[inline]
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// With a different dispatch fan-out
    #[inline]
    #[must_use]
    pub fn with_dispatch_concurrency(mut self, concurrency: usize) -> Self {
        self.dispatch_concurrency = concurrency;
        self
    }

    /// With a per-check result cap
    #[inline]
    #[must_use]
    pub fn with_max_findings_per_check(mut self, limit: usize) -> Self {
        self.max_findings_per_check = Some(limit);
        self
    }

    /// Reject configurations the engine cannot run with
    ///
    /// # Errors
    /// `ConfigurationError` naming the first offending setting
    pub fn validate(&self) -> Result<(), EngineError> {
        self.remediation_endpoint()?;
        parse_http_url("graph store endpoint", &self.store_endpoint)?;

        if self.store_database.trim().is_empty() {
            return Err(invalid("graph store database must not be empty"));
        }
        if !is_collection_name(&self.checks_collection) {
            return Err(invalid(format!(
                "'{}' is not a valid collection name",
                self.checks_collection
            )));
        }
        for (name, value) in [
            ("evaluation interval", self.interval),
            ("store timeout", self.store_timeout),
            ("dispatch timeout", self.dispatch_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(format!("{name} must be positive")));
            }
        }
        if self.dispatch_max_attempts == 0 {
            return Err(invalid("dispatch attempts must be at least 1"));
        }
        if self.dispatch_concurrency == 0 {
            return Err(invalid("dispatch concurrency must be at least 1"));
        }
        if self.max_findings_per_check == Some(0) {
            return Err(invalid("finding cap must be at least 1 when set"));
        }
        Ok(())
    }

    /// Parsed remediation endpoint; blank counts as unset
    ///
    /// # Errors
    /// `ConfigurationError` if set to something other than an http(s) URL
    pub fn remediation_endpoint(&self) -> Result<Option<Url>, EngineError> {
        match self.remediation_url.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(url) => parse_http_url("remediation service URL", url).map(Some),
        }
    }

    /// Graph store client settings
    #[must_use]
    pub fn arango_config(&self) -> ArangoConfig {
        ArangoConfig::new(self.store_endpoint.clone())
            .with_database(self.store_database.clone())
            .with_credentials(self.store_username.clone(), self.store_password.clone())
            .with_request_timeout(self.store_timeout)
    }

    /// Retry policy for remediation requests
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default().with_max_attempts(self.dispatch_max_attempts)
    }

    /// Loop settings
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: self.interval,
            dispatch_concurrency: self.dispatch_concurrency,
        }
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::ConfigurationError(message.into())
}

fn parse_http_url(what: &str, text: &str) -> Result<Url, EngineError> {
    let url = Url::parse(text).map_err(|e| invalid(format!("{what} '{text}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(invalid(format!("{what} '{text}': unsupported scheme '{other}'"))),
    }
}

fn is_collection_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
