//! Error types for the evaluation engine
//!
//! Failures are classified by how far they propagate:
//! - a finding that cannot be read or dispatched is skipped
//! - a check whose query fails is abandoned for the current cycle
//! - a store outage while listing checks skips the whole cycle
//! - a configuration error is fatal at startup

use crate::scheduler::SchedulerState;
use posture_graph::StoreError;
use std::time::Duration;

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Graph store unreachable, timed out, or rejected a query
    #[error("graph store error: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// A single result document could not be decoded into a finding
    #[error("unreadable finding from check '{check}': {reason}")]
    FindingReadError {
        /// Check that produced the document
        check: String,
        /// Decode failure
        reason: String,
    },

    /// A finding could not be encoded into a request body
    #[error("finding could not be serialized: {0}")]
    DispatchSerializationError(String),

    /// Remediation request failed after exhausting its attempts
    #[error("remediation dispatch failed after {attempts} attempt(s): {source}")]
    DispatchTransportError {
        /// Last transport failure
        #[source]
        source: TransportError,
        /// Attempts made, including the first
        attempts: u32,
    },

    /// Invalid configuration; fatal at startup
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Scheduler asked to move between incompatible states
    #[error("illegal scheduler transition from {from:?} to {to:?}")]
    IllegalTransition {
        /// Current state
        from: SchedulerState,
        /// Requested state
        to: SchedulerState,
    },

    /// Work abandoned because shutdown was requested
    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Check if the failure may succeed on a later cycle
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::StoreUnavailable(err) => err.is_transient(),
            Self::DispatchTransportError { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Check if the failure only affects the item being processed
    #[inline]
    #[must_use]
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            Self::FindingReadError { .. }
                | Self::DispatchSerializationError(_)
                | Self::DispatchTransportError { .. }
        )
    }

    /// Deadline exceeded while waiting on the graph store
    #[inline]
    #[must_use]
    pub fn store_deadline(operation: &str, after: Duration) -> Self {
        Self::StoreUnavailable(StoreError::Unavailable(format!(
            "{operation} did not complete within {after:?}"
        )))
    }
}

/// Failures of a single remediation request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be made or the request could not be sent
    #[error("request failed: {0}")]
    Request(String),

    /// No response within the request deadline
    #[error("request deadline exceeded")]
    Timeout,

    /// Response arrived but its body could not be read
    #[error("response could not be read: {0}")]
    ResponseRead(String),

    /// Service answered with a non-success status
    #[error("remediation service returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, verbatim
        body: String,
    },
}

impl TransportError {
    /// Check if another attempt could succeed
    ///
    /// Client errors other than 408 and 429 are final.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout | Self::ResponseRead(_) => true,
            Self::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_body() || err.is_decode() {
            Self::ResponseRead(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}
