//! Running a check's query and streaming its findings
//!
//! Results are pulled from the store cursor one document at a time, so a
//! check matching many resources never materializes its full result set.
//!
//! # Cursor hygiene
//!
//! A [`FindingStream`] owns its store cursor. The cursor is released when
//! the stream is exhausted, when a read fails, when the per-check cap is
//! hit, on [`FindingStream::close`], and, as a last resort, when the stream
//! is dropped.

use crate::error::EngineError;
use crate::finding::Finding;
use futures::Stream;
use posture_graph::{BindVars, Check, Cursor, GraphStore};
use std::sync::Arc;
use std::time::Duration;

/// Opens finding streams for checks
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn GraphStore>,
    timeout: Duration,
    max_findings: Option<usize>,
}

impl std::fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("timeout", &self.timeout)
            .field("max_findings", &self.max_findings)
            .finish_non_exhaustive()
    }
}

impl QueryExecutor {
    /// Create an executor; `timeout` bounds opening the query and each read
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>, timeout: Duration) -> Self {
        Self {
            store,
            timeout,
            max_findings: None,
        }
    }

    /// Stop each check after `limit` result documents
    #[inline]
    #[must_use]
    pub fn with_max_findings(mut self, limit: Option<usize>) -> Self {
        self.max_findings = limit;
        self
    }

    /// Run `check.query` verbatim with no bind variables
    ///
    /// # Errors
    /// `StoreUnavailable` if the store rejects the query, fails, or misses
    /// the deadline.
    pub async fn execute(&self, check: &Check) -> Result<FindingStream, EngineError> {
        let cursor = tokio::time::timeout(self.timeout, self.store.query(&check.query, BindVars::new()))
            .await
            .map_err(|_| EngineError::store_deadline("query", self.timeout))??;

        Ok(FindingStream {
            check: check.clone(),
            cursor: Some(cursor),
            read_timeout: self.timeout,
            limit: self.max_findings,
            read: 0,
            truncated: false,
        })
    }
}

/// Lazily decoded findings of one check
pub struct FindingStream {
    check: Check,
    cursor: Option<Box<dyn Cursor>>,
    read_timeout: Duration,
    limit: Option<usize>,
    read: usize,
    truncated: bool,
}

impl std::fmt::Debug for FindingStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FindingStream")
            .field("check", &self.check.key)
            .field("open", &self.cursor.is_some())
            .field("read", &self.read)
            .field("truncated", &self.truncated)
            .finish_non_exhaustive()
    }
}

impl FindingStream {
    /// Next finding, or `None` once the stream has ended
    ///
    /// An undecodable document yields `FindingReadError` and the stream
    /// continues. A store failure yields `StoreUnavailable` and ends the
    /// stream.
    pub async fn next(&mut self) -> Option<Result<Finding, EngineError>> {
        if self.limit.is_some_and(|limit| self.read >= limit) && self.cursor.is_some() {
            self.truncated = true;
            tracing::warn!(check = %self.check.key, limit = self.read, "finding cap reached; remaining results skipped");
            self.close().await;
            return None;
        }

        let cursor = self.cursor.as_mut()?;
        let read = tokio::time::timeout(self.read_timeout, cursor.next_document()).await;

        match read {
            Ok(Ok(Some(document))) => {
                self.read += 1;
                Some(Finding::from_document(&self.check, document))
            }
            Ok(Ok(None)) => {
                self.close().await;
                None
            }
            Ok(Err(e)) => {
                self.close().await;
                Some(Err(EngineError::StoreUnavailable(e)))
            }
            Err(_) => {
                self.close().await;
                Some(Err(EngineError::store_deadline("cursor read", self.read_timeout)))
            }
        }
    }

    /// Release the cursor; further calls to `next` return `None`
    pub async fn close(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(e) = cursor.close().await {
                tracing::debug!(check = %self.check.key, error = %e, "cursor release failed");
            }
        }
    }

    /// Check this stream belongs to
    #[inline]
    #[must_use]
    pub fn check(&self) -> &Check {
        &self.check
    }

    /// Result documents read so far, decodable or not
    #[inline]
    #[must_use]
    pub fn documents_read(&self) -> usize {
        self.read
    }

    /// Whether the per-check cap cut the stream short
    #[inline]
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Adapt into a [`futures::Stream`]
    ///
    /// Dropping the adapter early releases the cursor through its drop path.
    pub fn into_stream(self) -> impl Stream<Item = Result<Finding, EngineError>> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            let item = stream.next().await?;
            Some((item, stream))
        })
    }
}
