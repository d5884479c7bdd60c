//! Loading check definitions from the graph store

use crate::error::EngineError;
use posture_graph::{collect_all, BindVars, Check, GraphStore};
use std::sync::Arc;
use std::time::Duration;

/// Reads the current set of checks
///
/// Checks are re-read every cycle, so edits to the collection take effect
/// on the next cycle without a restart.
#[derive(Clone)]
pub struct CheckRepository {
    store: Arc<dyn GraphStore>,
    collection: String,
    timeout: Duration,
}

impl std::fmt::Debug for CheckRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckRepository")
            .field("collection", &self.collection)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl CheckRepository {
    /// Create a repository over `collection`
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>, collection: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            collection: collection.into(),
            timeout,
        }
    }

    /// Collection the checks are read from
    #[inline]
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Every well-formed check, in store order
    ///
    /// Documents that do not decode into a check are logged and skipped.
    ///
    /// # Errors
    /// `StoreUnavailable` if the store fails or the deadline passes; no
    /// partial list is returned.
    pub async fn list_checks(&self) -> Result<Vec<Check>, EngineError> {
        let query = format!("FOR check IN {} RETURN check", self.collection);

        let documents = tokio::time::timeout(self.timeout, async {
            let cursor = self.store.query(&query, BindVars::new()).await?;
            collect_all(cursor).await
        })
        .await
        .map_err(|_| EngineError::store_deadline("listing checks", self.timeout))??;

        let mut checks = Vec::with_capacity(documents.len());
        for document in documents {
            match Check::from_document(document) {
                Ok(check) => checks.push(check),
                Err(e) => {
                    tracing::warn!(collection = %self.collection, error = %e, "skipping malformed check definition");
                }
            }
        }

        tracing::debug!(collection = %self.collection, count = checks.len(), "loaded checks");
        Ok(checks)
    }
}
