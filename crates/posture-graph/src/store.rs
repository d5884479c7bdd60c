//! Graph store boundary
//!
//! The engine treats the store as an opaque service: ensure collections,
//! insert documents, run a query and walk the resulting cursor.

use crate::document::{BindVars, Document};
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Collection flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionKind {
    /// Plain document collection (nodes, checks)
    Document,
    /// Edge collection (documents with `_from`/`_to`)
    Edge,
}

impl CollectionKind {
    /// Numeric collection type used on the wire by ArangoDB
    #[inline]
    #[must_use]
    pub fn wire_type(self) -> u8 {
        match self {
            Self::Document => 2,
            Self::Edge => 3,
        }
    }
}

/// Result of an idempotent insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Document was written
    Created,
    /// A document with the same key already existed; nothing changed
    AlreadyExists,
}

impl InsertOutcome {
    /// Check whether the insert wrote anything
    #[inline]
    #[must_use]
    pub fn is_created(self) -> bool {
        matches!(self, Self::Created)
    }
}

/// Opaque graph/document store
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create the collection if it is missing
    async fn ensure_collection(&self, name: &str, kind: CollectionKind) -> Result<(), StoreError>;

    /// Insert a document; an existing key is reported, not raised
    async fn insert_document(
        &self,
        collection: &str,
        document: Document,
    ) -> Result<InsertOutcome, StoreError>;

    /// Run a parameterized query and return a cursor over its results
    async fn query(&self, text: &str, bind_vars: BindVars) -> Result<Box<dyn Cursor>, StoreError>;
}

/// Streaming view over query results
///
/// Call [`Cursor::close`] once done. Implementations also release on drop so
/// an abandoned cursor cannot pin server-side state.
#[async_trait]
pub trait Cursor: Send {
    /// Next document, or `None` once the result set is exhausted
    async fn next_document(&mut self) -> Result<Option<Document>, StoreError>;

    /// Release the cursor; calling it again is a no-op
    async fn close(&mut self) -> Result<(), StoreError>;
}

/// Drain a cursor into memory, closing it on every path
///
/// # Errors
/// The first read error; the cursor is still closed
pub async fn collect_all(mut cursor: Box<dyn Cursor>) -> Result<Vec<Document>, StoreError> {
    let mut documents = Vec::new();
    let read = loop {
        match cursor.next_document().await {
            Ok(Some(doc)) => documents.push(doc),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    let closed = cursor.close().await;
    read?;
    closed?;
    Ok(documents)
}
