//! Posture Graph - property-graph store client
//!
//! The leaf of the posture scanner. Holds:
//! - the schema-free document model and node references
//! - stored entities (checks, resources, tags, edges)
//! - the `GraphStore`/`Cursor` boundary with ArangoDB and in-memory backends
//! - idempotent ingestion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use posture_graph::{BindVars, GraphStore, MemoryGraphStore, collect_all};
//!
//! # async fn example() -> Result<(), posture_graph::StoreError> {
//! let store = MemoryGraphStore::new();
//! let cursor = store.query("FOR c IN Checks RETURN c", BindVars::new()).await?;
//! let checks = collect_all(cursor).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

// Core modules
pub mod arango;
pub mod document;
pub mod error;
pub mod ingest;
pub mod memory;
pub mod model;
pub mod store;

// Re-exports for convenience
pub use arango::{ArangoConfig, ArangoStore};
pub use document::{document_key, edge_key, normalize_key, BindVars, Document, NodeRef};
pub use error::StoreError;
pub use ingest::{default_checks, public_sensitive_bucket_check, Ingestor, Schema};
pub use memory::{GraphSnapshot, MemoryGraphStore, QueryHandler};
pub use model::{Check, Edge, ResourceNode, TagNode};
pub use store::{collect_all, CollectionKind, Cursor, GraphStore, InsertOutcome};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
