//! Idempotent write path for resources, tags, edges and checks
//!
//! Resource discovery lives elsewhere; whatever enumerates the cloud hands
//! its results to an [`Ingestor`], which guarantees that re-ingesting the
//! same input never grows the graph.

use crate::document::NodeRef;
use crate::error::StoreError;
use crate::model::{Check, Edge, ResourceNode, TagNode};
use crate::store::{CollectionKind, GraphStore, InsertOutcome};
use std::sync::Arc;

/// Key of the built-in public-and-sensitive bucket check
pub const PUBLIC_SENSITIVE_BUCKET_CHECK: &str = "public-sensitive-s3-bucket";

/// Collection names used by ingestion and by the built-in checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Resource node collection
    pub resources: String,
    /// Tag node collection
    pub tags: String,
    /// Resource → tag edge collection
    pub has_tag: String,
    /// Check collection
    pub checks: String,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            resources: "S3Bucket".to_string(),
            tags: "Tag".to_string(),
            has_tag: "has_tag".to_string(),
            checks: "Checks".to_string(),
        }
    }
}

impl Schema {
    /// With a different check collection
    #[inline]
    #[must_use]
    pub fn with_checks_collection(mut self, checks: impl Into<String>) -> Self {
        self.checks = checks.into();
        self
    }
}

/// Idempotent writer over a [`GraphStore`]
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn GraphStore>,
    schema: Schema,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl Ingestor {
    /// Create an ingestor with the default schema
    #[inline]
    #[must_use]
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self::with_schema(store, Schema::default())
    }

    /// Create an ingestor with a custom schema
    #[inline]
    #[must_use]
    pub fn with_schema(store: Arc<dyn GraphStore>, schema: Schema) -> Self {
        Self { store, schema }
    }

    /// Schema in use
    #[inline]
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Make sure every collection exists
    ///
    /// # Errors
    /// Propagates store failures
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.store
            .ensure_collection(&self.schema.resources, CollectionKind::Document)
            .await?;
        self.store
            .ensure_collection(&self.schema.tags, CollectionKind::Document)
            .await?;
        self.store
            .ensure_collection(&self.schema.has_tag, CollectionKind::Edge)
            .await?;
        self.store
            .ensure_collection(&self.schema.checks, CollectionKind::Document)
            .await
    }

    /// Insert a resource node unless its key is already present
    ///
    /// # Errors
    /// Propagates store failures; an existing key is not an error
    pub async fn upsert_resource(&self, resource: &ResourceNode) -> Result<InsertOutcome, StoreError> {
        let outcome = self
            .store
            .insert_document(&self.schema.resources, resource.to_document()?)
            .await?;
        tracing::debug!(resource = %resource.key, ?outcome, "upserted resource");
        Ok(outcome)
    }

    /// Insert a tag node unless its key is already present
    ///
    /// # Errors
    /// Propagates store failures; an existing key is not an error
    pub async fn upsert_tag(&self, tag: &TagNode) -> Result<InsertOutcome, StoreError> {
        let outcome = self
            .store
            .insert_document(&self.schema.tags, tag.to_document()?)
            .await?;
        tracing::debug!(tag = %tag.name, ?outcome, "upserted tag");
        Ok(outcome)
    }

    /// Link two nodes through the tag edge collection
    ///
    /// # Errors
    /// Propagates store failures; an existing edge is not an error
    pub async fn link(&self, from: NodeRef, to: NodeRef) -> Result<InsertOutcome, StoreError> {
        let edge = Edge::new(from, to);
        let outcome = self
            .store
            .insert_document(&self.schema.has_tag, edge.to_document())
            .await?;
        tracing::debug!(from = %edge.from, to = %edge.to, ?outcome, "upserted edge");
        Ok(outcome)
    }

    /// Ingest a resource together with its tags and the edges to them
    ///
    /// # Errors
    /// Stops at the first store failure
    pub async fn ingest_tagged_resource(
        &self,
        resource: &ResourceNode,
        labels: &[&str],
    ) -> Result<(), StoreError> {
        self.upsert_resource(resource).await?;
        let from = resource.node_ref(&self.schema.resources);

        for label in labels {
            let tag = TagNode::from_label(*label);
            self.upsert_tag(&tag).await?;
            self.link(from.clone(), tag.node_ref(&self.schema.tags)).await?;
        }
        Ok(())
    }

    /// Store a check definition unless its key is already present
    ///
    /// # Errors
    /// Propagates store failures; an existing key is not an error
    pub async fn upsert_check(&self, check: &Check) -> Result<InsertOutcome, StoreError> {
        let outcome = self
            .store
            .insert_document(&self.schema.checks, check.to_document()?)
            .await?;
        if outcome.is_created() {
            tracing::info!(check = %check.key, "ingested check definition");
        }
        Ok(outcome)
    }
}

/// Built-in checks shipped with the scanner
#[must_use]
pub fn default_checks(schema: &Schema) -> Vec<Check> {
    vec![public_sensitive_bucket_check(schema)]
}

/// Public buckets tagged `sensitivity:high`
#[must_use]
pub fn public_sensitive_bucket_check(schema: &Schema) -> Check {
    let query = format!(
        r#"
FOR bucket IN {resources}
    FILTER bucket.is_public == true
    FOR tag, edge IN 1..1 OUTBOUND bucket {has_tag}
        FILTER tag.name == "sensitivity:high"
        RETURN {{
            "resource_id": bucket.name,
            "message": CONCAT("S3 bucket '", bucket.name, "' is public and tagged as sensitive.")
        }}
"#,
        resources = schema.resources,
        has_tag = schema.has_tag,
    );

    Check::new(PUBLIC_SENSITIVE_BUCKET_CHECK, query)
        .with_name("Public Sensitive S3 Bucket")
        .with_description("Finds S3 buckets that are public and have a 'sensitivity:high' tag.")
}
