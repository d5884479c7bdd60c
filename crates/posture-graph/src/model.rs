//! Entities stored in the graph
//!
//! - `Check`: declarative detection rule, its query is opaque text
//! - `ResourceNode`: discovered cloud resource (e.g. a storage bucket)
//! - `TagNode`: label entity keyed by its normalized name
//! - `Edge`: directed relationship between two nodes

use crate::document::{edge_key, normalize_key, Document, NodeRef};
use crate::error::StoreError;
use serde::{Deserialize, Serialize};

/// Declarative detection rule
///
/// Stored documents written by older tooling carry the query under `aql`;
/// both spellings decode into `query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    /// Unique stable identifier
    #[serde(rename = "_key", alias = "key")]
    pub key: String,
    /// Human-readable name
    #[serde(default)]
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Query program, executed verbatim
    #[serde(alias = "aql")]
    pub query: String,
}

impl Check {
    /// Create a check with empty metadata
    #[inline]
    #[must_use]
    pub fn new(key: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: String::new(),
            description: String::new(),
            query: query.into(),
        }
    }

    /// With human-readable name
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Name for log lines, falling back to the key
    #[inline]
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.key
        } else {
            &self.name
        }
    }

    /// Decode a check from a stored document
    ///
    /// # Errors
    /// `StoreError::Malformed` when `_key` or the query is missing
    pub fn from_document(doc: Document) -> Result<Self, StoreError> {
        Ok(serde_json::from_value(doc)?)
    }

    /// Encode as a store document
    ///
    /// # Errors
    /// `StoreError::Malformed` if serialization fails
    pub fn to_document(&self) -> Result<Document, StoreError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Discovered cloud resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Stable external identifier, used as the graph key
    #[serde(rename = "_key")]
    pub key: String,
    /// Resource name
    pub name: String,
    /// Domain attributes (e.g. `is_public`)
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

impl ResourceNode {
    /// Create a resource whose key and name are the external identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            key: normalize_key(&id),
            name: id,
            attributes: serde_json::Map::new(),
        }
    }

    /// With a domain attribute
    #[inline]
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Reference to this node inside `collection`
    #[inline]
    #[must_use]
    pub fn node_ref(&self, collection: &str) -> NodeRef {
        NodeRef::new(collection, &self.key)
    }

    /// Encode as a store document
    ///
    /// # Errors
    /// `StoreError::Malformed` if serialization fails
    pub fn to_document(&self) -> Result<Document, StoreError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Label entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagNode {
    /// Key derived from the label
    #[serde(rename = "_key")]
    pub key: String,
    /// Original label text
    pub name: String,
}

impl TagNode {
    /// Build a tag from its label, deriving the key
    #[inline]
    #[must_use]
    pub fn from_label(label: impl Into<String>) -> Self {
        let name = label.into();
        Self {
            key: normalize_key(&name),
            name,
        }
    }

    /// Reference to this node inside `collection`
    #[inline]
    #[must_use]
    pub fn node_ref(&self, collection: &str) -> NodeRef {
        NodeRef::new(collection, &self.key)
    }

    /// Encode as a store document
    ///
    /// # Errors
    /// `StoreError::Malformed` if serialization fails
    pub fn to_document(&self) -> Result<Document, StoreError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Directed relationship edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Source node
    #[serde(rename = "_from")]
    pub from: NodeRef,
    /// Target node
    #[serde(rename = "_to")]
    pub to: NodeRef,
}

impl Edge {
    /// Create an edge
    #[inline]
    #[must_use]
    pub fn new(from: NodeRef, to: NodeRef) -> Self {
        Self { from, to }
    }

    /// Deterministic key of this edge
    #[inline]
    #[must_use]
    pub fn key(&self) -> String {
        edge_key(&self.from, &self.to)
    }

    /// Encode as a store document, including the deterministic `_key`
    #[must_use]
    pub fn to_document(&self) -> Document {
        serde_json::json!({
            "_key": self.key(),
            "_from": self.from.to_string(),
            "_to": self.to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn check_decodes_legacy_aql_field() {
        let doc = json!({
            "_key": "public-sensitive-s3-bucket",
            "_id": "Checks/public-sensitive-s3-bucket",
            "_rev": "_h1",
            "name": "Public Sensitive S3 Bucket",
            "description": "Finds S3 buckets that are public",
            "aql": "FOR b IN S3Bucket RETURN b",
        });

        let check = Check::from_document(doc).unwrap();
        assert_eq!(check.key, "public-sensitive-s3-bucket");
        assert_eq!(check.query, "FOR b IN S3Bucket RETURN b");
    }

    #[test]
    fn check_requires_key_and_query() {
        assert!(Check::from_document(json!({ "name": "x", "query": "q" })).is_err());
        assert!(Check::from_document(json!({ "_key": "x" })).is_err());
        assert!(Check::from_document(json!("not a document")).is_err());
    }

    #[test]
    fn check_metadata_defaults_to_empty() {
        let check = Check::from_document(json!({ "key": "k", "query": "q" })).unwrap();
        assert_eq!(check.name, "");
        assert_eq!(check.display_name(), "k");
    }

    #[test]
    fn check_encodes_with_store_key() {
        let check = Check::new("k", "q").with_name("Name");
        let doc = check.to_document().unwrap();
        assert_eq!(doc["_key"], json!("k"));
        assert_eq!(doc["query"], json!("q"));
    }

    #[test]
    fn resource_attributes_are_flattened() {
        let bucket = ResourceNode::new("bucket-A").with_attribute("is_public", true);
        let doc = bucket.to_document().unwrap();
        assert_eq!(
            doc,
            json!({ "_key": "bucket-A", "name": "bucket-A", "is_public": true })
        );
    }

    #[test]
    fn tag_key_is_derived_from_label() {
        let tag = TagNode::from_label("sensitivity:high");
        assert_eq!(tag.key, "sensitivity-high");
        assert_eq!(tag.name, "sensitivity:high");
    }

    #[test]
    fn edge_document_carries_deterministic_key() {
        let edge = Edge::new(
            NodeRef::new("S3Bucket", "bucket-A"),
            NodeRef::new("Tag", "sensitivity-high"),
        );
        let doc = edge.to_document();
        assert_eq!(doc["_from"], json!("S3Bucket/bucket-A"));
        assert_eq!(doc["_to"], json!("Tag/sensitivity-high"));
        assert_eq!(doc["_key"], json!(edge.key()));
    }
}
