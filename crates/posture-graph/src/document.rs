//! Documents and node references
//!
//! Everything that crosses the store boundary is a schema-free JSON document.
//! Nodes are addressed by a fully-qualified `collection/key` reference.

use crate::error::StoreError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Schema-free document as returned by the store
pub type Document = serde_json::Value;

/// Bind variables for a parameterized query
pub type BindVars = serde_json::Map<String, serde_json::Value>;

/// Key placeholder used when normalization leaves nothing behind
const EMPTY_KEY: &str = "_";

/// Fully-qualified node reference (`collection/key`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    /// Owning collection
    pub collection: String,
    /// Key within the collection
    pub key: String,
}

impl NodeRef {
    /// Create a reference from its parts
    #[inline]
    #[must_use]
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
        }
    }

    /// Parse a `collection/key` reference
    ///
    /// # Errors
    /// `StoreError::InvalidRef` if the separator is missing or either half is empty
    pub fn parse(text: &str) -> Result<Self, StoreError> {
        match text.split_once('/') {
            Some((collection, key)) if !collection.is_empty() && !key.is_empty() => {
                Ok(Self::new(collection, key))
            }
            _ => Err(StoreError::InvalidRef(text.to_string())),
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

impl FromStr for NodeRef {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for NodeRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Map arbitrary label text to a key-safe form
///
/// Characters outside `[A-Za-z0-9_.-]` become `-`, so `sensitivity:high`
/// maps to `sensitivity-high`.
#[must_use]
pub fn normalize_key(text: &str) -> String {
    if text.is_empty() {
        return EMPTY_KEY.to_string();
    }

    text.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Deterministic key for the edge `from -> to`
///
/// Re-creating the same edge therefore collides on its key instead of
/// producing a parallel duplicate.
#[must_use]
pub fn edge_key(from: &NodeRef, to: &NodeRef) -> String {
    let mut hasher = Sha256::new();
    hasher.update(from.to_string().as_bytes());
    hasher.update(b"->");
    hasher.update(to.to_string().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..32].to_string()
}

/// Read the `_key` field of a document, if any
#[inline]
#[must_use]
pub fn document_key(doc: &Document) -> Option<&str> {
    doc.get("_key").and_then(serde_json::Value::as_str)
}
