//! Findings produced by check queries
//!
//! Result documents have no fixed schema. A [`Finding`] keeps the document
//! exactly as the store returned it and exposes the conventional fields
//! (`resource_id`, `message`) on demand, so checks may return any shape and
//! the remediation service still receives every field.

use crate::error::EngineError;
use posture_graph::{Check, Document};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Field naming the offending resource
pub const RESOURCE_ID_FIELD: &str = "resource_id";
/// Field carrying the human-readable explanation
pub const MESSAGE_FIELD: &str = "message";

/// One match emitted by a check query
#[derive(Debug, Clone, PartialEq)]
pub struct Finding {
    check_key: String,
    check_name: String,
    document: Map<String, Value>,
}

impl Finding {
    /// Wrap a result document produced by `check`
    ///
    /// # Errors
    /// `FindingReadError` if the document is not a JSON object
    pub fn from_document(check: &Check, document: Document) -> Result<Self, EngineError> {
        match document {
            Value::Object(document) => Ok(Self {
                check_key: check.key.clone(),
                check_name: check.display_name().to_string(),
                document,
            }),
            other => Err(EngineError::FindingReadError {
                check: check.key.clone(),
                reason: format!("expected an object, got {}", kind_of(&other)),
            }),
        }
    }

    /// Key of the check that produced this finding
    #[inline]
    #[must_use]
    pub fn check_key(&self) -> &str {
        &self.check_key
    }

    /// Display name of the check that produced this finding
    #[inline]
    #[must_use]
    pub fn check_name(&self) -> &str {
        &self.check_name
    }

    /// Raw field lookup
    #[inline]
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.document.get(name)
    }

    /// Offending resource, when the check reports one as a string
    #[must_use]
    pub fn resource_id(&self) -> Option<&str> {
        self.field(RESOURCE_ID_FIELD).and_then(Value::as_str)
    }

    /// Explanation, when the check reports one as a string
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.field(MESSAGE_FIELD).and_then(Value::as_str)
    }

    /// Fields other than `resource_id` and `message`
    pub fn extra(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.document
            .iter()
            .filter(|(name, _)| name.as_str() != RESOURCE_ID_FIELD && name.as_str() != MESSAGE_FIELD)
            .map(|(name, value)| (name.as_str(), value))
    }

    /// The document as returned by the store
    #[inline]
    #[must_use]
    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    /// Decode the document into a caller-chosen shape
    ///
    /// # Errors
    /// `FindingReadError` if the document does not fit `T`
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EngineError> {
        T::deserialize(Value::Object(self.document.clone())).map_err(|e| {
            EngineError::FindingReadError {
                check: self.check_key.clone(),
                reason: e.to_string(),
            }
        })
    }

    /// Request body for the remediation service: the document, verbatim
    ///
    /// # Errors
    /// `DispatchSerializationError` if encoding fails
    pub fn to_payload(&self) -> Result<Vec<u8>, EngineError> {
        serde_json::to_vec(&self.document)
            .map_err(|e| EngineError::DispatchSerializationError(e.to_string()))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
