//! Document representation
//!
//! A document is one record in a collection: a `$id` plus whatever fields the
//! collection's attributes define. Backend metadata (`$createdAt`, ...) is
//! kept alongside the data fields and never written back.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A document as returned by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    /// Create a new document with the given ID
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Set a field value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Get a field value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// A string field, only if present and non-empty
    pub fn non_empty_str(&self, key: &str) -> Option<&str> {
        self.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// An array field, only if present and non-empty
    pub fn non_empty_array(&self, key: &str) -> Option<&Vec<Value>> {
        self.get(key)
            .and_then(Value::as_array)
            .filter(|a| !a.is_empty())
    }

    /// Whether a field holds a usable value (non-empty string or array)
    pub fn has_value(&self, key: &str) -> bool {
        match self.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        }
    }
}

/// Documents with the total the backend reports for the collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentList {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub documents: Vec<Document>,
}
