//! Remote database handle and backend payload types
//!
//! The backend returns loosely typed JSON. Each payload here keeps the
//! fields the reconciler reasons about as typed values and everything else
//! in an open `extra` map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::schema::AttributeSpec;
use crate::transport::Transport;

mod document;
pub mod inspect;
pub mod mutate;

pub use document::{Document, DocumentList};
pub use mutate::AttributeChange;

/// One database on the backend, reached through a transport
pub struct Remote<T> {
    transport: T,
    database_id: String,
}

impl<T: Transport> Remote<T> {
    pub fn new(transport: T, database_id: impl Into<String>) -> Self {
        Self {
            transport,
            database_id: database_id.into(),
        }
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    fn collections_path(&self) -> String {
        format!("/databases/{}/collections", self.database_id)
    }

    fn collection_path(&self, collection_id: &str) -> String {
        format!("{}/{}", self.collections_path(), collection_id)
    }

    fn attributes_path(&self, collection_id: &str, kind: &str) -> String {
        format!("{}/attributes/{}", self.collection_path(collection_id), kind)
    }

    fn documents_path(&self, collection_id: &str) -> String {
        format!("{}/documents", self.collection_path(collection_id))
    }
}

/// Decode a backend payload, naming what was being read on failure
pub(crate) fn decode<D: serde::de::DeserializeOwned>(value: Value, context: &str) -> Result<D> {
    serde_json::from_value(value).map_err(|e| Error::UnexpectedResponse {
        context: context.to_string(),
        message: e.to_string(),
    })
}

/// A collection definition as the backend reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCollection {
    #[serde(rename = "$id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<RemoteAttribute>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemoteCollection {
    /// Find an attribute by key regardless of kind
    pub fn attribute(&self, key: &str) -> Option<&RemoteAttribute> {
        self.attributes.iter().find(|a| a.key == key)
    }
}

/// Observed kind of a remote attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteKind {
    /// Size may be absent on malformed or partially created attributes
    String { size: Option<u32> },
    Integer,
    Datetime,
    /// Kinds the reconciler never declares (boolean, email, ...)
    Other(String),
}

impl RemoteKind {
    pub fn as_str(&self) -> &str {
        match self {
            RemoteKind::String { .. } => "string",
            RemoteKind::Integer => "integer",
            RemoteKind::Datetime => "datetime",
            RemoteKind::Other(name) => name,
        }
    }
}

/// An attribute definition as the backend reports it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawAttribute", into = "RawAttribute")]
pub struct RemoteAttribute {
    pub key: String,
    pub kind: RemoteKind,
    pub array: bool,
    /// `available`, `processing`, `failed`, ...
    pub status: Option<String>,
    pub extra: Map<String, Value>,
}

impl RemoteAttribute {
    /// Observed string size, if this is a string attribute
    pub fn size(&self) -> Option<u32> {
        match self.kind {
            RemoteKind::String { size } => size,
            _ => None,
        }
    }

    /// Whether this attribute has the kind and array-ness the declared attribute asks for
    pub fn matches(&self, spec: &AttributeSpec) -> bool {
        use crate::schema::FieldKind;

        let same_kind = match (&self.kind, &spec.kind) {
            (RemoteKind::String { .. }, FieldKind::String { .. }) => true,
            (RemoteKind::Integer, FieldKind::Integer) => true,
            (RemoteKind::Datetime, FieldKind::Datetime) => true,
            _ => false,
        };
        same_kind && self.array == spec.array
    }

    /// Human-readable kind, e.g. `string[]`
    pub fn describe(&self) -> String {
        if self.array {
            format!("{}[]", self.kind.as_str())
        } else {
            self.kind.as_str().to_string()
        }
    }

    pub fn is_available(&self) -> bool {
        self.status.as_deref() == Some("available")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawAttribute {
    key: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    array: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RawAttribute> for RemoteAttribute {
    fn from(raw: RawAttribute) -> Self {
        // Datetime attributes are reported as `string` with `format: datetime`
        // by some server versions.
        let format = raw.extra.get("format").and_then(Value::as_str);
        let kind = match (raw.kind.as_str(), format) {
            ("datetime", _) | ("string", Some("datetime")) => RemoteKind::Datetime,
            ("string", _) => RemoteKind::String { size: raw.size },
            ("integer", _) => RemoteKind::Integer,
            (other, _) => RemoteKind::Other(other.to_string()),
        };
        Self {
            key: raw.key,
            kind,
            array: raw.array,
            status: raw.status,
            extra: raw.extra,
        }
    }
}

impl From<RemoteAttribute> for RawAttribute {
    fn from(attr: RemoteAttribute) -> Self {
        let size = attr.size();
        Self {
            key: attr.key,
            kind: attr.kind.as_str().to_string(),
            array: attr.array,
            size,
            status: attr.status,
            extra: attr.extra,
        }
    }
}
