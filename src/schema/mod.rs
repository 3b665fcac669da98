//! Declared schema for the site's collections
//!
//! A schema set lists the collections the site needs and, per collection:
//! - attribute definitions with kinds and sizes
//! - fallback keys for strings the backend may refuse to widen
//! - scalar-to-array backfills for superseded fields
//!
//! The built-in set lives in [`SchemaSet::required`]; a YAML file with the
//! same shape can replace it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};
use crate::validation;

/// Kind of an attribute, with kind-specific parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FieldKind {
    /// Text with an upper bound on stored length
    String { size: u32 },
    Integer,
    Datetime,
}

impl FieldKind {
    /// Name the backend uses for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String { .. } => "string",
            FieldKind::Integer => "integer",
            FieldKind::Datetime => "datetime",
        }
    }
}

/// Definition of a single attribute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributeSpec {
    pub key: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "is_false")]
    pub array: bool,
    /// Key to create and backfill when the backend cannot widen this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl AttributeSpec {
    pub fn string(key: impl Into<String>, size: u32) -> Self {
        Self {
            key: key.into(),
            kind: FieldKind::String { size },
            array: false,
            fallback: None,
        }
    }

    pub fn string_array(key: impl Into<String>, size: u32) -> Self {
        Self {
            array: true,
            ..Self::string(key, size)
        }
    }

    pub fn integer(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: FieldKind::Integer,
            array: false,
            fallback: None,
        }
    }

    pub fn datetime(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: FieldKind::Datetime,
            array: false,
            fallback: None,
        }
    }

    /// Declare a fallback key for widening
    pub fn with_fallback(mut self, key: impl Into<String>) -> Self {
        self.fallback = Some(key.into());
        self
    }

    /// Human-readable kind, e.g. `string[]`
    pub fn describe(&self) -> String {
        if self.array {
            format!("{}[]", self.kind.as_str())
        } else {
            self.kind.as_str().to_string()
        }
    }
}

/// A legacy single-value field superseded by a multi-value one
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArrayBackfill {
    pub from: String,
    pub to: String,
}

/// Schema for one collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionSpec {
    /// Stable lowercase identifier
    pub id: String,
    /// Display name
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backfills: Vec<ArrayBackfill>,
}

impl CollectionSpec {
    /// Create a new collection schema
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            attributes: Vec::new(),
            backfills: Vec::new(),
        }
    }

    /// Add an attribute definition
    pub fn attribute(mut self, attribute: AttributeSpec) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Add a scalar-to-array backfill
    pub fn backfill(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.backfills.push(ArrayBackfill {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Look up an attribute by key
    pub fn get(&self, key: &str) -> Option<&AttributeSpec> {
        self.attributes.iter().find(|a| a.key == key)
    }

    /// Check identifiers and internal consistency
    pub fn validate(&self) -> Result<()> {
        validation::validate_collection_id(&self.id)?;
        if self.name.trim().is_empty() {
            return Err(self.invalid("display name cannot be empty"));
        }

        let mut keys = HashSet::new();
        for attribute in &self.attributes {
            validation::validate_attribute_key(&attribute.key)?;
            if !keys.insert(attribute.key.as_str()) {
                return Err(self.invalid(format!("duplicate attribute '{}'", attribute.key)));
            }
            if let FieldKind::String { size: 0 } = attribute.kind {
                return Err(self.invalid(format!("attribute '{}' has size 0", attribute.key)));
            }
            if let Some(fallback) = &attribute.fallback {
                validation::validate_attribute_key(fallback)?;
                if attribute.array || !matches!(attribute.kind, FieldKind::String { .. }) {
                    return Err(self.invalid(format!(
                        "fallback on '{}' requires a scalar string attribute",
                        attribute.key
                    )));
                }
                if !keys.insert(fallback.as_str()) {
                    return Err(self.invalid(format!("duplicate attribute '{}'", fallback)));
                }
            }
        }

        for backfill in &self.backfills {
            match (self.get(&backfill.from), self.get(&backfill.to)) {
                (Some(from), Some(to)) if !from.array && to.array && from.kind == to.kind => {}
                _ => {
                    return Err(self.invalid(format!(
                        "backfill {} -> {} needs a scalar source and an array target of the same kind",
                        backfill.from, backfill.to
                    )))
                }
            }
        }

        Ok(())
    }

    fn invalid(&self, message: impl Into<String>) -> Error {
        Error::InvalidSchema {
            collection: self.id.clone(),
            message: message.into(),
        }
    }
}

/// All collections a site needs, in reconciliation order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaSet {
    pub collections: Vec<CollectionSpec>,
}

impl SchemaSet {
    /// The schema the portfolio site is built against
    pub fn required() -> Self {
        let projects = CollectionSpec::new("projects", "Projects")
            .attribute(AttributeSpec::string("title", 255))
            .attribute(AttributeSpec::string("description", 20000).with_fallback("descriptionLong"))
            .attribute(AttributeSpec::string("imageUrl", 255))
            .attribute(AttributeSpec::string_array("images", 255))
            .attribute(AttributeSpec::string("projectUrl", 255))
            .attribute(AttributeSpec::string_array("technologies", 255))
            .attribute(AttributeSpec::integer("order"))
            .backfill("imageUrl", "images");

        let blogposts = CollectionSpec::new("blogposts", "BlogPosts")
            .attribute(AttributeSpec::string("title", 255))
            .attribute(AttributeSpec::string("content", 10000))
            .attribute(AttributeSpec::string("slug", 255))
            .attribute(AttributeSpec::datetime("publishDate"))
            .attribute(AttributeSpec::string_array("tags", 255));

        let about = CollectionSpec::new("about", "About")
            .attribute(AttributeSpec::string("content", 5000))
            .attribute(AttributeSpec::string_array("skills", 255))
            .attribute(AttributeSpec::string("resumeUrl", 255));

        Self {
            collections: vec![projects, blogposts, about],
        }
    }

    /// Load a schema set from a YAML file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::SchemaFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let schema: SchemaSet = serde_yaml::from_str(&content).map_err(|e| Error::SchemaFile {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        schema.validate()?;
        Ok(schema)
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate every collection and reject duplicate ids
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for collection in &self.collections {
            collection.validate()?;
            if !ids.insert(collection.id.as_str()) {
                return Err(Error::InvalidSchema {
                    collection: collection.id.clone(),
                    message: "declared more than once".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Look up a collection by id
    pub fn get(&self, id: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.id == id)
    }
}
