//! Identifier validation
//!
//! Collection ids, attribute keys and document ids all end up inside
//! management API paths, so they are checked before any request is built.

use thiserror::Error;

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid {0} '{1}': {2}")]
    InvalidIdentifier(&'static str, String, &'static str),

    #[error("{0} '{1}' is too long (max {2} characters)")]
    TooLong(&'static str, String, usize),

    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("Reserved name: '{0}'")]
    Reserved(String),
}

/// Maximum length for identifiers accepted by the backend
pub const MAX_IDENTIFIER_LENGTH: usize = 36;

/// Keys the backend uses for document metadata
const RESERVED_KEYS: &[&str] = &[
    "$id",
    "$collectionId",
    "$databaseId",
    "$createdAt",
    "$updatedAt",
    "$permissions",
];

/// Validate a collection id
///
/// Rules:
/// - Must be 1-36 characters
/// - Lowercase alphanumeric, underscore, and hyphen only
/// - Cannot start with a hyphen or underscore
pub fn validate_collection_id(id: &str) -> Result<(), ValidationError> {
    check_length(id, "collection id")?;

    for (i, c) in id.chars().enumerate() {
        if !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-') {
            return Err(ValidationError::InvalidIdentifier(
                "collection id",
                id.to_string(),
                "only lowercase letters, digits, underscore, and hyphen allowed",
            ));
        }
        if i == 0 && (c == '-' || c == '_') {
            return Err(ValidationError::InvalidIdentifier(
                "collection id",
                id.to_string(),
                "cannot start with hyphen or underscore",
            ));
        }
    }

    Ok(())
}

/// Validate an attribute key
///
/// Keys are case-sensitive (`descriptionLong`) and may not shadow the
/// backend's `$`-prefixed metadata fields.
pub fn validate_attribute_key(key: &str) -> Result<(), ValidationError> {
    if RESERVED_KEYS.contains(&key) {
        return Err(ValidationError::Reserved(key.to_string()));
    }
    check_length(key, "attribute key")?;

    for (i, c) in key.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(ValidationError::InvalidIdentifier(
                "attribute key",
                key.to_string(),
                "only letters, digits, and underscore allowed",
            ));
        }
        if i == 0 && c.is_ascii_digit() {
            return Err(ValidationError::InvalidIdentifier(
                "attribute key",
                key.to_string(),
                "cannot start with a digit",
            ));
        }
    }

    Ok(())
}

/// Validate a document id read back from the backend
///
/// More permissive than collection ids: mixed case and `.` are allowed,
/// path separators and traversal sequences are not.
pub fn validate_document_id(id: &str) -> Result<(), ValidationError> {
    check_length(id, "document id")?;

    if id.contains("..") || id.contains('/') || id.contains('\\') {
        return Err(ValidationError::InvalidIdentifier(
            "document id",
            id.to_string(),
            "contains path traversal characters",
        ));
    }

    for (i, c) in id.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' && c != '.' {
            return Err(ValidationError::InvalidIdentifier(
                "document id",
                id.to_string(),
                "contains invalid characters",
            ));
        }
        if i == 0 && !c.is_ascii_alphanumeric() {
            return Err(ValidationError::InvalidIdentifier(
                "document id",
                id.to_string(),
                "must start with a letter or digit",
            ));
        }
    }

    Ok(())
}

fn check_length(value: &str, kind: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty(kind));
    }
    if value.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong(
            kind,
            value.to_string(),
            MAX_IDENTIFIER_LENGTH,
        ));
    }
    Ok(())
}
