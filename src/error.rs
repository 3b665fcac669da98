//! Error types for folio-schema
//!
//! Provides structured error types with context so a failed run can be
//! diagnosed from the console output alone.

use std::path::PathBuf;
use thiserror::Error;

use crate::transport::TransportError;

/// The main error type for reconciler operations
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    #[error("Missing required environment variables: {}", .missing.join(", "))]
    Configuration { missing: Vec<String> },

    #[error("Failed to read env file '{path}': {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    // ==========================================================================
    // Schema Errors
    // ==========================================================================
    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Reserved name '{name}' cannot be used")]
    ReservedName { name: String },

    #[error("Invalid schema for collection '{collection}': {message}")]
    InvalidSchema { collection: String, message: String },

    #[error("Failed to load schema file '{path}': {message}")]
    SchemaFile { path: PathBuf, message: String },

    #[error("Attribute '{collection}.{key}' exists as {actual}, expected {expected}")]
    AttributeKindMismatch {
        collection: String,
        key: String,
        expected: String,
        actual: String,
    },

    // ==========================================================================
    // Backend Errors
    // ==========================================================================
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Backend cannot update attribute '{collection}.{key}' in place")]
    AttributeUpdateUnsupported { collection: String, key: String },

    #[error("Unexpected response for {context}: {message}")]
    UnexpectedResponse { context: String, message: String },

    // ==========================================================================
    // Catch-all
    // ==========================================================================
    #[error("{0}")]
    Other(String),
}

/// Result type alias for reconciler operations
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Conversions from external error types
// =============================================================================

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Other(format!("YAML error: {}", err))
    }
}

impl From<crate::validation::ValidationError> for Error {
    fn from(err: crate::validation::ValidationError) -> Self {
        match err {
            crate::validation::ValidationError::InvalidIdentifier(kind, value, reason) => {
                Error::InvalidIdentifier { kind, value, reason }
            }
            crate::validation::ValidationError::TooLong(kind, value, _max) => {
                Error::InvalidIdentifier {
                    kind,
                    value,
                    reason: "exceeds maximum length",
                }
            }
            crate::validation::ValidationError::Empty(kind) => Error::InvalidIdentifier {
                kind,
                value: String::new(),
                reason: "cannot be empty",
            },
            crate::validation::ValidationError::Reserved(name) => Error::ReservedName { name },
        }
    }
}

// =============================================================================
// Error Display Helpers
// =============================================================================

impl Error {
    /// Returns a user-friendly suggestion for fixing the error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Configuration { .. } => {
                Some("Export the variables or add them to .env.local / .env")
            }
            Error::AttributeUpdateUnsupported { .. } => {
                Some("Declare a fallback key for this attribute so data can be migrated to it")
            }
            Error::AttributeKindMismatch { .. } => {
                Some("Attribute kinds are never changed; rename the attribute in the schema")
            }
            Error::InvalidIdentifier { .. } => {
                Some("Use only letters, numbers, underscores, and hyphens")
            }
            Error::Transport(TransportError::Http { status: 401, .. }) => {
                Some("Check that APPWRITE_API_KEY is valid and has the databases scopes")
            }
            _ => None,
        }
    }

    /// Returns true if the reconciler recovers from this error locally
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::AttributeUpdateUnsupported { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_lists_missing_names() {
        let err = Error::Configuration {
            missing: vec!["APPWRITE_ENDPOINT".into(), "APPWRITE_API_KEY".into()],
        };
        assert_eq!(
            err.to_string(),
            "Missing required environment variables: APPWRITE_ENDPOINT, APPWRITE_API_KEY"
        );
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_transport_error_is_transparent() {
        let err = Error::from(TransportError::Http {
            status: 404,
            status_text: "Not Found".into(),
            body: "{}".into(),
        });
        assert_eq!(err.to_string(), "HTTP Error: 404 - Not Found - {}");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_update_unsupported_is_recoverable() {
        let err = Error::AttributeUpdateUnsupported {
            collection: "projects".into(),
            key: "description".into(),
        };
        assert!(err.is_recoverable());
    }
}
