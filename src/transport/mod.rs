//! Backend transport
//!
//! Every management API call goes through [`Transport::request`]: one JSON
//! request, one JSON response, no retries. Non-2xx responses keep the raw
//! body so callers can pick server error codes out of it (see
//! [`classify`]).

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod classify;
mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use classify::{classify, ServerErrorKind};
pub use http::HttpTransport;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryBackend;
pub use reqwest::Method;

/// Failure of a single management API call
#[derive(Debug, Error)]
pub enum TransportError {
    /// The backend answered with a non-2xx status
    #[error("HTTP Error: {status} - {status_text} - {body}")]
    Http {
        status: u16,
        status_text: String,
        body: String,
    },

    /// The backend answered 2xx but the body was not JSON
    #[error("Failed to parse JSON response: {message}")]
    Decode { message: String, body: String },

    /// The request never produced a response
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },
}

impl TransportError {
    /// HTTP status, if the backend answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Raw response body, if one was received
    pub fn body(&self) -> Option<&str> {
        match self {
            TransportError::Http { body, .. } | TransportError::Decode { body, .. } => Some(body),
            TransportError::Request { .. } => None,
        }
    }
}

/// A channel to the backend's management API
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one request against `path` (relative to the API base URL)
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for &T {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, TransportError> {
        (**self).request(method, path, body).await
    }
}
