//! Server error classification
//!
//! The backend reports failures as free text plus a `type` code in the JSON
//! body. All pattern matching on that text lives here; anything that does not
//! match is [`ServerErrorKind::Unrecognized`] and must be propagated.

use std::sync::LazyLock;

use regex::Regex;

use super::TransportError;

/// What a failed call means to the reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// The route itself does not exist (e.g. attribute update on older servers)
    RouteNotFound,
    /// The backend declared a maximum string size
    SizeCeiling(u32),
    /// The resource being created already exists
    AlreadyExists,
    /// The resource being read does not exist
    NotFound,
    /// Anything else
    Unrecognized,
}

// Patterns for the backend's current error wording
static ROUTE_NOT_FOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)general_route_not_found").unwrap());
static SIZE_CEILING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)no longer than\s+([\d,]+)\s*chars").unwrap());
static ALREADY_EXISTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[a-z]+_already_exists").unwrap());
static NOT_FOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)[a-z]+_not_found").unwrap());

/// Classify a transport failure.
///
/// Most specific first: a missing route is also a 404, and a size complaint
/// may arrive with any 4xx status.
pub fn classify(err: &TransportError) -> ServerErrorKind {
    let TransportError::Http { status, body, .. } = err else {
        return ServerErrorKind::Unrecognized;
    };

    if ROUTE_NOT_FOUND.is_match(body) {
        return ServerErrorKind::RouteNotFound;
    }

    if let Some(limit) = SIZE_CEILING
        .captures(body)
        .and_then(|caps| caps[1].replace(',', "").parse::<u32>().ok())
    {
        return ServerErrorKind::SizeCeiling(limit);
    }

    if *status == 409 || ALREADY_EXISTS.is_match(body) {
        return ServerErrorKind::AlreadyExists;
    }

    if *status == 404 || NOT_FOUND.is_match(body) {
        return ServerErrorKind::NotFound;
    }

    ServerErrorKind::Unrecognized
}
