//! Header parsing utilities for API requests.

use axum::http::{header, HeaderMap};

use crate::error::ApiError;

/// Header carrying the shared secret
pub const INTERNAL_KEY_HEADER: &str = "x-internal-key";

/// Extension trait for convenient header parsing.
pub trait HeaderMapExt {
    /// Get a header value as a string, returning None if missing.
    fn get_str(&self, name: &str) -> Option<&str>;

    /// Get a header value parsed as a type, returning None if missing or invalid.
    fn get_parsed<T: std::str::FromStr>(&self, name: &str) -> Option<T>;

    /// Check `x-internal-key` against the configured secret.
    fn require_internal_key(&self, expected: &str) -> Result<(), ApiError>;

    /// Whether the `Accept` header lists `mime`.
    fn accepts(&self, mime: &str) -> bool;
}

impl HeaderMapExt for HeaderMap {
    fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }

    fn get_parsed<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.get_str(name).and_then(|v| v.trim().parse().ok())
    }

    fn require_internal_key(&self, expected: &str) -> Result<(), ApiError> {
        match self.get_str(INTERNAL_KEY_HEADER) {
            Some(given) if constant_time_eq(given.as_bytes(), expected.as_bytes()) => Ok(()),
            _ => Err(ApiError::Unauthorized),
        }
    }

    fn accepts(&self, mime: &str) -> bool {
        self.get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(|item| item.split(';').next())
            .any(|item| item.trim().eq_ignore_ascii_case(mime))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
