use thiserror::Error;

use crate::filter::FilterError;
use crate::storage::DatabaseError;
use crate::util::UrlValidationError;

/// Network and HTTP-level failures of a single feed fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Response status other than 2xx or 304
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the size cap
    #[error("Response too large (exceeds {limit} bytes)")]
    ResponseTooLarge { limit: usize },
    /// Fewer bytes arrived than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// The response body is not a usable RSS/Atom document.
#[derive(Debug, Error)]
#[error("Parse error: {0}")]
pub struct ParseError(pub String);

/// Coarse classification of an [`UpdateError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Fetch,
    Parse,
    Filter,
    Persistence,
}

/// Any failure of one feed's update. Never fatal to the whole cycle.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Malformed URL, disallowed scheme or blocked destination
    #[error(transparent)]
    Validation(#[from] UrlValidationError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Persistence(#[from] DatabaseError),
}

impl UpdateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdateError::Validation(_) => ErrorKind::Validation,
            UpdateError::Fetch(_) => ErrorKind::Fetch,
            UpdateError::Parse(_) => ErrorKind::Parse,
            UpdateError::Filter(_) => ErrorKind::Filter,
            UpdateError::Persistence(_) => ErrorKind::Persistence,
        }
    }
}
