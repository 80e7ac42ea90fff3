//! Error types for the FSA API client

use std::fmt;
use std::time::Duration;

/// Errors that can occur when interacting with the FSA API
#[derive(Debug)]
pub enum FsaError {
    /// HTTP request failed (connect, timeout, body decode)
    Http(reqwest::Error),
    /// Failed to parse JSON response
    Json(serde_json::Error),
    /// FSA answered 429; `retry_after` comes from the `Retry-After` header
    RateLimited { retry_after: Option<Duration> },
    /// Any other non-success status
    Status { status: u16, body: String },
}

impl FsaError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Json(_) => false,
            Self::RateLimited { .. } => true,
            Self::Status { status, .. } => *status >= 500,
        }
    }
}

impl fmt::Display for FsaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "FSA HTTP error: {}", e),
            Self::Json(e) => write!(f, "FSA JSON parse error: {}", e),
            Self::RateLimited {
                retry_after: Some(d),
            } => write!(f, "FSA rate limited; retry after {}s", d.as_secs()),
            Self::RateLimited { retry_after: None } => write!(f, "FSA rate limited"),
            Self::Status { status, body } => write!(f, "FSA returned {}: {}", status, body),
        }
    }
}

impl std::error::Error for FsaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e),
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FsaError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

impl From<serde_json::Error> for FsaError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Result type for FSA API operations
pub type Result<T> = std::result::Result<T, FsaError>;
