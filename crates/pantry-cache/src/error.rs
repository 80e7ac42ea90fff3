use std::fmt;
use std::time::Duration;

/// Errors from a cache tier
#[derive(Debug)]
pub enum CacheError {
    /// Backend unreachable or refused the command
    Unavailable(String),
    /// Backend did not answer within the configured timeout
    Timeout(Duration),
    /// Stored value could not be encoded or decoded
    Serialization(String),
    /// Invalid cache configuration
    Config(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Unavailable(msg) => write!(f, "Cache unavailable: {}", msg),
            CacheError::Timeout(d) => write!(f, "Cache timed out after {}ms", d.as_millis()),
            CacheError::Serialization(msg) => write!(f, "Cache serialization error: {}", msg),
            CacheError::Config(msg) => write!(f, "Cache configuration error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CacheError::Timeout(Duration::from_millis(50)).to_string(),
            "Cache timed out after 50ms"
        );
        assert_eq!(
            CacheError::Unavailable("connection refused".to_string()).to_string(),
            "Cache unavailable: connection refused"
        );
    }
}
