//! Error types for the record store

use std::fmt;

/// Errors raised by record store, ingestion log and lease operations
#[derive(Debug)]
pub enum StoreError {
    /// Database query failed
    Database(Box<sqlx::Error>),
    /// Migrations could not be applied
    Migration(String),
    /// A stored row could not be decoded back into a record
    Corrupt(String),
    /// Attempted to mutate a batch that already reached a terminal status
    BatchFinalized(i64),
    /// Batch id does not exist
    BatchNotFound(i64),
    /// Store is not reachable
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Migration(msg) => write!(f, "Migration error: {}", msg),
            StoreError::Corrupt(msg) => write!(f, "Corrupt row: {}", msg),
            StoreError::BatchFinalized(id) => {
                write!(f, "Ingestion batch {} is already finalized", id)
            }
            StoreError::BatchNotFound(id) => write!(f, "Ingestion batch {} not found", id),
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Database(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(Box::new(err))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Corrupt(err.to_string())
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::BatchFinalized(7);
        assert_eq!(err.to_string(), "Ingestion batch 7 is already finalized");

        let err = StoreError::Unavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Store unavailable: connection refused");
    }

    #[test]
    fn test_from_sqlx_error() {
        let err: StoreError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StoreError::Database(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
