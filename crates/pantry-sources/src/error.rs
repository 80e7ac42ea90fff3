use pantry_records::EntityType;
use std::fmt;
use std::time::Duration;

/// Why an adapter could not answer
#[derive(Debug)]
pub enum SourceError {
    /// Upstream unreachable or failing; try again later
    Unavailable(String),
    /// Upstream throttled us
    RateLimited { retry_after: Option<Duration> },
    /// No answer within the adapter timeout
    Timeout(Duration),
    /// Upstream refused the request (4xx other than 404/429)
    Upstream { status: u16, message: String },
    /// Upstream answered but the payload could not be mapped
    Malformed(String),
    /// This adapter does not serve the entity type
    Unsupported {
        source: &'static str,
        entity_type: EntityType,
    },
}

impl SourceError {
    /// Upstream's requested wait, when it gave one
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether the same call may succeed later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "source unavailable: {}", msg),
            Self::RateLimited {
                retry_after: Some(d),
            } => write!(f, "rate limited; retry after {}s", d.as_secs()),
            Self::RateLimited { retry_after: None } => write!(f, "rate limited"),
            Self::Timeout(d) => write!(f, "source timed out after {}ms", d.as_millis()),
            Self::Upstream { status, message } => {
                write!(f, "upstream rejected request ({}): {}", status, message)
            }
            Self::Malformed(msg) => write!(f, "malformed upstream data: {}", msg),
            Self::Unsupported {
                source,
                entity_type,
            } => write!(f, "source '{}' does not serve {}", source, entity_type),
        }
    }
}

impl std::error::Error for SourceError {}

impl From<fsa_api::FsaError> for SourceError {
    fn from(err: fsa_api::FsaError) -> Self {
        use fsa_api::FsaError;
        match err {
            FsaError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            FsaError::Status { status, body } if status < 500 => Self::Upstream {
                status,
                message: body,
            },
            FsaError::Json(e) => Self::Malformed(e.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl From<off_api::OffError> for SourceError {
    fn from(err: off_api::OffError) -> Self {
        use off_api::OffError;
        match err {
            OffError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            OffError::Status { status, body } if status < 500 => Self::Upstream {
                status,
                message: body,
            },
            OffError::Json(e) => Self::Malformed(e.to_string()),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, SourceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let err = SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(5)));
        assert!(err.is_transient());
        assert_eq!(SourceError::Unavailable("x".into()).retry_after(), None);
    }

    #[test]
    fn test_upstream_status_mapping() {
        let err: SourceError = fsa_api::FsaError::Status {
            status: 403,
            body: "forbidden".to_string(),
        }
        .into();
        assert!(matches!(err, SourceError::Upstream { status: 403, .. }));
        assert!(!err.is_transient());

        let err: SourceError = off_api::OffError::Status {
            status: 502,
            body: String::new(),
        }
        .into();
        assert!(matches!(err, SourceError::Unavailable(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_unsupported_display() {
        let err = SourceError::Unsupported {
            source: "fsa",
            entity_type: EntityType::PricePoint,
        };
        assert_eq!(err.to_string(), "source 'fsa' does not serve price_point");
    }
}
