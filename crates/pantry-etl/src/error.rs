//! Error types for the Pantry ETL worker

use pantry_cache::CacheError;
use pantry_db::StoreError;
use pantry_records::EntityType;
use pantry_sources::SourceError;
use std::fmt;

#[derive(Debug)]
pub enum EtlError {
    Store(StoreError),
    Source(SourceError),
    Cache(CacheError),
    /// Another run holds the lease for this `(entity_type, source)` pair
    LeaseConflict {
        entity_type: EntityType,
        source: String,
    },
    NoSource(EntityType),
    Config(String),
    Io(std::io::Error),
}

impl fmt::Display for EtlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtlError::Store(err) => write!(f, "Store error: {}", err),
            EtlError::Source(err) => write!(f, "Source error: {}", err),
            EtlError::Cache(err) => write!(f, "Cache error: {}", err),
            EtlError::LeaseConflict {
                entity_type,
                source,
            } => write!(
                f,
                "Lease conflict: another batch is ingesting {} from {}",
                entity_type, source
            ),
            EtlError::NoSource(entity_type) => {
                write!(f, "No source configured for {}", entity_type)
            }
            EtlError::Config(msg) => write!(f, "Configuration error: {}", msg),
            EtlError::Io(err) => write!(f, "IO error: {}", err),
        }
    }
}

impl std::error::Error for EtlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EtlError::Store(err) => Some(err),
            EtlError::Source(err) => Some(err),
            EtlError::Cache(err) => Some(err),
            EtlError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for EtlError {
    fn from(err: StoreError) -> Self {
        EtlError::Store(err)
    }
}

impl From<SourceError> for EtlError {
    fn from(err: SourceError) -> Self {
        EtlError::Source(err)
    }
}

impl From<CacheError> for EtlError {
    fn from(err: CacheError) -> Self {
        EtlError::Cache(err)
    }
}

impl From<fsa_api::FsaError> for EtlError {
    fn from(err: fsa_api::FsaError) -> Self {
        EtlError::Config(format!("FSA client: {}", err))
    }
}

impl From<off_api::OffError> for EtlError {
    fn from(err: off_api::OffError) -> Self {
        EtlError::Config(format!("OFF client: {}", err))
    }
}

impl From<pantry_records::ParseEntityTypeError> for EtlError {
    fn from(err: pantry_records::ParseEntityTypeError) -> Self {
        EtlError::Config(err.to_string())
    }
}

impl From<tracing_subscriber::filter::ParseError> for EtlError {
    fn from(err: tracing_subscriber::filter::ParseError) -> Self {
        EtlError::Config(err.to_string())
    }
}

impl From<std::io::Error> for EtlError {
    fn from(err: std::io::Error) -> Self {
        EtlError::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
