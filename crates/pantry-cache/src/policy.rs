//! TTL policy for positive and negative cache entries

use std::time::Duration;

use crate::error::{CacheError, Result};
use crate::tier::CachedValue;

/// Default lifetime of a cached record
pub const DEFAULT_POSITIVE_TTL: Duration = Duration::from_secs(60 * 60);
/// Default lifetime of a confirmed not-found marker
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(5 * 60);

/// How long each kind of cache entry lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl CachePolicy {
    /// Build a policy; the negative TTL must be non-zero and strictly shorter
    /// than the positive one.
    pub fn new(positive_ttl: Duration, negative_ttl: Duration) -> Result<Self> {
        if negative_ttl.is_zero() {
            return Err(CacheError::Config(
                "negative TTL must be greater than zero".to_string(),
            ));
        }
        if negative_ttl >= positive_ttl {
            return Err(CacheError::Config(format!(
                "negative TTL ({}s) must be shorter than positive TTL ({}s)",
                negative_ttl.as_secs(),
                positive_ttl.as_secs()
            )));
        }
        Ok(Self {
            positive_ttl,
            negative_ttl,
        })
    }

    pub fn positive_ttl(&self) -> Duration {
        self.positive_ttl
    }

    pub fn negative_ttl(&self) -> Duration {
        self.negative_ttl
    }

    /// TTL that applies to the given value
    pub fn ttl_for(&self, value: &CachedValue) -> Duration {
        match value {
            CachedValue::Positive(_) => self.positive_ttl,
            CachedValue::Negative => self.negative_ttl,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            positive_ttl: DEFAULT_POSITIVE_TTL,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
        }
    }
}
