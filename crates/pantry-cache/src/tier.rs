//! The cache tier contract

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pantry_records::{CanonicalRecord, EntityType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Key prefix used by the remote cache
pub const DEFAULT_KEY_PREFIX: &str = "pantry";

/// What a cache slot holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum CachedValue {
    Positive(CanonicalRecord),
    /// Upstream confirmed the record does not exist
    Negative,
}

impl CachedValue {
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Negative)
    }
}

/// A cached value with its absolute expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: CachedValue,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(value: CachedValue, ttl: Duration) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { value, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Hit/miss/error counters for a tier
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    /// `None` when the backend cannot count cheaply
    pub entries: Option<u64>,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

/// Remote key for a record: `{prefix}:{entity_type}:{identifier}`
pub fn cache_key(prefix: &str, entity_type: EntityType, identifier: &str) -> String {
    format!("{}:{}:{}", prefix, entity_type, identifier)
}

/// Disposable key-value layer in front of the record store.
///
/// `put` is last-write-wins by arrival; nothing here is authoritative and a
/// tier may be flushed at any time.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Returns `None` for a miss, including entries past their `expires_at`
    async fn get(&self, entity_type: EntityType, identifier: &str) -> Result<Option<CacheEntry>>;

    async fn put(
        &self,
        entity_type: EntityType,
        identifier: &str,
        value: CachedValue,
        ttl: Duration,
    ) -> Result<()>;

    async fn invalidate(&self, entity_type: EntityType, identifier: &str) -> Result<()>;

    /// Drop every entry of one entity type
    async fn invalidate_all(&self, entity_type: EntityType) -> Result<()>;

    /// Drop every entry
    async fn flush(&self) -> Result<()>;

    fn stats(&self) -> CacheStats;
}
