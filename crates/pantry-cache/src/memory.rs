//! In-process cache tier on moka

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use pantry_records::{EntityType, RecordKey};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::tier::{CacheEntry, CacheStats, CacheTier, CachedValue};

const DEFAULT_CAPACITY: u64 = 10_000;

#[derive(Clone)]
struct Slot {
    entry: CacheEntry,
    ttl: Duration,
}

/// Expires each slot after its own TTL; a re-put restarts the clock
struct SlotExpiry;

impl Expiry<RecordKey, Slot> for SlotExpiry {
    fn expire_after_create(
        &self,
        _key: &RecordKey,
        slot: &Slot,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(slot.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &RecordKey,
        slot: &Slot,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(slot.ttl)
    }
}

/// Bounded in-process cache with per-entry TTL
pub struct MemoryCacheTier {
    cache: Cache<RecordKey, Slot>,
    unavailable: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl MemoryCacheTier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(SlotExpiry)
            .build();

        Self {
            cache,
            unavailable: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Make every operation fail as if the backend were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Flush moka's pending maintenance so `entry_count` is exact
    pub async fn sync(&self) {
        self.cache.run_pending_tasks().await;
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return Err(CacheError::Unavailable(
                "memory cache switched off".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MemoryCacheTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheTier for MemoryCacheTier {
    async fn get(&self, entity_type: EntityType, identifier: &str) -> Result<Option<CacheEntry>> {
        self.check_available()?;
        let key = RecordKey::new(entity_type, identifier);
        match self.cache.get(&key).await {
            Some(slot) if !slot.entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(slot.entry))
            }
            Some(_) => {
                self.cache.invalidate(&key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn put(
        &self,
        entity_type: EntityType,
        identifier: &str,
        value: CachedValue,
        ttl: Duration,
    ) -> Result<()> {
        self.check_available()?;
        let slot = Slot {
            entry: CacheEntry::new(value, ttl),
            ttl,
        };
        self.cache
            .insert(RecordKey::new(entity_type, identifier), slot)
            .await;
        Ok(())
    }

    async fn invalidate(&self, entity_type: EntityType, identifier: &str) -> Result<()> {
        self.check_available()?;
        self.cache
            .invalidate(&RecordKey::new(entity_type, identifier))
            .await;
        Ok(())
    }

    async fn invalidate_all(&self, entity_type: EntityType) -> Result<()> {
        self.check_available()?;
        let keys: Vec<RecordKey> = self
            .cache
            .iter()
            .filter(|(key, _)| key.entity_type == entity_type)
            .map(|(key, _)| RecordKey::clone(&key))
            .collect();
        debug!(entity_type = %entity_type, count = keys.len(), "Invalidating cached entity type");
        for key in keys {
            self.cache.invalidate(&key).await;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.check_available()?;
        self.cache.invalidate_all();
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            backend: "memory",
            entries: Some(self.cache.entry_count()),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
