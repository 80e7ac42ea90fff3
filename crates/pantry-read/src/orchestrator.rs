use pantry_cache::{CacheError, CachePolicy, CacheStats, CacheTier, CachedValue};
use pantry_db::{RecordStore, StoreError, UpsertOutcome};
use pantry_records::{
    normalize_identifier, validate, validate_identifier, CanonicalRecord, EntityType,
};
use pantry_sources::{with_timeout, SourceAdapter, SourceError, SourceRegistry, ThrottleGate};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::types::{Counters, Lookup, ReadStats, Tier, TierTimeouts};

/// Coordinates reads across the cache tier, the record store and the
/// upstream source adapters.
///
/// Cheap to share behind an `Arc`; concurrent reads of the same key are safe
/// because every fill step is idempotent.
pub struct ReadOrchestrator {
    cache: Arc<dyn CacheTier>,
    store: Arc<dyn RecordStore>,
    sources: SourceRegistry,
    policy: CachePolicy,
    timeouts: TierTimeouts,
    throttle: Arc<ThrottleGate>,
    counters: Counters,
}

impl ReadOrchestrator {
    pub fn new(
        cache: Arc<dyn CacheTier>,
        store: Arc<dyn RecordStore>,
        sources: SourceRegistry,
    ) -> Self {
        Self {
            cache,
            store,
            sources,
            policy: CachePolicy::default(),
            timeouts: TierTimeouts::default(),
            throttle: Arc::new(ThrottleGate::new()),
            counters: Counters::default(),
        }
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TierTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Share a throttle gate with other users of the same adapters
    pub fn with_throttle(mut self, throttle: Arc<ThrottleGate>) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn throttle(&self) -> &Arc<ThrottleGate> {
        &self.throttle
    }

    pub fn stats(&self) -> ReadStats {
        self.counters.snapshot()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Look up one record, cache first, then store, then upstream.
    pub async fn read(&self, entity_type: EntityType, identifier: &str) -> Lookup {
        Counters::bump(&self.counters.reads);
        let id = normalize_identifier(entity_type, identifier);
        let id = id.as_str();
        if let Err(e) = validate_identifier(entity_type, id) {
            debug!(entity_type = %entity_type, error = %e, "Rejected lookup");
            Counters::bump(&self.counters.not_found);
            return Lookup::NotFound;
        }

        match self.cache_get(entity_type, id).await {
            Some(CachedValue::Positive(record)) => {
                Counters::bump(&self.counters.cache_hits);
                return Lookup::Found {
                    record,
                    tier: Tier::Cache,
                };
            }
            Some(CachedValue::Negative) => {
                Counters::bump(&self.counters.negative_hits);
                Counters::bump(&self.counters.not_found);
                return Lookup::NotFound;
            }
            None => {}
        }

        match self.store_get(entity_type, id).await {
            Ok(Some(record)) => {
                self.cache_put(entity_type, id, CachedValue::Positive(record.clone()))
                    .await;
                Counters::bump(&self.counters.store_hits);
                return Lookup::Found {
                    record,
                    tier: Tier::Store,
                };
            }
            Ok(None) => {}
            Err(e) => self.tier_failed("store", entity_type, id, &e),
        }

        let Some(adapter) = self.sources.get(entity_type) else {
            return self.degraded(format!("no source registered for {}", entity_type));
        };
        self.read_upstream(adapter.as_ref(), entity_type, id).await
    }

    async fn read_upstream(
        &self,
        adapter: &dyn SourceAdapter,
        entity_type: EntityType,
        id: &str,
    ) -> Lookup {
        let source = adapter.source();
        if let Some(wait) = self.throttle.remaining(source) {
            return self.degraded(format!(
                "{} throttled for another {}s",
                source,
                wait.as_secs()
            ));
        }

        let fetched = with_timeout(
            self.timeouts.adapter,
            adapter.fetch_by_id(entity_type, id),
        )
        .await;

        match fetched {
            Ok(Some(record)) => self.accept_fetched(entity_type, id, record).await,
            Ok(None) => {
                self.cache_put(entity_type, id, CachedValue::Negative).await;
                Counters::bump(&self.counters.not_found);
                Lookup::NotFound
            }
            Err(e) => {
                if let SourceError::RateLimited { retry_after } = &e {
                    self.throttle.close(source, *retry_after);
                }
                warn!(source, entity_type = %entity_type, id, error = %e, "Upstream lookup failed");
                self.degraded(e.to_string())
            }
        }
    }

    /// Persist and cache a record fetched from upstream
    async fn accept_fetched(
        &self,
        entity_type: EntityType,
        id: &str,
        mut record: CanonicalRecord,
    ) -> Lookup {
        // Upstream may spell the same key differently (e.g. a zero-padded barcode)
        if record.entity_type() != entity_type
            || normalize_identifier(entity_type, &record.identifier) != id
        {
            return self.degraded(format!(
                "upstream answered {} for {}:{}",
                record.key(),
                entity_type,
                id
            ));
        }
        record.identifier = id.to_string();
        if let Err(e) = validate(&record) {
            warn!(entity_type = %entity_type, id, error = %e, "Upstream record failed validation");
            return self.degraded(format!("invalid upstream record: {}", e));
        }

        let record = match self.store_upsert(&record).await {
            Ok(UpsertOutcome::ConflictIgnored { .. }) => {
                // Someone stored a newer copy since our store lookup
                match self.store_get(entity_type, id).await {
                    Ok(Some(stored)) => stored,
                    Ok(None) => record,
                    Err(e) => {
                        self.tier_failed("store", entity_type, id, &e);
                        record
                    }
                }
            }
            Ok(outcome) => {
                info!(entity_type = %entity_type, id, version = outcome.version(), "Filled store from upstream");
                CanonicalRecord {
                    version: outcome.version(),
                    ..record
                }
            }
            Err(e) => {
                self.tier_failed("store", entity_type, id, &e);
                record
            }
        };

        self.cache_put(entity_type, id, CachedValue::Positive(record.clone()))
            .await;
        Counters::bump(&self.counters.adapter_hits);
        Lookup::Found {
            record,
            tier: Tier::Adapter,
        }
    }

    /// Cache lookup; any failure reads as a miss
    async fn cache_get(&self, entity_type: EntityType, id: &str) -> Option<CachedValue> {
        let result = match timeout(self.timeouts.cache, self.cache.get(entity_type, id)).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeouts.cache)),
        };
        match result {
            Ok(entry) => entry.filter(|e| !e.is_expired()).map(|e| e.value),
            Err(e) => {
                self.tier_failed("cache", entity_type, id, &e);
                None
            }
        }
    }

    async fn cache_put(&self, entity_type: EntityType, id: &str, value: CachedValue) {
        let ttl = self.policy.ttl_for(&value);
        let put = self.cache.put(entity_type, id, value, ttl);
        let result = match timeout(self.timeouts.cache, put).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(self.timeouts.cache)),
        };
        if let Err(e) = result {
            self.tier_failed("cache", entity_type, id, &e);
        }
    }

    async fn store_get(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> Result<Option<CanonicalRecord>, StoreError> {
        match timeout(self.timeouts.store, self.store.get_by_id(entity_type, id)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "no answer within {}ms",
                self.timeouts.store.as_millis()
            ))),
        }
    }

    async fn store_upsert(&self, record: &CanonicalRecord) -> Result<UpsertOutcome, StoreError> {
        match timeout(self.timeouts.store, self.store.upsert(record)).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Unavailable(format!(
                "no answer within {}ms",
                self.timeouts.store.as_millis()
            ))),
        }
    }

    fn tier_failed(
        &self,
        tier: &'static str,
        entity_type: EntityType,
        id: &str,
        error: &dyn std::error::Error,
    ) {
        Counters::bump(&self.counters.tier_failures);
        warn!(tier, entity_type = %entity_type, id, error = %error, "Tier failed, falling through");
    }

    fn degraded(&self, reason: String) -> Lookup {
        Counters::bump(&self.counters.degraded);
        Lookup::Degraded { reason }
    }
}
