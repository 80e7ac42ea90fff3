//! In-process store for tests and local runs

use async_trait::async_trait;
use chrono::{Duration, Utc};
use pantry_records::{CanonicalRecord, EntityType};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::store::{IngestionLog, LeaseStore, RecordStore};
use crate::types::{Checkpoint, IngestionBatch, Lease, UpsertOutcome};

type PairKey = (EntityType, String);

#[derive(Default)]
struct State {
    records: HashMap<PairKey, CanonicalRecord>,
    batches: BTreeMap<i64, IngestionBatch>,
    next_batch_id: i64,
    checkpoints: HashMap<PairKey, Checkpoint>,
    leases: HashMap<PairKey, Lease>,
    failing_ids: HashSet<String>,
}

/// Store backed by process memory. Mirrors the Postgres semantics, plus
/// switches for simulating outages.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    delay_ms: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every record operation fail with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every record operation
    pub fn set_delay(&self, delay: std::time::Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make upserts of this identifier fail
    pub async fn fail_upserts_for(&self, identifier: impl Into<String>) {
        self.state.lock().await.failing_ids.insert(identifier.into());
    }

    /// Number of `get_by_id` calls served
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Number of `upsert` calls served
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub async fn len(&self, entity_type: EntityType) -> usize {
        self.state
            .lock()
            .await
            .records
            .keys()
            .filter(|(e, _)| *e == entity_type)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.records.is_empty()
    }

    async fn gate(&self) -> Result<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_by_id(
        &self,
        entity_type: EntityType,
        identifier: &str,
    ) -> Result<Option<CanonicalRecord>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.gate().await?;
        let state = self.state.lock().await;
        Ok(state
            .records
            .get(&(entity_type, identifier.to_string()))
            .cloned())
    }

    async fn upsert(&self, record: &CanonicalRecord) -> Result<UpsertOutcome> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.gate().await?;
        let mut state = self.state.lock().await;
        if state.failing_ids.contains(&record.identifier) {
            return Err(StoreError::Unavailable(format!(
                "write of {} rejected",
                record.identifier
            )));
        }

        let key = (record.entity_type(), record.identifier.clone());
        let outcome = match state.records.get(&key) {
            None => UpsertOutcome::Inserted { version: 1 },
            Some(existing) if record.last_updated > existing.last_updated => {
                UpsertOutcome::Updated {
                    version: existing.version + 1,
                }
            }
            Some(existing) => {
                return Ok(UpsertOutcome::ConflictIgnored {
                    version: existing.version,
                })
            }
        };
        state.records.insert(
            key,
            CanonicalRecord {
                version: outcome.version(),
                ..record.clone()
            },
        );
        Ok(outcome)
    }
}

#[async_trait]
impl IngestionLog for MemoryStore {
    async fn create_batch(&self, batch: &IngestionBatch) -> Result<IngestionBatch> {
        let mut state = self.state.lock().await;
        state.next_batch_id += 1;
        let created = IngestionBatch {
            batch_id: state.next_batch_id,
            ..batch.clone()
        };
        state.batches.insert(created.batch_id, created.clone());
        Ok(created)
    }

    async fn update_batch(&self, batch: &IngestionBatch) -> Result<()> {
        let mut state = self.state.lock().await;
        let stored = state
            .batches
            .get_mut(&batch.batch_id)
            .ok_or(StoreError::BatchNotFound(batch.batch_id))?;
        if stored.status.is_terminal() {
            return Err(StoreError::BatchFinalized(batch.batch_id));
        }
        *stored = batch.clone();
        Ok(())
    }

    async fn get_batch(&self, batch_id: i64) -> Result<Option<IngestionBatch>> {
        Ok(self.state.lock().await.batches.get(&batch_id).cloned())
    }

    async fn recent_batches(&self, limit: i64) -> Result<Vec<IngestionBatch>> {
        let state = self.state.lock().await;
        Ok(state
            .batches
            .values()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn load_checkpoint(
        &self,
        entity_type: EntityType,
        source: &str,
    ) -> Result<Option<Checkpoint>> {
        let state = self.state.lock().await;
        Ok(state
            .checkpoints
            .get(&(entity_type, source.to_string()))
            .cloned())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut state = self.state.lock().await;
        state.checkpoints.insert(
            (checkpoint.entity_type, checkpoint.source.clone()),
            checkpoint.clone(),
        );
        Ok(())
    }

    async fn clear_checkpoint(&self, entity_type: EntityType, source: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.checkpoints.remove(&(entity_type, source.to_string()));
        Ok(())
    }
}

#[async_trait]
impl LeaseStore for MemoryStore {
    async fn try_acquire(
        &self,
        entity_type: EntityType,
        source: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>> {
        let mut state = self.state.lock().await;
        let key = (entity_type, source.to_string());
        let now = Utc::now();
        if let Some(held) = state.leases.get(&key) {
            if held.expires_at > now {
                return Ok(None);
            }
        }
        let lease = Lease {
            entity_type,
            source: source.to_string(),
            owner: owner.to_string(),
            expires_at: now + ttl,
        };
        state.leases.insert(key, lease.clone());
        Ok(Some(lease))
    }

    async fn renew(
        &self,
        entity_type: EntityType,
        source: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.leases.get_mut(&(entity_type, source.to_string())) {
            Some(lease) if lease.owner == owner => {
                lease.expires_at = Utc::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, entity_type: EntityType, source: &str, owner: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let key = (entity_type, source.to_string());
        if state.leases.get(&key).is_some_and(|l| l.owner == owner) {
            state.leases.remove(&key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BatchStatus;
    use chrono::TimeZone;
    use pantry_records::{NutritionFact, RecordPayload};

    fn beans(at: chrono::DateTime<Utc>) -> CanonicalRecord {
        CanonicalRecord::new(
            "5000112637922",
            "off",
            at,
            RecordPayload::NutritionFact(NutritionFact {
                product_name: Some("Baked Beans".to_string()),
                ..Default::default()
            }),
        )
    }

    fn may(day: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_same_timestamp_is_noop() {
        let store = MemoryStore::new();
        let record = beans(may(1));

        assert_eq!(
            store.upsert(&record).await.unwrap(),
            UpsertOutcome::Inserted { version: 1 }
        );
        assert_eq!(
            store.upsert(&record).await.unwrap(),
            UpsertOutcome::ConflictIgnored { version: 1 }
        );

        let stored = store
            .get_by_id(EntityType::NutritionFact, "5000112637922")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_newer_record_bumps_version_older_is_ignored() {
        let store = MemoryStore::new();
        store.upsert(&beans(may(2))).await.unwrap();

        let outcome = store.upsert(&beans(may(3))).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated { version: 2 });

        let outcome = store.upsert(&beans(may(1))).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::ConflictIgnored { version: 2 });

        let stored = store
            .get_by_id(EntityType::NutritionFact, "5000112637922")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.last_updated, may(3));
    }

    #[tokio::test]
    async fn test_identifier_scoped_per_entity_type() {
        let store = MemoryStore::new();
        store.upsert(&beans(may(1))).await.unwrap();
        let miss = store
            .get_by_id(EntityType::PricePoint, "5000112637922")
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_upsert_batch_isolates_failures() {
        let store = MemoryStore::new();
        let mut other = beans(may(1));
        other.identifier = "50000000".to_string();
        store.fail_upserts_for("50000000").await;

        let results = store.upsert_batch(&[beans(may(1)), other]).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].outcome.is_ok());
        assert_eq!(results[1].identifier, "50000000");
        assert!(results[1].outcome.is_err());
        assert_eq!(store.len(EntityType::NutritionFact).await, 1);
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store
            .get_by_id(EntityType::Establishment, "1")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_terminal_batch_is_immutable() {
        let store = MemoryStore::new();
        let mut batch = store
            .create_batch(&IngestionBatch::pending(EntityType::Establishment, "fsa"))
            .await
            .unwrap();
        assert_eq!(batch.batch_id, 1);

        batch.status = BatchStatus::Fetching;
        batch.records_fetched = 4;
        store.update_batch(&batch).await.unwrap();

        batch.finish(BatchStatus::Succeeded, None);
        store.update_batch(&batch).await.unwrap();

        batch.records_failed = 1;
        let err = store.update_batch(&batch).await.unwrap_err();
        assert!(matches!(err, StoreError::BatchFinalized(1)));

        let stored = store.get_batch(1).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Succeeded);
        assert_eq!(stored.records_failed, 0);
    }

    #[tokio::test]
    async fn test_recent_batches_newest_first() {
        let store = MemoryStore::new();
        for _ in 0..3 {
            store
                .create_batch(&IngestionBatch::pending(EntityType::PricePoint, "open_prices"))
                .await
                .unwrap();
        }
        let recent = store.recent_batches(2).await.unwrap();
        let ids: Vec<i64> = recent.iter().map(|b| b.batch_id).collect();
        assert_eq!(ids, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_checkpoint_save_load_clear() {
        let store = MemoryStore::new();
        let checkpoint = Checkpoint {
            entity_type: EntityType::Establishment,
            source: "fsa".to_string(),
            cursor: Some("3".to_string()),
            offset: 40,
            updated_at: Utc::now(),
        };
        store.save_checkpoint(&checkpoint).await.unwrap();
        let loaded = store
            .load_checkpoint(EntityType::Establishment, "fsa")
            .await
            .unwrap();
        assert_eq!(loaded, Some(checkpoint));

        store
            .clear_checkpoint(EntityType::Establishment, "fsa")
            .await
            .unwrap();
        assert!(store
            .load_checkpoint(EntityType::Establishment, "fsa")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lease_conflict_and_renewal() {
        let store = MemoryStore::new();
        let ttl = Duration::minutes(15);
        let lease = store
            .try_acquire(EntityType::Establishment, "fsa", "worker-a", ttl)
            .await
            .unwrap();
        assert!(lease.is_some());

        let second = store
            .try_acquire(EntityType::Establishment, "fsa", "worker-b", ttl)
            .await
            .unwrap();
        assert!(second.is_none());

        assert!(store
            .renew(EntityType::Establishment, "fsa", "worker-a", ttl)
            .await
            .unwrap());
        assert!(!store
            .renew(EntityType::Establishment, "fsa", "worker-b", ttl)
            .await
            .unwrap());

        // Other pairs are independent
        assert!(store
            .try_acquire(EntityType::Establishment, "other", "worker-b", ttl)
            .await
            .unwrap()
            .is_some());

        store
            .release(EntityType::Establishment, "fsa", "worker-a")
            .await
            .unwrap();
        assert!(store
            .try_acquire(EntityType::Establishment, "fsa", "worker-b", ttl)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_stale_lease_can_be_taken_over() {
        let store = MemoryStore::new();
        store
            .try_acquire(EntityType::NutritionFact, "off", "crashed", Duration::zero())
            .await
            .unwrap();

        let lease = store
            .try_acquire(EntityType::NutritionFact, "off", "fresh", Duration::minutes(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(lease.owner, "fresh");
        assert!(!store
            .renew(EntityType::NutritionFact, "off", "crashed", Duration::minutes(5))
            .await
            .unwrap());
    }
}
