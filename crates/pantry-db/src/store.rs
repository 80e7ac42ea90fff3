//! Storage contracts shared by the Postgres and in-memory backends

use async_trait::async_trait;
use chrono::Duration;
use pantry_records::{CanonicalRecord, EntityType};

use crate::error::Result;
use crate::types::{Checkpoint, IngestionBatch, Lease, RecordResult, UpsertOutcome};

/// Durable home of canonical records
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_by_id(
        &self,
        entity_type: EntityType,
        identifier: &str,
    ) -> Result<Option<CanonicalRecord>>;

    /// Insert or update keyed on `(entity_type, identifier)`.
    ///
    /// A record whose `last_updated` is not newer than the stored one leaves
    /// the row untouched and reports `ConflictIgnored`.
    async fn upsert(&self, record: &CanonicalRecord) -> Result<UpsertOutcome>;

    /// Upsert each record independently; one failure does not stop the rest
    async fn upsert_batch(&self, records: &[CanonicalRecord]) -> Vec<RecordResult> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            results.push(RecordResult {
                identifier: record.identifier.clone(),
                outcome: self.upsert(record).await,
            });
        }
        results
    }
}

/// Batch audit log and resumable checkpoints
#[async_trait]
pub trait IngestionLog: Send + Sync {
    /// Persist a new batch and return it with its assigned id
    async fn create_batch(&self, batch: &IngestionBatch) -> Result<IngestionBatch>;

    /// Overwrite a batch's mutable fields. Fails with `BatchFinalized` once
    /// the stored batch is terminal.
    async fn update_batch(&self, batch: &IngestionBatch) -> Result<()>;

    async fn get_batch(&self, batch_id: i64) -> Result<Option<IngestionBatch>>;

    /// Most recent batches first
    async fn recent_batches(&self, limit: i64) -> Result<Vec<IngestionBatch>>;

    async fn load_checkpoint(
        &self,
        entity_type: EntityType,
        source: &str,
    ) -> Result<Option<Checkpoint>>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn clear_checkpoint(&self, entity_type: EntityType, source: &str) -> Result<()>;
}

/// Expiring single-owner locks for ETL runs
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take the lease if it is free or expired. `None` means another owner holds it.
    async fn try_acquire(
        &self,
        entity_type: EntityType,
        source: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>>;

    /// Extend a held lease; `false` if `owner` no longer holds it
    async fn renew(
        &self,
        entity_type: EntityType,
        source: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool>;

    async fn release(&self, entity_type: EntityType, source: &str, owner: &str) -> Result<()>;
}
