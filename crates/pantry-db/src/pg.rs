//! Postgres-backed store

use async_trait::async_trait;
use chrono::Duration;
use pantry_records::{CanonicalRecord, EntityType};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use crate::error::Result;
use crate::store::{IngestionLog, LeaseStore, RecordStore};
use crate::types::{Checkpoint, IngestionBatch, Lease, UpsertOutcome};
use crate::{batches, checkpoints, leases, records};

/// Record store, ingestion log and lease table on one connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("Connecting to database...");
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        info!("Database connection established");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations
    pub async fn migrate(&self) -> Result<()> {
        crate::migrate::migrate(&self.pool).await
    }

    pub async fn count(&self, entity_type: EntityType) -> Result<i64> {
        records::count(&self.pool, entity_type).await
    }
}

#[async_trait]
impl RecordStore for PgStore {
    async fn get_by_id(
        &self,
        entity_type: EntityType,
        identifier: &str,
    ) -> Result<Option<CanonicalRecord>> {
        records::get(&self.pool, entity_type, identifier).await
    }

    async fn upsert(&self, record: &CanonicalRecord) -> Result<UpsertOutcome> {
        let outcome = records::upsert(&self.pool, record).await?;
        debug!(
            entity_type = %record.entity_type(),
            id = %record.identifier,
            ?outcome,
            "Upserted record"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl IngestionLog for PgStore {
    async fn create_batch(&self, batch: &IngestionBatch) -> Result<IngestionBatch> {
        batches::create(&self.pool, batch).await
    }

    async fn update_batch(&self, batch: &IngestionBatch) -> Result<()> {
        batches::update(&self.pool, batch).await
    }

    async fn get_batch(&self, batch_id: i64) -> Result<Option<IngestionBatch>> {
        batches::get(&self.pool, batch_id).await
    }

    async fn recent_batches(&self, limit: i64) -> Result<Vec<IngestionBatch>> {
        batches::recent(&self.pool, limit).await
    }

    async fn load_checkpoint(
        &self,
        entity_type: EntityType,
        source: &str,
    ) -> Result<Option<Checkpoint>> {
        checkpoints::load(&self.pool, entity_type, source).await
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        checkpoints::save(&self.pool, checkpoint).await
    }

    async fn clear_checkpoint(&self, entity_type: EntityType, source: &str) -> Result<()> {
        checkpoints::clear(&self.pool, entity_type, source).await
    }
}

#[async_trait]
impl LeaseStore for PgStore {
    async fn try_acquire(
        &self,
        entity_type: EntityType,
        source: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<Lease>> {
        leases::try_acquire(&self.pool, entity_type, source, owner, ttl).await
    }

    async fn renew(
        &self,
        entity_type: EntityType,
        source: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool> {
        leases::renew(&self.pool, entity_type, source, owner, ttl).await
    }

    async fn release(&self, entity_type: EntityType, source: &str, owner: &str) -> Result<()> {
        leases::release(&self.pool, entity_type, source, owner).await
    }
}
