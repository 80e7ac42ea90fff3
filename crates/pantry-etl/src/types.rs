//! Core types for the Pantry ETL worker

use pantry_db::{BatchStatus, IngestionBatch};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Running totals across batches
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EtlStats {
    pub batches_succeeded: u64,
    pub batches_partial: u64,
    pub batches_failed: u64,
    pub lease_conflicts: u64,
    pub records_fetched: u64,
    pub records_upserted: u64,
    pub records_unchanged: u64,
    pub records_failed: u64,
    pub invalidation_errors: u64,
}

impl EtlStats {
    /// Fold a finished batch into the totals
    pub fn add_batch(&mut self, batch: &IngestionBatch) {
        match batch.status {
            BatchStatus::Succeeded => self.batches_succeeded += 1,
            BatchStatus::Partial => self.batches_partial += 1,
            BatchStatus::Failed => self.batches_failed += 1,
            _ => {}
        }
        self.records_fetched += batch.records_fetched.max(0) as u64;
        self.records_upserted += batch.records_upserted.max(0) as u64;
        self.records_unchanged += batch.records_unchanged.max(0) as u64;
        self.records_failed += batch.records_failed.max(0) as u64;
    }
}

/// Knobs for one pipeline
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Records processed between checkpoint writes
    pub checkpoint_interval: u64,
    /// Lease lifetime without renewal
    pub lease_timeout: Duration,
    /// Times a rate-limited fetch is waited out before the batch fails
    pub max_rate_limit_waits: u32,
    /// Prefix for lease owner names
    pub owner: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            checkpoint_interval: 500,
            lease_timeout: Duration::from_secs(15 * 60),
            max_rate_limit_waits: 3,
            owner: format!("pantry-etl-{}", std::process::id()),
        }
    }
}
