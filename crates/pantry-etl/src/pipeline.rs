//! Batch ingestion: fetch pages from a source, validate, upsert, invalidate
//!
//! One [`Pipeline::run_batch`] call is one `IngestionBatch`. The batch holds
//! a lease on its `(entity_type, source)` pair for its whole life, persists a
//! resume checkpoint as it goes and ends `succeeded`, `partial` or `failed`.

use futures::StreamExt;
use pantry_cache::CacheTier;
use pantry_db::{
    BatchStatus, Checkpoint, IngestionBatch, IngestionLog, LeaseStore, RecordStore,
    UpsertOutcome,
};
use pantry_records::{validate, CanonicalRecord, EntityType};
use pantry_sources::{fetch_all, Page, SourceAdapter, SourceError, SourceRegistry, DEFAULT_THROTTLE};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{EtlError, Result};
use crate::server::SharedState;
use crate::types::PipelineSettings;

/// Records validated and upserted together between cancellation checks
const UPSERT_CHUNK: usize = 50;

static RUN_SEQ: AtomicU64 = AtomicU64::new(1);

/// How a batch stopped short of the end of its source
enum Ending {
    Complete,
    Stopped(String),
}

/// Where a stopped batch should pick up
struct ResumePoint {
    cursor: Option<String>,
    offset: usize,
}

pub struct Pipeline {
    records: Arc<dyn RecordStore>,
    log: Arc<dyn IngestionLog>,
    leases: Arc<dyn LeaseStore>,
    cache: Arc<dyn CacheTier>,
    sources: SourceRegistry,
    settings: PipelineSettings,
    status: Option<SharedState>,
}

impl Pipeline {
    pub fn new<S>(
        store: Arc<S>,
        cache: Arc<dyn CacheTier>,
        sources: SourceRegistry,
        settings: PipelineSettings,
    ) -> Self
    where
        S: RecordStore + IngestionLog + LeaseStore + 'static,
    {
        Self {
            records: store.clone(),
            log: store.clone(),
            leases: store,
            cache,
            sources,
            settings,
            status: None,
        }
    }

    /// Report progress into the status server's state
    pub fn with_status(mut self, state: SharedState) -> Self {
        self.status = Some(state);
        self
    }

    /// Run one ingestion batch for `entity_type`.
    ///
    /// Fails fast with [`EtlError::LeaseConflict`] when another batch holds
    /// the pair; no batch row is written in that case. Fetch failures and
    /// cancellation (`cancel` turning `true`) end the batch `failed` and are
    /// returned as `Ok`.
    pub async fn run_batch(
        &self,
        entity_type: EntityType,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<IngestionBatch> {
        let adapter = self
            .sources
            .get(entity_type)
            .ok_or(EtlError::NoSource(entity_type))?;
        let source = adapter.source();
        let owner = format!(
            "{}#{}",
            self.settings.owner,
            RUN_SEQ.fetch_add(1, Ordering::Relaxed)
        );

        let acquired = self
            .leases
            .try_acquire(entity_type, source, &owner, self.lease_ttl()?)
            .await?;
        if acquired.is_none() {
            warn!(entity_type = %entity_type, source, "Lease held by another batch");
            if let Some(state) = &self.status {
                state.write().await.stats.lease_conflicts += 1;
            }
            return Err(EtlError::LeaseConflict {
                entity_type,
                source: source.to_string(),
            });
        }

        let result = self.run_leased(adapter, entity_type, &owner, &mut cancel).await;

        if let Err(e) = self.leases.release(entity_type, source, &owner).await {
            warn!(entity_type = %entity_type, source, error = %e, "Failed to release lease");
        }
        result
    }

    async fn run_leased(
        &self,
        adapter: Arc<dyn SourceAdapter>,
        entity_type: EntityType,
        owner: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<IngestionBatch> {
        let source = adapter.source();
        let mut batch = self
            .log
            .create_batch(&IngestionBatch::pending(entity_type, source))
            .await?;
        info!(batch_id = batch.batch_id, entity_type = %entity_type, source, "Batch started");
        self.publish(&batch).await;

        let (status, note) = match self.drive(&adapter, &mut batch, owner, cancel).await {
            Ok(Ending::Complete) => {
                if let Err(e) = self.log.clear_checkpoint(entity_type, source).await {
                    warn!(batch_id = batch.batch_id, error = %e, "Failed to clear checkpoint");
                }
                (
                    BatchStatus::conclude(batch.records_fetched, batch.records_failed),
                    None,
                )
            }
            Ok(Ending::Stopped(note)) => (BatchStatus::Failed, Some(note)),
            Err(e) => {
                error!(batch_id = batch.batch_id, error = %e, "Batch aborted");
                (BatchStatus::Failed, Some(format!("aborted: {}", e)))
            }
        };

        batch.finish(status, note);
        self.log.update_batch(&batch).await?;
        info!(
            batch_id = batch.batch_id,
            entity_type = %entity_type,
            source,
            status = %batch.status,
            fetched = batch.records_fetched,
            upserted = batch.records_upserted,
            unchanged = batch.records_unchanged,
            failed = batch.records_failed,
            "Batch finished"
        );
        for failure in &batch.failures {
            debug!(batch_id = batch.batch_id, id = %failure.identifier, reason = %failure.reason, "Record failed");
        }
        self.publish_finished(&batch).await;
        Ok(batch)
    }

    /// Walk the source from the stored checkpoint to the end, or until the
    /// batch has to stop
    async fn drive(
        &self,
        adapter: &Arc<dyn SourceAdapter>,
        batch: &mut IngestionBatch,
        owner: &str,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<Ending> {
        let entity_type = batch.entity_type;
        let source = adapter.source();

        let (mut cursor, mut skip) = match self.log.load_checkpoint(entity_type, source).await? {
            Some(cp) => {
                info!(batch_id = batch.batch_id, cursor = ?cp.cursor, offset = cp.offset, "Resuming from checkpoint");
                (cp.cursor, cp.offset.max(0) as usize)
            }
            None => (None, 0),
        };
        let mut pages_done = 0u64;
        let mut since_checkpoint = 0u64;
        let mut rate_limit_waits = 0u32;

        'restart: loop {
            let mut pages = fetch_all(Arc::clone(adapter), entity_type, cursor.clone());
            loop {
                self.set_phase(batch, BatchStatus::Fetching).await?;

                let next = tokio::select! {
                    biased;
                    _ = cancelled(cancel) => None,
                    next = pages.next() => Some(next),
                };
                let Some(next) = next else {
                    let here = ResumePoint { cursor, offset: skip };
                    return Ok(self.stop_cancelled(batch, here).await);
                };

                let page = match next {
                    None => return Ok(Ending::Complete),
                    Some(Ok(page)) => page,
                    Some(Err(SourceError::RateLimited { retry_after }))
                        if rate_limit_waits < self.settings.max_rate_limit_waits =>
                    {
                        rate_limit_waits += 1;
                        let wait = retry_after.unwrap_or(DEFAULT_THROTTLE);
                        warn!(
                            batch_id = batch.batch_id,
                            source,
                            wait_secs = wait.as_secs(),
                            attempt = rate_limit_waits,
                            "Rate limited, waiting before refetching page"
                        );
                        if let Some(note) = self.wait_out(batch, source, owner, wait, cancel).await {
                            let here = ResumePoint { cursor, offset: skip };
                            self.save_checkpoint(batch, source, &here).await;
                            return Ok(Ending::Stopped(note));
                        }
                        continue 'restart;
                    }
                    Some(Err(e)) => {
                        let here = ResumePoint { cursor, offset: skip };
                        self.save_checkpoint(batch, source, &here).await;
                        let note = if pages_done == 0 {
                            format!("fetch could not start: {}", e)
                        } else {
                            format!(
                                "fetch failed after {} pages ({} records): {}",
                                pages_done, batch.records_fetched, e
                            )
                        };
                        warn!(batch_id = batch.batch_id, source, error = %e, "Fetch failed");
                        return Ok(Ending::Stopped(note));
                    }
                };
                rate_limit_waits = 0;

                let Page {
                    cursor: page_cursor,
                    records,
                    next_cursor,
                } = page;
                let start = skip.min(records.len());
                skip = 0;

                for chunk_start in (start..records.len()).step_by(UPSERT_CHUNK) {
                    let stop = *cancel.borrow();
                    if stop {
                        let here = ResumePoint {
                            cursor: page_cursor,
                            offset: chunk_start,
                        };
                        return Ok(self.stop_cancelled(batch, here).await);
                    }

                    let chunk_end = (chunk_start + UPSERT_CHUNK).min(records.len());
                    let chunk = &records[chunk_start..chunk_end];
                    batch.records_fetched += chunk.len() as i64;

                    batch.status = BatchStatus::Transforming;
                    let valid = transform(batch, chunk);
                    batch.status = BatchStatus::Upserting;
                    self.upsert_and_invalidate(batch, &valid).await;
                    self.log.update_batch(batch).await?;
                    self.publish(batch).await;

                    since_checkpoint += chunk.len() as u64;
                    if since_checkpoint >= self.settings.checkpoint_interval {
                        let here = if chunk_end == records.len() {
                            next_cursor.clone().map(|c| ResumePoint {
                                cursor: Some(c),
                                offset: 0,
                            })
                        } else {
                            Some(ResumePoint {
                                cursor: page_cursor.clone(),
                                offset: chunk_end,
                            })
                        };
                        // Nothing to save after the last page; completion clears it
                        if let Some(here) = here {
                            self.save_checkpoint(batch, source, &here).await;
                            since_checkpoint = 0;
                        }
                    }
                }

                pages_done += 1;
                cursor = next_cursor;

                if !self.renew(batch, source, owner).await {
                    let here = ResumePoint { cursor, offset: 0 };
                    self.save_checkpoint(batch, source, &here).await;
                    return Ok(Ending::Stopped(format!(
                        "lease lost after {} pages ({} records)",
                        pages_done, batch.records_fetched
                    )));
                }
            }
        }
    }

    /// Upsert validated records and drop their cache entries
    async fn upsert_and_invalidate(&self, batch: &mut IngestionBatch, records: &[CanonicalRecord]) {
        if records.is_empty() {
            return;
        }
        let mut changed = Vec::new();
        for result in self.records.upsert_batch(records).await {
            match result.outcome {
                Ok(UpsertOutcome::ConflictIgnored { .. }) => batch.records_unchanged += 1,
                Ok(_) => {
                    batch.records_upserted += 1;
                    changed.push(result.identifier);
                }
                Err(e) => {
                    warn!(batch_id = batch.batch_id, id = %result.identifier, error = %e, "Upsert failed");
                    batch.record_failure(result.identifier, e.to_string());
                }
            }
        }

        let mut invalidation_errors = 0;
        for id in &changed {
            if let Err(e) = self.cache.invalidate(batch.entity_type, id).await {
                invalidation_errors += 1;
                warn!(entity_type = %batch.entity_type, id = %id, error = %e, "Cache invalidation failed");
            }
        }
        if invalidation_errors > 0 {
            if let Some(state) = &self.status {
                state.write().await.stats.invalidation_errors += invalidation_errors;
            }
        }
    }

    /// Sleep through a rate limit, renewing the lease. Returns a stop note if
    /// the batch was cancelled or lost its lease meanwhile.
    async fn wait_out(
        &self,
        batch: &IngestionBatch,
        source: &str,
        owner: &str,
        wait: Duration,
        cancel: &mut watch::Receiver<bool>,
    ) -> Option<String> {
        let renew_every = (self.settings.lease_timeout / 3).max(Duration::from_secs(1));
        let mut remaining = wait;
        while !remaining.is_zero() {
            let step = remaining.min(renew_every);
            tokio::select! {
                biased;
                _ = cancelled(cancel) => {
                    return Some(format!(
                        "cancelled while rate limited after {} records",
                        batch.records_fetched
                    ));
                }
                _ = tokio::time::sleep(step) => {}
            }
            remaining -= step;
            if !self.renew(batch, source, owner).await {
                return Some("lease lost while rate limited".to_string());
            }
        }
        None
    }

    async fn stop_cancelled(&self, batch: &IngestionBatch, here: ResumePoint) -> Ending {
        info!(batch_id = batch.batch_id, cursor = ?here.cursor, offset = here.offset, "Batch cancelled");
        self.save_checkpoint(batch, batch.source.as_str(), &here).await;
        Ending::Stopped(format!(
            "cancelled after {} records; resumes from checkpoint",
            batch.records_fetched
        ))
    }

    /// `false` only when another owner holds the lease
    async fn renew(&self, batch: &IngestionBatch, source: &str, owner: &str) -> bool {
        let ttl = match self.lease_ttl() {
            Ok(ttl) => ttl,
            Err(_) => return true,
        };
        match self.leases.renew(batch.entity_type, source, owner, ttl).await {
            Ok(held) => held,
            Err(e) => {
                warn!(batch_id = batch.batch_id, error = %e, "Lease renewal failed");
                true
            }
        }
    }

    async fn save_checkpoint(&self, batch: &IngestionBatch, source: &str, here: &ResumePoint) {
        let checkpoint = Checkpoint {
            entity_type: batch.entity_type,
            source: source.to_string(),
            cursor: here.cursor.clone(),
            offset: here.offset as i64,
            updated_at: chrono::Utc::now(),
        };
        match self.log.save_checkpoint(&checkpoint).await {
            Ok(()) => debug!(batch_id = batch.batch_id, cursor = ?here.cursor, offset = here.offset, "Checkpoint saved"),
            Err(e) => warn!(batch_id = batch.batch_id, error = %e, "Failed to save checkpoint"),
        }
    }

    async fn set_phase(&self, batch: &mut IngestionBatch, phase: BatchStatus) -> Result<()> {
        if batch.status != phase {
            batch.status = phase;
            self.log.update_batch(batch).await?;
            self.publish(batch).await;
        }
        Ok(())
    }

    fn lease_ttl(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(self.settings.lease_timeout)
            .map_err(|e| EtlError::Config(format!("lease timeout out of range: {}", e)))
    }

    async fn publish(&self, batch: &IngestionBatch) {
        if let Some(state) = &self.status {
            state.write().await.current_batch = Some(batch.clone());
        }
    }

    async fn publish_finished(&self, batch: &IngestionBatch) {
        if let Some(state) = &self.status {
            let mut state = state.write().await;
            state.finish_batch(batch.clone());
            state.cache = Some(self.cache.stats());
        }
    }
}

/// Keep records that pass validation; log the rest as batch failures
fn transform(batch: &mut IngestionBatch, records: &[CanonicalRecord]) -> Vec<CanonicalRecord> {
    let mut valid = Vec::with_capacity(records.len());
    for record in records {
        if record.entity_type() != batch.entity_type {
            batch.record_failure(
                record.identifier.clone(),
                format!("expected {}, got {}", batch.entity_type, record.entity_type()),
            );
            continue;
        }
        match validate(record) {
            Ok(()) => valid.push(record.clone()),
            Err(e) => {
                debug!(id = %record.identifier, error = %e, "Record failed validation");
                batch.record_failure(record.identifier.clone(), e.to_string());
            }
        }
    }
    valid
}

/// Resolves once `cancel` reads `true`; never if the sender is gone
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
