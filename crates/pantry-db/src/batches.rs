use sqlx::types::Json;
use sqlx::PgPool;

use crate::error::{Result, StoreError};
use crate::types::{IngestionBatch, IngestionBatchRow};

const BATCH_COLUMNS: &str = "batch_id, entity_type, source, status, started_at, completed_at, \
     records_fetched, records_upserted, records_unchanged, records_failed, failures, note";

/// Insert a batch row and return it with its generated id
pub async fn create(pool: &PgPool, batch: &IngestionBatch) -> Result<IngestionBatch> {
    let (batch_id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO ingestion_batches (entity_type, source, status, started_at, note)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING batch_id
        "#,
    )
    .bind(batch.entity_type.as_str())
    .bind(&batch.source)
    .bind(batch.status.as_str())
    .bind(batch.started_at)
    .bind(&batch.note)
    .fetch_one(pool)
    .await?;

    Ok(IngestionBatch {
        batch_id,
        ..batch.clone()
    })
}

/// Write counters, status and failures; terminal rows are never touched
pub async fn update(pool: &PgPool, batch: &IngestionBatch) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE ingestion_batches SET
            status = $2,
            completed_at = $3,
            records_fetched = $4,
            records_upserted = $5,
            records_unchanged = $6,
            records_failed = $7,
            failures = $8,
            note = $9
        WHERE batch_id = $1
          AND status NOT IN ('succeeded', 'partial', 'failed')
        "#,
    )
    .bind(batch.batch_id)
    .bind(batch.status.as_str())
    .bind(batch.completed_at)
    .bind(batch.records_fetched)
    .bind(batch.records_upserted)
    .bind(batch.records_unchanged)
    .bind(batch.records_failed)
    .bind(Json(&batch.failures))
    .bind(&batch.note)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return match get(pool, batch.batch_id).await? {
            Some(_) => Err(StoreError::BatchFinalized(batch.batch_id)),
            None => Err(StoreError::BatchNotFound(batch.batch_id)),
        };
    }
    Ok(())
}

pub async fn get(pool: &PgPool, batch_id: i64) -> Result<Option<IngestionBatch>> {
    let sql = format!("SELECT {BATCH_COLUMNS} FROM ingestion_batches WHERE batch_id = $1");
    let row: Option<IngestionBatchRow> = sqlx::query_as(&sql)
        .bind(batch_id)
        .fetch_optional(pool)
        .await?;
    row.map(IngestionBatch::try_from).transpose()
}

pub async fn recent(pool: &PgPool, limit: i64) -> Result<Vec<IngestionBatch>> {
    let sql = format!(
        "SELECT {BATCH_COLUMNS} FROM ingestion_batches ORDER BY started_at DESC, batch_id DESC LIMIT $1"
    );
    let rows: Vec<IngestionBatchRow> = sqlx::query_as(&sql).bind(limit).fetch_all(pool).await?;
    rows.into_iter().map(IngestionBatch::try_from).collect()
}
