use pantry_records::EntityType;
use sqlx::PgPool;

use crate::error::Result;
use crate::types::{Checkpoint, CheckpointRow};

pub async fn load(
    pool: &PgPool,
    entity_type: EntityType,
    source: &str,
) -> Result<Option<Checkpoint>> {
    let row: Option<CheckpointRow> = sqlx::query_as(
        r#"
        SELECT entity_type, source, cursor, page_offset, updated_at
        FROM etl_checkpoints
        WHERE entity_type = $1 AND source = $2
        "#,
    )
    .bind(entity_type.as_str())
    .bind(source)
    .fetch_optional(pool)
    .await?;
    row.map(Checkpoint::try_from).transpose()
}

pub async fn save(pool: &PgPool, checkpoint: &Checkpoint) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO etl_checkpoints (entity_type, source, cursor, page_offset, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (entity_type, source) DO UPDATE SET
            cursor = EXCLUDED.cursor,
            page_offset = EXCLUDED.page_offset,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(checkpoint.entity_type.as_str())
    .bind(&checkpoint.source)
    .bind(&checkpoint.cursor)
    .bind(checkpoint.offset)
    .bind(checkpoint.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn clear(pool: &PgPool, entity_type: EntityType, source: &str) -> Result<()> {
    sqlx::query("DELETE FROM etl_checkpoints WHERE entity_type = $1 AND source = $2")
        .bind(entity_type.as_str())
        .bind(source)
        .execute(pool)
        .await?;
    Ok(())
}
