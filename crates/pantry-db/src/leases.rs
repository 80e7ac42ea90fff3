use chrono::{DateTime, Duration, Utc};
use pantry_records::EntityType;
use sqlx::PgPool;

use crate::error::Result;
use crate::types::Lease;

fn ttl_secs(ttl: Duration) -> f64 {
    ttl.num_milliseconds() as f64 / 1000.0
}

/// Claim the lease when it is free or its holder let it expire
pub async fn try_acquire(
    pool: &PgPool,
    entity_type: EntityType,
    source: &str,
    owner: &str,
    ttl: Duration,
) -> Result<Option<Lease>> {
    let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
        r#"
        INSERT INTO etl_leases (entity_type, source, owner, acquired_at, expires_at)
        VALUES ($1, $2, $3, NOW(), NOW() + make_interval(secs => $4))
        ON CONFLICT (entity_type, source) DO UPDATE SET
            owner = EXCLUDED.owner,
            acquired_at = EXCLUDED.acquired_at,
            expires_at = EXCLUDED.expires_at
        WHERE etl_leases.expires_at <= NOW()
        RETURNING expires_at
        "#,
    )
    .bind(entity_type.as_str())
    .bind(source)
    .bind(owner)
    .bind(ttl_secs(ttl))
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(expires_at,)| Lease {
        entity_type,
        source: source.to_string(),
        owner: owner.to_string(),
        expires_at,
    }))
}

pub async fn renew(
    pool: &PgPool,
    entity_type: EntityType,
    source: &str,
    owner: &str,
    ttl: Duration,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE etl_leases
        SET expires_at = NOW() + make_interval(secs => $4)
        WHERE entity_type = $1 AND source = $2 AND owner = $3
        "#,
    )
    .bind(entity_type.as_str())
    .bind(source)
    .bind(owner)
    .bind(ttl_secs(ttl))
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn release(
    pool: &PgPool,
    entity_type: EntityType,
    source: &str,
    owner: &str,
) -> Result<()> {
    sqlx::query("DELETE FROM etl_leases WHERE entity_type = $1 AND source = $2 AND owner = $3")
        .bind(entity_type.as_str())
        .bind(source)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(())
}
