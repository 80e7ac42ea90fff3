use pantry_records::{CanonicalRecord, EntityType};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::error::Result;
use crate::types::{RecordRow, UpsertOutcome};

/// Table holding records of the given entity type
pub fn table_name(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Establishment => "establishments",
        EntityType::NutritionFact => "nutrition_facts",
        EntityType::PricePoint => "price_points",
        EntityType::FoodComposition => "food_compositions",
    }
}

/// Get a record by identifier
pub async fn get(
    pool: &PgPool,
    entity_type: EntityType,
    identifier: &str,
) -> Result<Option<CanonicalRecord>> {
    let sql = format!(
        r#"
        SELECT identifier, source, payload, last_updated, version, indexed_at
        FROM {}
        WHERE identifier = $1
        "#,
        table_name(entity_type)
    );
    let row: Option<RecordRow> = sqlx::query_as(&sql)
        .bind(identifier)
        .fetch_optional(pool)
        .await?;
    row.map(|r| r.into_record(entity_type)).transpose()
}

/// Insert or update a record, only overwriting rows with an older `last_updated`
pub async fn upsert(pool: &PgPool, record: &CanonicalRecord) -> Result<UpsertOutcome> {
    let table = table_name(record.entity_type());
    let sql = format!(
        r#"
        INSERT INTO {table} (identifier, source, payload, last_updated, version, indexed_at)
        VALUES ($1, $2, $3, $4, 1, NOW())
        ON CONFLICT (identifier) DO UPDATE SET
            source = EXCLUDED.source,
            payload = EXCLUDED.payload,
            last_updated = EXCLUDED.last_updated,
            version = {table}.version + 1,
            indexed_at = NOW()
        WHERE EXCLUDED.last_updated > {table}.last_updated
        RETURNING version
        "#
    );
    let written: Option<(i64,)> = sqlx::query_as(&sql)
        .bind(&record.identifier)
        .bind(&record.source)
        .bind(Json(&record.payload))
        .bind(record.last_updated)
        .fetch_optional(pool)
        .await?;

    match written {
        Some((1,)) => Ok(UpsertOutcome::Inserted { version: 1 }),
        Some((version,)) => Ok(UpsertOutcome::Updated { version }),
        None => {
            let (version,): (i64,) =
                sqlx::query_as(&format!("SELECT version FROM {table} WHERE identifier = $1"))
                    .bind(&record.identifier)
                    .fetch_one(pool)
                    .await?;
            Ok(UpsertOutcome::ConflictIgnored { version })
        }
    }
}

/// Row counts per entity table
pub async fn count(pool: &PgPool, entity_type: EntityType) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table_name(entity_type));
    let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(pool).await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert_eq!(table_name(EntityType::Establishment), "establishments");
        assert_eq!(table_name(EntityType::NutritionFact), "nutrition_facts");
        assert_eq!(table_name(EntityType::PricePoint), "price_points");
        assert_eq!(table_name(EntityType::FoodComposition), "food_compositions");
    }
}
