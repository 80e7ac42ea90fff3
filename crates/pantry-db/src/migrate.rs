use crate::error::{Result, StoreError};
use sqlx::PgPool;
use tracing::{debug, info};

/// Apply the embedded schema migrations, tracked in `_sqlx_migrations`
pub async fn migrate(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate!();
    debug!(available = migrator.iter().count(), "Applying record store schema");

    migrator
        .run(pool)
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;

    info!("Record store schema is current");
    Ok(())
}
