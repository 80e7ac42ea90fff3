//! Persistence for Pantry: canonical records, the ingestion batch log,
//! ETL checkpoints and leases.
//!
//! [`PgStore`] is the production backend; [`MemoryStore`] implements the
//! same traits in process memory.

pub mod batches;
pub mod checkpoints;
pub mod error;
pub mod leases;
pub mod memory;
pub mod migrate;
pub mod pg;
pub mod records;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use pg::PgStore;
pub use sqlx::postgres::PgPool;
pub use store::{IngestionLog, LeaseStore, RecordStore};
pub use types::*;
