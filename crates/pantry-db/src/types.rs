use chrono::{DateTime, Utc};
use pantry_records::{CanonicalRecord, EntityType, RecordPayload};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;

use crate::error::StoreError;

/// What an upsert did to the stored row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No row existed; stored at version 1
    Inserted { version: i64 },
    /// Incoming record was newer; version bumped
    Updated { version: i64 },
    /// Stored `last_updated` is the same or newer; nothing written
    ConflictIgnored { version: i64 },
}

impl UpsertOutcome {
    /// Version of the stored row after the upsert
    pub fn version(&self) -> i64 {
        match self {
            Self::Inserted { version }
            | Self::Updated { version }
            | Self::ConflictIgnored { version } => *version,
        }
    }

    /// Whether the upsert changed the stored row
    pub fn applied(&self) -> bool {
        !matches!(self, Self::ConflictIgnored { .. })
    }
}

/// Per-record result of `upsert_batch`
#[derive(Debug)]
pub struct RecordResult {
    pub identifier: String,
    pub outcome: Result<UpsertOutcome, StoreError>,
}

/// Lifecycle of an ingestion batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Fetching,
    Transforming,
    Upserting,
    Succeeded,
    Partial,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Transforming => "transforming",
            Self::Upserting => "upserting",
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "fetching" => Some(Self::Fetching),
            "transforming" => Some(Self::Transforming),
            "upserting" => Some(Self::Upserting),
            "succeeded" => Some(Self::Succeeded),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Partial | Self::Failed)
    }

    /// Terminal status for a batch that ran to the end of its source
    pub fn conclude(records_fetched: i64, records_failed: i64) -> Self {
        if records_failed == 0 {
            Self::Succeeded
        } else if records_failed < records_fetched {
            Self::Partial
        } else {
            Self::Failed
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record that did not make it into the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub identifier: String,
    pub reason: String,
}

/// Audit record of one ETL run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionBatch {
    pub batch_id: i64,
    pub entity_type: EntityType,
    pub source: String,
    pub status: BatchStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_fetched: i64,
    pub records_upserted: i64,
    pub records_unchanged: i64,
    pub records_failed: i64,
    pub failures: Vec<BatchFailure>,
    pub note: Option<String>,
}

impl IngestionBatch {
    /// A fresh `pending` batch; `batch_id` is assigned by the store
    pub fn pending(entity_type: EntityType, source: impl Into<String>) -> Self {
        Self {
            batch_id: 0,
            entity_type,
            source: source.into(),
            status: BatchStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            records_fetched: 0,
            records_upserted: 0,
            records_unchanged: 0,
            records_failed: 0,
            failures: Vec::new(),
            note: None,
        }
    }

    pub fn record_failure(&mut self, identifier: impl Into<String>, reason: impl Into<String>) {
        self.records_failed += 1;
        self.failures.push(BatchFailure {
            identifier: identifier.into(),
            reason: reason.into(),
        });
    }

    /// Move to a terminal status and stamp `completed_at`
    pub fn finish(&mut self, status: BatchStatus, note: Option<String>) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        if note.is_some() {
            self.note = note;
        }
    }
}

/// Row shape of `ingestion_batches`
#[derive(Debug, Clone, FromRow)]
pub struct IngestionBatchRow {
    pub batch_id: i64,
    pub entity_type: String,
    pub source: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_fetched: i64,
    pub records_upserted: i64,
    pub records_unchanged: i64,
    pub records_failed: i64,
    pub failures: Json<Vec<BatchFailure>>,
    pub note: Option<String>,
}

impl TryFrom<IngestionBatchRow> for IngestionBatch {
    type Error = StoreError;

    fn try_from(row: IngestionBatchRow) -> Result<Self, Self::Error> {
        let entity_type = row
            .entity_type
            .parse()
            .map_err(|e: pantry_records::ParseEntityTypeError| StoreError::Corrupt(e.to_string()))?;
        let status = BatchStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown batch status '{}'", row.status))
        })?;
        Ok(Self {
            batch_id: row.batch_id,
            entity_type,
            source: row.source,
            status,
            started_at: row.started_at,
            completed_at: row.completed_at,
            records_fetched: row.records_fetched,
            records_upserted: row.records_upserted,
            records_unchanged: row.records_unchanged,
            records_failed: row.records_failed,
            failures: row.failures.0,
            note: row.note,
        })
    }
}

/// Resume position for an `(entity_type, source)` ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub entity_type: EntityType,
    pub source: String,
    /// Cursor of the page being processed; `None` is the first page
    pub cursor: Option<String>,
    /// Records of that page already handled
    pub offset: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CheckpointRow {
    pub entity_type: String,
    pub source: String,
    pub cursor: Option<String>,
    pub page_offset: i64,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = StoreError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        Ok(Self {
            entity_type: row
                .entity_type
                .parse()
                .map_err(|e: pantry_records::ParseEntityTypeError| {
                    StoreError::Corrupt(e.to_string())
                })?,
            source: row.source,
            cursor: row.cursor,
            offset: row.page_offset,
            updated_at: row.updated_at,
        })
    }
}

/// Exclusive right to run ingestion for an `(entity_type, source)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub entity_type: EntityType,
    pub source: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

/// Row shape shared by the three entity tables
#[derive(Debug, Clone, FromRow)]
pub struct RecordRow {
    pub identifier: String,
    pub source: String,
    pub payload: Json<RecordPayload>,
    pub last_updated: DateTime<Utc>,
    pub version: i64,
    pub indexed_at: DateTime<Utc>,
}

impl RecordRow {
    pub fn into_record(self, entity_type: EntityType) -> Result<CanonicalRecord, StoreError> {
        let payload = self.payload.0;
        if payload.entity_type() != entity_type {
            return Err(StoreError::Corrupt(format!(
                "{} row {} holds a {} payload",
                entity_type,
                self.identifier,
                payload.entity_type()
            )));
        }
        Ok(CanonicalRecord {
            identifier: self.identifier,
            source: self.source,
            last_updated: self.last_updated,
            version: self.version,
            payload,
        })
    }
}
