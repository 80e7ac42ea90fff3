//! Government food composition adapter, read from a CSV export
//!
//! The table is keyed by food name. Headers are matched case-insensitively
//! and `NA`, `NULL`, `NaN` or an empty cell mean the value was not measured.
//! A file that names the same food twice is rejected as a whole, before any
//! row reaches the record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use pantry_records::{CanonicalRecord, EntityType, FoodComposition, RecordPayload, UNDATED};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::adapter::{Page, SourceAdapter};
use crate::error::{Result, SourceError};

pub const SOURCE: &str = "gov_nutrition";

const KEY_COLUMN: &str = "food_name";
const MISSING_MARKERS: [&str; 4] = ["", "na", "null", "nan"];

#[derive(Debug, Deserialize)]
struct CompositionRow {
    #[serde(default)]
    food_name: Option<String>,
    #[serde(default, deserialize_with = "measured")]
    energy_kcal: Option<f64>,
    #[serde(default, deserialize_with = "measured")]
    fat_g: Option<f64>,
    #[serde(default, deserialize_with = "measured")]
    saturates_g: Option<f64>,
    #[serde(default, deserialize_with = "measured")]
    carbohydrate_g: Option<f64>,
    #[serde(default, deserialize_with = "measured")]
    sugars_g: Option<f64>,
    #[serde(default, deserialize_with = "measured")]
    starch_g: Option<f64>,
    #[serde(default, deserialize_with = "measured")]
    fibre_g: Option<f64>,
    #[serde(default, deserialize_with = "measured")]
    protein_g: Option<f64>,
    #[serde(default, deserialize_with = "measured")]
    salt_g: Option<f64>,
}

/// A number, or `None` for the missing-value markers
fn measured<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value = raw.trim();
    if MISSING_MARKERS.contains(&value.to_ascii_lowercase().as_str()) {
        return Ok(None);
    }
    value
        .parse()
        .map(Some)
        .map_err(|_| serde::de::Error::custom(format!("'{}' is not a number", value)))
}

impl CompositionRow {
    fn into_record(self, last_updated: DateTime<Utc>) -> CanonicalRecord {
        let food_name = self
            .food_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        CanonicalRecord::new(
            food_name.clone().unwrap_or_default(),
            SOURCE,
            last_updated,
            RecordPayload::FoodComposition(FoodComposition {
                food_name,
                energy_kcal: self.energy_kcal,
                fat_g: self.fat_g,
                saturates_g: self.saturates_g,
                carbohydrate_g: self.carbohydrate_g,
                sugars_g: self.sugars_g,
                starch_g: self.starch_g,
                fibre_g: self.fibre_g,
                protein_g: self.protein_g,
                salt_g: self.salt_g,
            }),
        )
    }
}

/// Parse a composition table. Every record is stamped `last_updated`.
///
/// Fails on a missing `food_name` column, an unparseable cell, or a food
/// name that appears on more than one row.
pub fn parse_composition_csv(
    data: &[u8],
    last_updated: DateTime<Utc>,
) -> Result<Vec<CanonicalRecord>> {
    let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(data);
    let headers: StringRecord = reader
        .headers()
        .map_err(|e| SourceError::Malformed(format!("unreadable header: {}", e)))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    if !headers.iter().any(|h| h == KEY_COLUMN) {
        return Err(SourceError::Malformed(format!(
            "missing {} column",
            KEY_COLUMN
        )));
    }
    reader.set_headers(headers);

    let mut records = Vec::new();
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    for (index, row) in reader.deserialize::<CompositionRow>().enumerate() {
        // Header is line 1
        let line = index + 2;
        let row = row.map_err(|e| SourceError::Malformed(format!("line {}: {}", line, e)))?;
        let record = row.into_record(last_updated);

        if !record.identifier.is_empty() {
            if let Some(earlier) = first_seen.insert(record.identifier.clone(), line) {
                return Err(SourceError::Malformed(format!(
                    "duplicate {} '{}' on lines {} and {}",
                    KEY_COLUMN, record.identifier, earlier, line
                )));
            }
        }
        records.push(record);
    }
    Ok(records)
}

/// Parsed table and the file mtime it was read at
struct Loaded {
    modified: Option<SystemTime>,
    records: Arc<Vec<CanonicalRecord>>,
}

/// Food compositions from a CSV file on disk. Cursors are row offsets.
///
/// The file is re-read whenever its modification time changes. Records carry
/// the file's mtime as `last_updated`, so re-ingesting an unchanged file
/// leaves every stored row alone.
pub struct CompositionSource {
    path: PathBuf,
    page_size: usize,
    loaded: Mutex<Option<Loaded>>,
}

impl CompositionSource {
    pub fn new(path: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            path: path.into(),
            page_size: page_size.max(1),
            loaded: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn table(&self) -> Result<Arc<Vec<CanonicalRecord>>> {
        let unreadable =
            |e: std::io::Error| SourceError::Unavailable(format!("{}: {}", self.path.display(), e));

        let modified = tokio::fs::metadata(&self.path)
            .await
            .map_err(unreadable)?
            .modified()
            .ok();

        let mut loaded = self.loaded.lock().await;
        if let Some(current) = loaded.as_ref() {
            if modified.is_some() && current.modified == modified {
                return Ok(Arc::clone(&current.records));
            }
        }

        let data = tokio::fs::read(&self.path).await.map_err(unreadable)?;
        let last_updated = modified.map(DateTime::<Utc>::from).unwrap_or(UNDATED);
        let records = Arc::new(parse_composition_csv(&data, last_updated)?);
        info!(
            path = %self.path.display(),
            rows = records.len(),
            "Loaded food composition table"
        );

        *loaded = Some(Loaded {
            modified,
            records: Arc::clone(&records),
        });
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for CompositionSource {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn entity_types(&self) -> &[EntityType] {
        &[EntityType::FoodComposition]
    }

    async fn fetch_by_id(
        &self,
        entity_type: EntityType,
        identifier: &str,
    ) -> Result<Option<CanonicalRecord>> {
        if entity_type != EntityType::FoodComposition {
            return Err(self.unsupported(entity_type));
        }
        let table = self.table().await?;
        Ok(table.iter().find(|r| r.identifier == identifier).cloned())
    }

    async fn fetch_page(&self, entity_type: EntityType, cursor: Option<&str>) -> Result<Page> {
        if entity_type != EntityType::FoodComposition {
            return Err(self.unsupported(entity_type));
        }
        let offset = match cursor {
            None => 0,
            Some(c) => c
                .parse::<usize>()
                .map_err(|_| SourceError::Malformed(format!("bad cursor '{}'", c)))?,
        };

        let table = self.table().await?;
        let end = (offset + self.page_size).min(table.len());
        let records = table.get(offset..end).map(<[_]>::to_vec).unwrap_or_default();
        debug!(offset, count = records.len(), "Fetched composition rows");

        Ok(Page {
            cursor: cursor.map(str::to_string),
            records,
            next_cursor: (end < table.len()).then(|| end.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    const TABLE: &str = "\
Food_Name,Energy_kcal,Fat_g,Saturates_g,Carbohydrate_g,Sugars_g,Starch_g,Fibre_g,Protein_g,Salt_g
\"Apples, eating, raw\",51,0.1,NA,11.6,11.6,0,1.8,0.6,0
\"Bread, white\",219,1.6,0.3,46.1,3.4,42.7,2.5,7.9,1.0
Butter,744,82.2,52.1,0.6,0.6,NULL,,0.6,1.6
";

    fn stamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn write_table(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_rows_map_to_compositions() {
        let records = parse_composition_csv(TABLE.as_bytes(), stamp()).unwrap();
        assert_eq!(records.len(), 3);

        let butter = &records[2];
        assert_eq!(butter.identifier, "Butter");
        assert_eq!(butter.source, "gov_nutrition");
        assert_eq!(butter.last_updated, stamp());
        let RecordPayload::FoodComposition(c) = &butter.payload else {
            panic!("expected composition payload");
        };
        assert_eq!(c.energy_kcal, Some(744.0));
        assert_eq!(c.starch_g, None);
        assert_eq!(c.fibre_g, None);
        assert!(pantry_records::validate(butter).is_ok());

        let RecordPayload::FoodComposition(apples) = &records[0].payload else {
            panic!("expected composition payload");
        };
        assert_eq!(apples.saturates_g, None);
        assert_eq!(records[0].identifier, "Apples, eating, raw");
    }

    #[test]
    fn test_duplicate_food_name_rejects_the_file() {
        let table = format!("{}Butter,717,81.1,51.4,0.1,0.1,0,0,0.9,1.5\n", TABLE);
        let err = parse_composition_csv(table.as_bytes(), stamp()).unwrap_err();
        let SourceError::Malformed(msg) = err else {
            panic!("expected malformed, got {:?}", err);
        };
        assert!(msg.contains("duplicate food_name 'Butter' on lines 4 and 5"), "{}", msg);
    }

    #[test]
    fn test_missing_key_column_is_malformed() {
        let err = parse_composition_csv(b"name,energy_kcal\nButter,744\n", stamp()).unwrap_err();
        assert!(matches!(err, SourceError::Malformed(m) if m.contains("food_name")));
    }

    #[test]
    fn test_non_numeric_cell_is_malformed() {
        let err =
            parse_composition_csv(b"food_name,fat_g\nButter,lots\n", stamp()).unwrap_err();
        assert!(matches!(err, SourceError::Malformed(m) if m.starts_with("line 2")));
    }

    #[test]
    fn test_blank_name_is_left_for_validation() {
        let records =
            parse_composition_csv(b"food_name,fat_g\n,1\n  ,2\n", stamp()).unwrap();
        assert_eq!(records.len(), 2);
        assert!(pantry_records::validate(&records[0]).is_err());
    }

    #[tokio::test]
    async fn test_pages_by_row_offset() {
        let file = write_table(TABLE);
        let source = CompositionSource::new(file.path(), 2);

        let first = source
            .fetch_page(EntityType::FoodComposition, None)
            .await
            .unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("2"));

        let last = source
            .fetch_page(EntityType::FoodComposition, Some("2"))
            .await
            .unwrap();
        assert_eq!(last.records.len(), 1);
        assert_eq!(last.next_cursor, None);
        assert_ne!(last.records[0].last_updated, UNDATED);
    }

    #[tokio::test]
    async fn test_fetch_by_food_name() {
        let file = write_table(TABLE);
        let source = CompositionSource::new(file.path(), 10);

        let found = source
            .fetch_by_id(EntityType::FoodComposition, "Bread, white")
            .await
            .unwrap();
        assert_eq!(found.map(|r| r.identifier), Some("Bread, white".to_string()));
        assert!(source
            .fetch_by_id(EntityType::FoodComposition, "Marmite")
            .await
            .unwrap()
            .is_none());
        assert!(matches!(
            source.fetch_by_id(EntityType::NutritionFact, "50001126").await,
            Err(SourceError::Unsupported { source: "gov_nutrition", .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let source = CompositionSource::new("/nonexistent/food_nutrition_quality.csv", 10);
        let err = source
            .fetch_page(EntityType::FoodComposition, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
    }
}
