//! Canonical record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kinds of entity Pantry stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// FSA food business with a hygiene rating
    Establishment,
    /// Per-100g nutrition facts for a barcoded product
    NutritionFact,
    /// A single observed shelf price
    PricePoint,
    /// Per-100g composition of a generic food from the government dataset
    FoodComposition,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Establishment,
        EntityType::NutritionFact,
        EntityType::PricePoint,
        EntityType::FoodComposition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Establishment => "establishment",
            Self::NutritionFact => "nutrition_fact",
            Self::PricePoint => "price_point",
            Self::FoodComposition => "food_composition",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown entity type name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEntityTypeError(pub String);

impl fmt::Display for ParseEntityTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let valid: Vec<&str> = EntityType::ALL.iter().map(|e| e.as_str()).collect();
        write!(
            f,
            "unknown entity type '{}'; valid types: {}",
            self.0,
            valid.join(", ")
        )
    }
}

impl std::error::Error for ParseEntityTypeError {}

impl FromStr for EntityType {
    type Err = ParseEntityTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "establishment" | "establishments" => Ok(Self::Establishment),
            "nutrition_fact" | "nutrition_facts" | "nutrition" => Ok(Self::NutritionFact),
            "price_point" | "price_points" | "price" | "prices" => Ok(Self::PricePoint),
            "food_composition" | "food_compositions" | "composition" | "nutrition_quality" => {
                Ok(Self::FoodComposition)
            }
            _ => Err(ParseEntityTypeError(s.to_string())),
        }
    }
}

/// `(entity_type, identifier)` pair that addresses one record in every tier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub entity_type: EntityType,
    pub identifier: String,
}

impl RecordKey {
    pub fn new(entity_type: EntityType, identifier: impl Into<String>) -> Self {
        Self {
            entity_type,
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.identifier)
    }
}

/// FSA establishment with its latest hygiene rating
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Establishment {
    pub business_name: Option<String>,
    pub business_type: Option<String>,
    pub business_type_id: Option<i64>,
    pub address_line_1: Option<String>,
    pub address_line_2: Option<String>,
    pub address_line_3: Option<String>,
    pub address_line_4: Option<String>,
    pub postcode: Option<String>,
    /// `0`-`5`, `Pass`, `Improvement Required`, `AwaitingInspection`, `Exempt`, ...
    pub rating_value: Option<String>,
    pub rating_date: Option<DateTime<Utc>>,
    // Inspection scores: lower is better
    pub hygiene_score: Option<i32>,
    pub structural_score: Option<i32>,
    pub confidence_in_management_score: Option<i32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub local_authority_code: Option<String>,
    pub local_authority_name: Option<String>,
}

impl Establishment {
    /// Address lines and postcode joined with commas
    pub fn full_address(&self) -> String {
        [
            &self.address_line_1,
            &self.address_line_2,
            &self.address_line_3,
            &self.address_line_4,
            &self.postcode,
        ]
        .into_iter()
        .filter_map(|part| part.as_deref())
        .filter(|part| !part.trim().is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }
}

/// Nutrition facts per 100g for a barcoded product
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionFact {
    pub product_name: Option<String>,
    pub brands: Option<String>,
    pub energy_kcal: Option<f64>,
    pub fat_g: Option<f64>,
    pub saturates_g: Option<f64>,
    pub carbohydrate_g: Option<f64>,
    pub sugars_g: Option<f64>,
    pub fibre_g: Option<f64>,
    pub protein_g: Option<f64>,
    pub salt_g: Option<f64>,
    pub nutriscore_grade: Option<String>,
    pub ecoscore_grade: Option<String>,
}

/// One observed price for a product
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    /// e.g. `KILOGRAM` or `UNIT`
    pub price_per: Option<String>,
    pub location: Option<String>,
    pub observed_on: Option<chrono::NaiveDate>,
}

/// Per-100g composition of a generic food, keyed by food name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FoodComposition {
    pub food_name: Option<String>,
    pub energy_kcal: Option<f64>,
    pub fat_g: Option<f64>,
    pub saturates_g: Option<f64>,
    pub carbohydrate_g: Option<f64>,
    pub sugars_g: Option<f64>,
    pub starch_g: Option<f64>,
    pub fibre_g: Option<f64>,
    pub protein_g: Option<f64>,
    pub salt_g: Option<f64>,
}

/// Entity-specific fields of a canonical record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum RecordPayload {
    Establishment(Establishment),
    NutritionFact(NutritionFact),
    PricePoint(PricePoint),
    FoodComposition(FoodComposition),
}

impl RecordPayload {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Establishment(_) => EntityType::Establishment,
            Self::NutritionFact(_) => EntityType::NutritionFact,
            Self::PricePoint(_) => EntityType::PricePoint,
            Self::FoodComposition(_) => EntityType::FoodComposition,
        }
    }
}

/// `last_updated` for a record whose upstream carries no date of its own.
///
/// Older than any real date, so a dated copy of the same record always
/// replaces an undated one in the record store.
pub const UNDATED: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// A normalized entity as stored in the record store and cached by the cache tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub identifier: String,
    /// Upstream the record came from (`fsa`, `off`, `open_prices`)
    pub source: String,
    pub last_updated: DateTime<Utc>,
    /// Assigned by the record store; 0 until first persisted
    pub version: i64,
    pub payload: RecordPayload,
}

impl CanonicalRecord {
    pub fn new(
        identifier: impl Into<String>,
        source: impl Into<String>,
        last_updated: DateTime<Utc>,
        payload: RecordPayload,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            source: source.into(),
            last_updated,
            version: 0,
            payload,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.payload.entity_type()
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(self.entity_type(), self.identifier.clone())
    }

    pub fn is_undated(&self) -> bool {
        self.last_updated == UNDATED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_establishment() -> CanonicalRecord {
        CanonicalRecord::new(
            "1234567",
            "fsa",
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            RecordPayload::Establishment(Establishment {
                business_name: Some("The Greasy Spoon".to_string()),
                address_line_1: Some("1 High Street".to_string()),
                address_line_3: Some("London".to_string()),
                postcode: Some("SW1A 1AA".to_string()),
                rating_value: Some("5".to_string()),
                ..Default::default()
            }),
        )
    }

    #[test]
    fn test_entity_type_parse() {
        assert_eq!("establishment".parse::<EntityType>().unwrap(), EntityType::Establishment);
        assert_eq!("nutrition-fact".parse::<EntityType>().unwrap(), EntityType::NutritionFact);
        assert_eq!("Prices".parse::<EntityType>().unwrap(), EntityType::PricePoint);
        assert_eq!(
            "nutrition-quality".parse::<EntityType>().unwrap(),
            EntityType::FoodComposition
        );
    }

    #[test]
    fn test_entity_type_parse_unknown() {
        let err = "recipe".parse::<EntityType>().unwrap_err();
        assert!(err.to_string().contains("unknown entity type 'recipe'"));
        assert!(err.to_string().contains("price_point"));
    }

    #[test]
    fn test_record_key_display() {
        let key = RecordKey::new(EntityType::NutritionFact, "5000112637922");
        assert_eq!(key.to_string(), "nutrition_fact:5000112637922");
    }

    #[test]
    fn test_entity_type_follows_payload() {
        let record = sample_establishment();
        assert_eq!(record.entity_type(), EntityType::Establishment);
        assert_eq!(record.key().identifier, "1234567");
        assert_eq!(record.version, 0);
    }

    #[test]
    fn test_payload_serializes_with_tag() {
        let record = sample_establishment();
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["payload"]["entity_type"], "establishment");
        assert_eq!(json["payload"]["business_name"], "The Greasy Spoon");

        let back: CanonicalRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_full_address_skips_blank_lines() {
        let record = sample_establishment();
        let RecordPayload::Establishment(est) = record.payload else {
            panic!("expected establishment");
        };
        assert_eq!(est.full_address(), "1 High Street, London, SW1A 1AA");
    }

    #[test]
    fn test_undated_sorts_before_real_dates() {
        let record = sample_establishment();
        assert!(UNDATED < record.last_updated);
        assert!(!record.is_undated());
        assert_eq!(UNDATED.timestamp(), 0);
    }
}
