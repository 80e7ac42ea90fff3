//! Canonical record model shared by every Pantry tier
//!
//! Establishments (FSA hygiene ratings), nutrition facts (Open Food Facts),
//! price points (Open Prices) and food compositions (the government nutrient
//! table) are normalized into a single [`CanonicalRecord`]
//! whose payload is a tagged variant with a fixed field set per entity type.
//! Records are checked with [`validate`] before they are persisted.

mod types;
mod validation;

pub use types::{
    CanonicalRecord, EntityType, Establishment, FoodComposition, NutritionFact,
    ParseEntityTypeError, PricePoint, RecordKey, RecordPayload, UNDATED,
};
pub use validation::{normalize_identifier, validate, validate_identifier, ValidationError};
