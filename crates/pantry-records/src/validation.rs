//! Schema checks applied to records before they are persisted

use crate::types::{
    CanonicalRecord, EntityType, Establishment, FoodComposition, NutritionFact, PricePoint,
    RecordPayload,
};
use chrono::{Duration, Utc};
use std::fmt;

/// Largest plausible energy density (pure fat is ~900 kcal/100g)
const MAX_ENERGY_KCAL: f64 = 900.0;
/// Records stamped further ahead than this are rejected
const MAX_CLOCK_SKEW_HOURS: i64 = 24;
/// Longest food name accepted as a composition identifier
const MAX_FOOD_NAME_CHARS: usize = 200;

/// Why a record failed validation
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Identifier does not match the format for its entity type
    MalformedIdentifier {
        entity_type: EntityType,
        identifier: String,
    },
    /// A required field is absent or blank
    MissingField(&'static str),
    /// A numeric field lies outside its sane range
    OutOfRange { field: &'static str, value: f64 },
    /// Fields are individually valid but contradict each other
    Inconsistent(String),
    /// Free-form field check failure
    Invalid { field: &'static str, reason: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedIdentifier {
                entity_type,
                identifier,
            } => write!(f, "malformed {} identifier '{}'", entity_type, identifier),
            Self::MissingField(field) => write!(f, "missing required field: {}", field),
            Self::OutOfRange { field, value } => {
                write!(f, "{} out of range: {}", field, value)
            }
            Self::Inconsistent(msg) => write!(f, "inconsistent fields: {}", msg),
            Self::Invalid { field, reason } => write!(f, "invalid {}: {}", field, reason),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Bring a caller-supplied identifier into the form records are keyed by.
///
/// Identifiers are trimmed. Barcodes are also canonicalized so that the same
/// product has one key however it was zero-padded: leading zeros are
/// stripped and the code is re-padded to EAN-8 or EAN-13 width when it fits,
/// otherwise kept as a GTIN-14.
pub fn normalize_identifier(entity_type: EntityType, id: &str) -> String {
    let id = id.trim();
    match entity_type {
        EntityType::NutritionFact if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) => {
            canonical_barcode(id)
        }
        _ => id.to_string(),
    }
}

fn canonical_barcode(code: &str) -> String {
    let digits = code.trim_start_matches('0');
    if digits.len() <= 8 {
        format!("{:0>8}", digits)
    } else if digits.len() <= 13 {
        format!("{:0>13}", digits)
    } else {
        digits.to_string()
    }
}

/// Check that an identifier is well-formed for its entity type
pub fn validate_identifier(entity_type: EntityType, id: &str) -> Result<(), ValidationError> {
    let well_formed = match entity_type {
        // FHRSID
        EntityType::Establishment => is_numeric_id(id, 1, 10),
        // EAN-8 through GTIN-14
        EntityType::NutritionFact => is_numeric_id(id, 8, 14),
        // Open Prices price id
        EntityType::PricePoint => is_numeric_id(id, 1, 12),
        // Food name from the composition table
        EntityType::FoodComposition => {
            !id.is_empty()
                && id.trim() == id
                && id.chars().count() <= MAX_FOOD_NAME_CHARS
                && !id.chars().any(char::is_control)
        }
    };

    if well_formed {
        Ok(())
    } else {
        Err(ValidationError::MalformedIdentifier {
            entity_type,
            identifier: id.to_string(),
        })
    }
}

fn is_numeric_id(id: &str, min: usize, max: usize) -> bool {
    (min..=max).contains(&id.len()) && id.bytes().all(|b| b.is_ascii_digit())
}

/// Validate a record against the schema constraints for its entity type
pub fn validate(record: &CanonicalRecord) -> Result<(), ValidationError> {
    validate_identifier(record.entity_type(), &record.identifier)?;
    require_text("source", &Some(record.source.clone()))?;

    if record.last_updated > Utc::now() + Duration::hours(MAX_CLOCK_SKEW_HOURS) {
        return Err(ValidationError::Invalid {
            field: "last_updated",
            reason: format!("{} is in the future", record.last_updated.to_rfc3339()),
        });
    }

    match &record.payload {
        RecordPayload::Establishment(e) => validate_establishment(e),
        RecordPayload::NutritionFact(n) => validate_nutrition(n),
        RecordPayload::PricePoint(p) => validate_price(p),
        RecordPayload::FoodComposition(c) => validate_composition(c, &record.identifier),
    }
}

fn require_text(field: &'static str, value: &Option<String>) -> Result<(), ValidationError> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(ValidationError::MissingField(field)),
    }
}

fn check_range(
    field: &'static str,
    value: Option<f64>,
    min: f64,
    max: f64,
) -> Result<(), ValidationError> {
    match value {
        Some(v) if !v.is_finite() || v < min || v > max => {
            Err(ValidationError::OutOfRange { field, value: v })
        }
        _ => Ok(()),
    }
}

fn validate_establishment(e: &Establishment) -> Result<(), ValidationError> {
    require_text("business_name", &e.business_name)?;
    require_text("rating_value", &e.rating_value)?;
    check_range("latitude", e.latitude, -90.0, 90.0)?;
    check_range("longitude", e.longitude, -180.0, 180.0)?;

    for (field, score) in [
        ("hygiene_score", e.hygiene_score),
        ("structural_score", e.structural_score),
        (
            "confidence_in_management_score",
            e.confidence_in_management_score,
        ),
    ] {
        if let Some(s) = score {
            if s < 0 {
                return Err(ValidationError::OutOfRange {
                    field,
                    value: f64::from(s),
                });
            }
        }
    }
    Ok(())
}

fn validate_nutrition(n: &NutritionFact) -> Result<(), ValidationError> {
    require_text("product_name", &n.product_name)?;
    check_per_100g(
        n.energy_kcal,
        &[
            ("fat_g", n.fat_g),
            ("saturates_g", n.saturates_g),
            ("carbohydrate_g", n.carbohydrate_g),
            ("sugars_g", n.sugars_g),
            ("fibre_g", n.fibre_g),
            ("protein_g", n.protein_g),
            ("salt_g", n.salt_g),
        ],
    )?;
    check_subtotals(n.fat_g, n.saturates_g, n.carbohydrate_g, n.sugars_g)
}

fn validate_composition(c: &FoodComposition, identifier: &str) -> Result<(), ValidationError> {
    require_text("food_name", &c.food_name)?;
    if c.food_name.as_deref().map(str::trim) != Some(identifier) {
        return Err(ValidationError::Inconsistent(format!(
            "food_name does not match identifier '{}'",
            identifier
        )));
    }

    check_per_100g(
        c.energy_kcal,
        &[
            ("fat_g", c.fat_g),
            ("saturates_g", c.saturates_g),
            ("carbohydrate_g", c.carbohydrate_g),
            ("sugars_g", c.sugars_g),
            ("starch_g", c.starch_g),
            ("fibre_g", c.fibre_g),
            ("protein_g", c.protein_g),
            ("salt_g", c.salt_g),
        ],
    )?;
    check_subtotals(c.fat_g, c.saturates_g, c.carbohydrate_g, c.sugars_g)
}

fn check_per_100g(
    energy_kcal: Option<f64>,
    grams: &[(&'static str, Option<f64>)],
) -> Result<(), ValidationError> {
    check_range("energy_kcal", energy_kcal, 0.0, MAX_ENERGY_KCAL)?;
    for &(field, value) in grams {
        check_range(field, value, 0.0, 100.0)?;
    }
    Ok(())
}

fn check_subtotals(
    fat: Option<f64>,
    saturates: Option<f64>,
    carbohydrate: Option<f64>,
    sugars: Option<f64>,
) -> Result<(), ValidationError> {
    if let (Some(sat), Some(fat)) = (saturates, fat) {
        if sat > fat {
            return Err(ValidationError::Inconsistent(format!(
                "saturates {}g exceed fat {}g",
                sat, fat
            )));
        }
    }
    if let (Some(sugars), Some(carbs)) = (sugars, carbohydrate) {
        if sugars > carbs {
            return Err(ValidationError::Inconsistent(format!(
                "sugars {}g exceed carbohydrate {}g",
                sugars, carbs
            )));
        }
    }
    Ok(())
}

fn validate_price(p: &PricePoint) -> Result<(), ValidationError> {
    require_text("product_code", &p.product_code)?;

    match p.price {
        None => return Err(ValidationError::MissingField("price")),
        Some(v) if !v.is_finite() || v <= 0.0 => {
            return Err(ValidationError::OutOfRange {
                field: "price",
                value: v,
            })
        }
        Some(_) => {}
    }

    match p.currency.as_deref() {
        None => Err(ValidationError::MissingField("currency")),
        Some(c) if c.len() == 3 && c.bytes().all(|b| b.is_ascii_uppercase()) => Ok(()),
        Some(c) => Err(ValidationError::Invalid {
            field: "currency",
            reason: format!("'{}' is not an ISO 4217 code", c),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn nutrition(fact: NutritionFact) -> CanonicalRecord {
        CanonicalRecord::new(
            "5000112637922",
            "off",
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            RecordPayload::NutritionFact(fact),
        )
    }

    fn beans() -> NutritionFact {
        NutritionFact {
            product_name: Some("Baked Beans".to_string()),
            energy_kcal: Some(78.0),
            fat_g: Some(0.2),
            saturates_g: Some(0.0),
            carbohydrate_g: Some(12.5),
            sugars_g: Some(4.7),
            fibre_g: Some(3.8),
            protein_g: Some(4.7),
            salt_g: Some(0.6),
            ..Default::default()
        }
    }

    #[test]
    fn test_identifier_formats() {
        assert!(validate_identifier(EntityType::Establishment, "1234567").is_ok());
        assert!(validate_identifier(EntityType::Establishment, "").is_err());
        assert!(validate_identifier(EntityType::Establishment, "12a4").is_err());
        assert!(validate_identifier(EntityType::NutritionFact, "50001126").is_ok());
        assert!(validate_identifier(EntityType::NutritionFact, "1234567").is_err());
        assert!(validate_identifier(EntityType::NutritionFact, "123456789012345").is_err());
        assert!(validate_identifier(EntityType::PricePoint, "42").is_ok());
    }

    #[test]
    fn test_normalize_identifier_trims() {
        assert_eq!(normalize_identifier(EntityType::Establishment, "  1234 \n"), "1234");
        assert_eq!(normalize_identifier(EntityType::PricePoint, "007"), "007");
        assert_eq!(
            normalize_identifier(EntityType::FoodComposition, " Apples, raw "),
            "Apples, raw"
        );
    }

    #[test]
    fn test_barcodes_share_one_key_however_padded() {
        let norm = |id| normalize_identifier(EntityType::NutritionFact, id);
        assert_eq!(norm("5000112637922"), "5000112637922");
        assert_eq!(norm("05000112637922"), "5000112637922");
        assert_eq!(norm(" 0005000112637922 "), "5000112637922");
        // UPC-A widens to EAN-13
        assert_eq!(norm("012345678905"), "0012345678905");
        assert_eq!(norm("0000050001126"), "50001126");
        assert_eq!(norm("50001126"), "50001126");
        assert_eq!(norm("12345678901231"), "12345678901231");
        // Not a barcode, left for validation to reject
        assert_eq!(norm("abc"), "abc");
    }

    #[test]
    fn test_food_name_identifier() {
        assert!(validate_identifier(EntityType::FoodComposition, "Apples, eating, raw").is_ok());
        assert!(validate_identifier(EntityType::FoodComposition, "").is_err());
        assert!(validate_identifier(EntityType::FoodComposition, " padded").is_err());
        assert!(validate_identifier(EntityType::FoodComposition, "tab\there").is_err());
        let long = "x".repeat(201);
        assert!(validate_identifier(EntityType::FoodComposition, &long).is_err());
    }

    #[test]
    fn test_composition_ranges_include_starch() {
        let composition = |c: FoodComposition| {
            CanonicalRecord::new(
                "Bread, white",
                "gov_nutrition",
                Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
                RecordPayload::FoodComposition(c),
            )
        };
        let bread = FoodComposition {
            food_name: Some("Bread, white".to_string()),
            energy_kcal: Some(219.0),
            carbohydrate_g: Some(46.1),
            sugars_g: Some(3.4),
            starch_g: Some(42.7),
            ..Default::default()
        };
        assert!(validate(&composition(bread.clone())).is_ok());

        let err = validate(&composition(FoodComposition {
            starch_g: Some(120.0),
            ..bread.clone()
        }))
        .unwrap_err();
        assert!(matches!(err, ValidationError::OutOfRange { field: "starch_g", .. }));

        let renamed = FoodComposition {
            food_name: Some("Bread, brown".to_string()),
            ..bread
        };
        assert!(matches!(
            validate(&composition(renamed)),
            Err(ValidationError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_valid_nutrition_passes() {
        assert!(validate(&nutrition(beans())).is_ok());
    }

    #[test]
    fn test_missing_product_name() {
        let fact = NutritionFact {
            product_name: Some("   ".to_string()),
            ..beans()
        };
        assert_eq!(
            validate(&nutrition(fact)),
            Err(ValidationError::MissingField("product_name"))
        );
    }

    #[test]
    fn test_gram_value_over_100_rejected() {
        let fact = NutritionFact {
            protein_g: Some(140.0),
            ..beans()
        };
        let err = validate(&nutrition(fact)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::OutOfRange {
                field: "protein_g",
                value: 140.0
            }
        );
        assert_eq!(err.to_string(), "protein_g out of range: 140");
    }

    #[test]
    fn test_negative_energy_rejected() {
        let fact = NutritionFact {
            energy_kcal: Some(-1.0),
            ..beans()
        };
        assert!(matches!(
            validate(&nutrition(fact)),
            Err(ValidationError::OutOfRange { field: "energy_kcal", .. })
        ));
    }

    #[test]
    fn test_nan_rejected() {
        let fact = NutritionFact {
            salt_g: Some(f64::NAN),
            ..beans()
        };
        assert!(validate(&nutrition(fact)).is_err());
    }

    #[test]
    fn test_sugars_cannot_exceed_carbohydrate() {
        let fact = NutritionFact {
            sugars_g: Some(20.0),
            ..beans()
        };
        assert!(matches!(
            validate(&nutrition(fact)),
            Err(ValidationError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_establishment_requires_rating() {
        let record = CanonicalRecord::new(
            "99",
            "fsa",
            Utc::now(),
            RecordPayload::Establishment(Establishment {
                business_name: Some("Chippy".to_string()),
                ..Default::default()
            }),
        );
        assert_eq!(
            validate(&record),
            Err(ValidationError::MissingField("rating_value"))
        );
    }

    #[test]
    fn test_establishment_coordinates_checked() {
        let record = CanonicalRecord::new(
            "99",
            "fsa",
            Utc::now(),
            RecordPayload::Establishment(Establishment {
                business_name: Some("Chippy".to_string()),
                rating_value: Some("4".to_string()),
                latitude: Some(151.2),
                ..Default::default()
            }),
        );
        assert!(matches!(
            validate(&record),
            Err(ValidationError::OutOfRange { field: "latitude", .. })
        ));
    }

    #[test]
    fn test_price_requires_positive_amount_and_currency() {
        let mut price = PricePoint {
            product_code: Some("5000112637922".to_string()),
            price: Some(1.25),
            currency: Some("GBP".to_string()),
            ..Default::default()
        };
        let record = |p: PricePoint| {
            CanonicalRecord::new("7", "open_prices", Utc::now(), RecordPayload::PricePoint(p))
        };
        assert!(validate(&record(price.clone())).is_ok());

        price.currency = Some("gbp".to_string());
        assert!(matches!(
            validate(&record(price.clone())),
            Err(ValidationError::Invalid { field: "currency", .. })
        ));

        price.currency = Some("GBP".to_string());
        price.price = Some(0.0);
        assert!(matches!(
            validate(&record(price)),
            Err(ValidationError::OutOfRange { field: "price", .. })
        ));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let mut record = nutrition(beans());
        record.last_updated = Utc::now() + Duration::days(30);
        assert!(matches!(
            validate(&record),
            Err(ValidationError::Invalid { field: "last_updated", .. })
        ));
    }

    #[test]
    fn test_malformed_identifier_message() {
        let err = validate_identifier(EntityType::NutritionFact, "abc").unwrap_err();
        assert_eq!(err.to_string(), "malformed nutrition_fact identifier 'abc'");
    }
}
