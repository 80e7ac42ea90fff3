//! Data types for Open Food Facts and Open Prices responses

use serde::{Deserialize, Deserializer, Serialize};

/// Envelope of `GET /api/v2/product/{barcode}`
#[derive(Debug, Clone, Deserialize)]
pub struct ProductResponse {
    pub code: Option<String>,
    /// 1 = found, 0 = not found
    #[serde(default)]
    pub status: i64,
    pub status_verbose: Option<String>,
    pub product: Option<OffProduct>,
}

/// Product fields Pantry reads
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OffProduct {
    /// Barcode; present on search results, absent inside the product envelope
    pub code: Option<String>,
    pub product_name: Option<String>,
    pub product_name_en: Option<String>,
    pub brands: Option<String>,
    /// Unix seconds
    pub last_modified_t: Option<i64>,
    pub nutriscore_grade: Option<String>,
    pub ecoscore_grade: Option<String>,
    #[serde(default)]
    pub nutriments: Nutriments,
}

impl OffProduct {
    /// English name if set, otherwise the default-language name
    pub fn display_name(&self) -> Option<&str> {
        self.product_name_en
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(self.product_name.as_deref())
    }
}

/// Per-100g nutrient values. OFF sometimes sends numbers as strings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Nutriments {
    #[serde(rename = "energy-kcal_100g", default, deserialize_with = "lenient_f64")]
    pub energy_kcal_100g: Option<f64>,
    #[serde(rename = "fat_100g", default, deserialize_with = "lenient_f64")]
    pub fat_100g: Option<f64>,
    #[serde(rename = "saturated-fat_100g", default, deserialize_with = "lenient_f64")]
    pub saturated_fat_100g: Option<f64>,
    #[serde(rename = "carbohydrates_100g", default, deserialize_with = "lenient_f64")]
    pub carbohydrates_100g: Option<f64>,
    #[serde(rename = "sugars_100g", default, deserialize_with = "lenient_f64")]
    pub sugars_100g: Option<f64>,
    #[serde(rename = "fiber_100g", default, deserialize_with = "lenient_f64")]
    pub fiber_100g: Option<f64>,
    #[serde(rename = "proteins_100g", default, deserialize_with = "lenient_f64")]
    pub proteins_100g: Option<f64>,
    #[serde(rename = "salt_100g", default, deserialize_with = "lenient_f64")]
    pub salt_100g: Option<f64>,
}

/// Response of `GET /api/v2/search`
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub page: u64,
    #[serde(default)]
    pub page_count: u64,
    #[serde(default)]
    pub page_size: u64,
    #[serde(default)]
    pub products: Vec<OffProduct>,
}

impl SearchPage {
    pub fn has_next(&self) -> bool {
        self.page_size > 0 && self.page * self.page_size < self.count
    }
}

/// One price from Open Prices
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenPrice {
    pub id: u64,
    pub product_code: Option<String>,
    pub product_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub price: Option<f64>,
    pub currency: Option<String>,
    /// `UNIT` or `KILOGRAM`
    pub price_per: Option<String>,
    /// Observation date, `YYYY-MM-DD`
    pub date: Option<String>,
    pub location: Option<PriceLocation>,
    pub product: Option<PriceProduct>,
    /// RFC 3339
    pub created: Option<String>,
    /// RFC 3339
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PriceLocation {
    pub osm_name: Option<String>,
    pub osm_address_city: Option<String>,
}

impl PriceLocation {
    /// "Shop, City" with whichever parts are present
    pub fn label(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.osm_name, &self.osm_address_city]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .filter(|p| !p.trim().is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PriceProduct {
    pub product_name: Option<String>,
}

/// Response of `GET /api/v1/prices`
#[derive(Debug, Clone, Deserialize)]
pub struct PricePage {
    #[serde(default)]
    pub items: Vec<OpenPrice>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u64,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub pages: u64,
}

impl PricePage {
    pub fn has_next(&self) -> bool {
        self.page < self.pages
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    })
}
