//! Open Food Facts nutrition adapter

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use off_api::{OffClient, OffProduct};
use pantry_records::{
    normalize_identifier, CanonicalRecord, EntityType, NutritionFact, RecordPayload, UNDATED,
};
use tracing::debug;

use crate::adapter::{Page, SourceAdapter};
use crate::backoff::BackoffPolicy;
use crate::error::{Result, SourceError};

pub const SOURCE: &str = "off";

fn text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Map an OFF product to a canonical nutrition record.
///
/// `barcode` is used when the product carries no `code` of its own. The
/// identifier is the canonical barcode, so zero-padded variants share a key.
/// Products without `last_modified_t` are [`UNDATED`].
pub fn nutrition_record(product: &OffProduct, barcode: &str) -> CanonicalRecord {
    let n = &product.nutriments;
    let payload = NutritionFact {
        product_name: text(product.display_name()),
        brands: text(product.brands.as_deref()),
        energy_kcal: n.energy_kcal_100g,
        fat_g: n.fat_100g,
        saturates_g: n.saturated_fat_100g,
        carbohydrate_g: n.carbohydrates_100g,
        sugars_g: n.sugars_100g,
        fibre_g: n.fiber_100g,
        protein_g: n.proteins_100g,
        salt_g: n.salt_100g,
        nutriscore_grade: text(product.nutriscore_grade.as_deref()),
        ecoscore_grade: text(product.ecoscore_grade.as_deref()),
    };

    let last_updated: DateTime<Utc> = product
        .last_modified_t
        .and_then(|t| Utc.timestamp_opt(t, 0).single())
        .unwrap_or(UNDATED);

    let identifier = product
        .code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(barcode);

    CanonicalRecord::new(
        normalize_identifier(EntityType::NutritionFact, identifier),
        SOURCE,
        last_updated,
        RecordPayload::NutritionFact(payload),
    )
}

/// Nutrition facts from Open Food Facts. Cursors are search page numbers.
pub struct OffSource {
    client: OffClient,
    backoff: BackoffPolicy,
    page_size: u32,
}

impl OffSource {
    pub fn new(client: OffClient, backoff: BackoffPolicy, page_size: u32) -> Self {
        Self {
            client,
            backoff,
            page_size,
        }
    }
}

#[async_trait]
impl SourceAdapter for OffSource {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn entity_types(&self) -> &[EntityType] {
        &[EntityType::NutritionFact]
    }

    async fn fetch_by_id(
        &self,
        entity_type: EntityType,
        identifier: &str,
    ) -> Result<Option<CanonicalRecord>> {
        if entity_type != EntityType::NutritionFact {
            return Err(self.unsupported(entity_type));
        }
        let client = &self.client;
        let product = self
            .backoff
            .retry("OFF product lookup", move || async move {
                Ok(client.get_product(identifier).await?)
            })
            .await?;
        debug!(id = identifier, found = product.is_some(), "OFF lookup");
        Ok(product.map(|p| nutrition_record(&p, identifier)))
    }

    async fn fetch_page(&self, entity_type: EntityType, cursor: Option<&str>) -> Result<Page> {
        if entity_type != EntityType::NutritionFact {
            return Err(self.unsupported(entity_type));
        }
        let page_number = match cursor {
            None => 1,
            Some(c) => c
                .parse::<u32>()
                .map_err(|_| SourceError::Malformed(format!("bad OFF cursor '{}'", c)))?,
        };

        let client = &self.client;
        let page_size = self.page_size;
        let search = self
            .backoff
            .retry("OFF search page", move || async move {
                Ok(client.search_uk_products(page_number, page_size).await?)
            })
            .await?;

        let records = search
            .products
            .iter()
            .map(|p| nutrition_record(p, ""))
            .collect();
        debug!(page = page_number, count = search.products.len(), "OFF page");

        Ok(Page {
            cursor: cursor.map(str::to_string),
            records,
            next_cursor: search.has_next().then(|| (page_number + 1).to_string()),
        })
    }
}
