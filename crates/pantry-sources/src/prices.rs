//! Open Prices adapter

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use off_api::{OpenPrice, OpenPricesClient};
use pantry_records::{CanonicalRecord, EntityType, PricePoint, RecordPayload, UNDATED};
use tracing::debug;

use crate::adapter::{Page, SourceAdapter};
use crate::backoff::BackoffPolicy;
use crate::error::{Result, SourceError};

pub const SOURCE: &str = "open_prices";
pub const DEFAULT_CURRENCY: &str = "GBP";

fn parse_timestamp(s: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s?.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Map an Open Prices price to a canonical record.
///
/// `last_updated` is `updated`, then `created`, else [`UNDATED`].
pub fn price_record(price: &OpenPrice) -> CanonicalRecord {
    let product_name = price
        .product_name
        .clone()
        .or_else(|| price.product.as_ref().and_then(|p| p.product_name.clone()))
        .filter(|s| !s.trim().is_empty());

    let payload = PricePoint {
        product_code: price.product_code.clone().filter(|s| !s.trim().is_empty()),
        product_name,
        price: price.price,
        currency: price.currency.clone(),
        price_per: price.price_per.clone(),
        location: price.location.as_ref().and_then(|l| l.label()),
        observed_on: price
            .date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()),
    };

    let last_updated = parse_timestamp(price.updated.as_deref())
        .or_else(|| parse_timestamp(price.created.as_deref()))
        .unwrap_or(UNDATED);

    CanonicalRecord::new(
        price.id.to_string(),
        SOURCE,
        last_updated,
        RecordPayload::PricePoint(payload),
    )
}

/// Price points from Open Prices, limited to one currency. Cursors are page numbers.
pub struct OpenPricesSource {
    client: OpenPricesClient,
    backoff: BackoffPolicy,
    page_size: u32,
    currency: String,
}

impl OpenPricesSource {
    pub fn new(client: OpenPricesClient, backoff: BackoffPolicy, page_size: u32) -> Self {
        Self {
            client,
            backoff,
            page_size,
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

#[async_trait]
impl SourceAdapter for OpenPricesSource {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn entity_types(&self) -> &[EntityType] {
        &[EntityType::PricePoint]
    }

    async fn fetch_by_id(
        &self,
        entity_type: EntityType,
        identifier: &str,
    ) -> Result<Option<CanonicalRecord>> {
        if entity_type != EntityType::PricePoint {
            return Err(self.unsupported(entity_type));
        }
        let client = &self.client;
        let price = self
            .backoff
            .retry("Open Prices lookup", move || async move {
                Ok(client.get_price(identifier).await?)
            })
            .await?;
        debug!(id = identifier, found = price.is_some(), "Open Prices lookup");
        Ok(price.as_ref().map(price_record))
    }

    async fn fetch_page(&self, entity_type: EntityType, cursor: Option<&str>) -> Result<Page> {
        if entity_type != EntityType::PricePoint {
            return Err(self.unsupported(entity_type));
        }
        let page_number = match cursor {
            None => 1,
            Some(c) => c.parse::<u32>().map_err(|_| {
                SourceError::Malformed(format!("bad Open Prices cursor '{}'", c))
            })?,
        };

        let client = &self.client;
        let currency = self.currency.as_str();
        let page_size = self.page_size;
        let listing = self
            .backoff
            .retry("Open Prices page", move || async move {
                Ok(client.list_prices(currency, page_number, page_size).await?)
            })
            .await?;

        let records = listing.items.iter().map(price_record).collect();
        debug!(page = page_number, count = listing.items.len(), "Open Prices page");

        Ok(Page {
            cursor: cursor.map(str::to_string),
            records,
            next_cursor: listing.has_next().then(|| (page_number + 1).to_string()),
        })
    }
}
