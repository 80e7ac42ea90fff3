//! FSA establishments adapter

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use fsa_api::{EstablishmentQuery, FsaClient, FsaEstablishment};
use pantry_records::{CanonicalRecord, EntityType, Establishment, RecordPayload, UNDATED};
use tracing::debug;

use crate::adapter::{Page, SourceAdapter};
use crate::backoff::BackoffPolicy;
use crate::error::{Result, SourceError};

pub const SOURCE: &str = "fsa";

/// Parse the timestamp shapes FSA uses. Placeholder years (`0001-01-01`)
/// count as absent.
pub fn parse_fsa_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    let parsed = DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|dt| dt.and_utc())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })?;
    (parsed.year() >= 1900).then_some(parsed)
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Map an FSA establishment to a canonical record.
///
/// `last_updated` is the rating date, then the listing's extract date, else
/// [`UNDATED`] so that any dated copy replaces this one.
pub fn establishment_record(
    est: &FsaEstablishment,
    extract_date: Option<DateTime<Utc>>,
) -> CanonicalRecord {
    let rating_date = est.rating_date.as_deref().and_then(parse_fsa_datetime);
    let scores = est.scores.clone().unwrap_or_default();
    let geocode = est.geocode.clone().unwrap_or_default();

    let payload = Establishment {
        business_name: non_blank(&est.business_name),
        business_type: non_blank(&est.business_type),
        business_type_id: est.business_type_id,
        address_line_1: non_blank(&est.address_line1),
        address_line_2: non_blank(&est.address_line2),
        address_line_3: non_blank(&est.address_line3),
        address_line_4: non_blank(&est.address_line4),
        postcode: non_blank(&est.post_code),
        rating_value: non_blank(&est.rating_value),
        rating_date,
        hygiene_score: scores.hygiene,
        structural_score: scores.structural,
        confidence_in_management_score: scores.confidence_in_management,
        latitude: geocode.latitude.as_deref().and_then(|v| v.trim().parse().ok()),
        longitude: geocode.longitude.as_deref().and_then(|v| v.trim().parse().ok()),
        local_authority_code: non_blank(&est.local_authority_code),
        local_authority_name: non_blank(&est.local_authority_name),
    };

    CanonicalRecord::new(
        est.fhrsid.to_string(),
        SOURCE,
        rating_date.or(extract_date).unwrap_or(UNDATED),
        RecordPayload::Establishment(payload),
    )
}

/// Establishments from the FSA ratings API. Cursors are page numbers.
pub struct FsaSource {
    client: FsaClient,
    backoff: BackoffPolicy,
    page_size: u32,
    local_authority_id: Option<u32>,
}

impl FsaSource {
    pub fn new(client: FsaClient, backoff: BackoffPolicy, page_size: u32) -> Self {
        Self {
            client,
            backoff,
            page_size,
            local_authority_id: None,
        }
    }

    /// Restrict paging to one local authority
    pub fn with_local_authority(mut self, local_authority_id: Option<u32>) -> Self {
        self.local_authority_id = local_authority_id;
        self
    }
}

#[async_trait]
impl SourceAdapter for FsaSource {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn entity_types(&self) -> &[EntityType] {
        &[EntityType::Establishment]
    }

    async fn fetch_by_id(
        &self,
        entity_type: EntityType,
        identifier: &str,
    ) -> Result<Option<CanonicalRecord>> {
        if entity_type != EntityType::Establishment {
            return Err(self.unsupported(entity_type));
        }
        let client = &self.client;
        let found = self
            .backoff
            .retry("FSA establishment lookup", move || async move {
                Ok(client.get_establishment(identifier).await?)
            })
            .await?;
        debug!(id = identifier, found = found.is_some(), "FSA lookup");
        Ok(found.map(|est| establishment_record(&est, None)))
    }

    async fn fetch_page(&self, entity_type: EntityType, cursor: Option<&str>) -> Result<Page> {
        if entity_type != EntityType::Establishment {
            return Err(self.unsupported(entity_type));
        }
        let page_number = match cursor {
            None => 1,
            Some(c) => c
                .parse::<u32>()
                .map_err(|_| SourceError::Malformed(format!("bad FSA cursor '{}'", c)))?,
        };
        let query = EstablishmentQuery {
            page_number,
            page_size: self.page_size,
            local_authority_id: self.local_authority_id,
            ..Default::default()
        };

        let client = &self.client;
        let query = &query;
        let listing = self
            .backoff
            .retry("FSA establishment page", move || async move {
                Ok(client.list_establishments(query).await?)
            })
            .await?;

        let extract_date = listing
            .meta
            .extract_date
            .as_deref()
            .and_then(parse_fsa_datetime);
        let records = listing
            .establishments
            .iter()
            .map(|est| establishment_record(est, extract_date))
            .collect();
        debug!(page = page_number, count = listing.establishments.len(), "FSA page");

        Ok(Page {
            cursor: cursor.map(str::to_string),
            records,
            next_cursor: listing.has_next().then(|| (page_number + 1).to_string()),
        })
    }
}
