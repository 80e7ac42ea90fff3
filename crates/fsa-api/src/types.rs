//! Data types for FSA API responses
//!
//! Field names follow the API's PascalCase. Numeric values the API sends as
//! strings (geocode) are kept as strings here and parsed by consumers.

use serde::{Deserialize, Deserializer, Serialize};

/// One establishment from `/Establishments/{id}` or a list page
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FsaEstablishment {
    #[serde(rename = "FHRSID")]
    pub fhrsid: u64,
    pub business_name: Option<String>,
    pub business_type: Option<String>,
    #[serde(rename = "BusinessTypeID")]
    pub business_type_id: Option<i64>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub address_line3: Option<String>,
    pub address_line4: Option<String>,
    pub post_code: Option<String>,
    pub rating_value: Option<String>,
    pub rating_key: Option<String>,
    /// ISO 8601 without offset, e.g. `2019-10-08T00:00:00`
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub rating_date: Option<String>,
    pub local_authority_code: Option<String>,
    pub local_authority_name: Option<String>,
    #[serde(rename = "scores")]
    pub scores: Option<FsaScores>,
    #[serde(rename = "geocode")]
    pub geocode: Option<FsaGeocode>,
}

/// Inspection scores; lower is better
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FsaScores {
    pub hygiene: Option<i32>,
    pub structural: Option<i32>,
    pub confidence_in_management: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FsaGeocode {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub longitude: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub latitude: Option<String>,
}

/// Page metadata attached to list responses
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FsaMeta {
    pub data_source: Option<String>,
    pub extract_date: Option<String>,
    pub item_count: Option<u64>,
    pub returncode: Option<String>,
    pub total_count: Option<u64>,
    pub total_pages: Option<u64>,
    pub page_size: Option<u64>,
    pub page_number: Option<u64>,
}

/// Response of `GET /Establishments`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EstablishmentPage {
    #[serde(default)]
    pub establishments: Vec<FsaEstablishment>,
    pub meta: FsaMeta,
}

impl EstablishmentPage {
    /// Whether a later page exists
    pub fn has_next(&self) -> bool {
        match (self.meta.page_number, self.meta.total_pages) {
            (Some(page), Some(total)) => page < total,
            _ => false,
        }
    }
}

/// Filters for listing establishments
#[derive(Debug, Clone)]
pub struct EstablishmentQuery {
    pub page_number: u32,
    pub page_size: u32,
    pub local_authority_id: Option<u32>,
    pub business_type_id: Option<u32>,
    pub name: Option<String>,
}

impl Default for EstablishmentQuery {
    fn default() -> Self {
        Self {
            page_number: 1,
            page_size: 100,
            local_authority_id: None,
            business_type_id: None,
            name: None,
        }
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ESTABLISHMENT_JSON: &str = r#"{
        "FHRSID": 1234567,
        "LocalAuthorityBusinessID": "PI/000123",
        "BusinessName": "The Greasy Spoon",
        "BusinessType": "Restaurant/Cafe/Canteen",
        "BusinessTypeID": 1,
        "AddressLine1": "1 High Street",
        "AddressLine2": "",
        "AddressLine3": "London",
        "AddressLine4": "",
        "PostCode": "SW1A 1AA",
        "Phone": "",
        "RatingValue": "5",
        "RatingKey": "fhrs_5_en-gb",
        "RatingDate": "2023-11-02T00:00:00",
        "LocalAuthorityCode": "504",
        "LocalAuthorityName": "Westminster",
        "scores": {"Hygiene": 0, "Structural": 5, "ConfidenceInManagement": null},
        "SchemeType": "FHRS",
        "geocode": {"longitude": "-0.141588", "latitude": "51.501009"},
        "RightToReply": "",
        "Distance": null,
        "NewRatingPending": false
    }"#;

    #[test]
    fn test_deserialize_establishment() {
        let est: FsaEstablishment = serde_json::from_str(ESTABLISHMENT_JSON).unwrap();
        assert_eq!(est.fhrsid, 1234567);
        assert_eq!(est.business_name.as_deref(), Some("The Greasy Spoon"));
        assert_eq!(est.business_type_id, Some(1));
        assert_eq!(est.post_code.as_deref(), Some("SW1A 1AA"));
        assert_eq!(est.rating_date.as_deref(), Some("2023-11-02T00:00:00"));
        let scores = est.scores.unwrap();
        assert_eq!(scores.structural, Some(5));
        assert_eq!(scores.confidence_in_management, None);
        assert_eq!(est.geocode.unwrap().latitude.as_deref(), Some("51.501009"));
    }

    #[test]
    fn test_blank_rating_date_is_none() {
        let json = r#"{"FHRSID": 9, "RatingDate": "", "geocode": {"longitude": "", "latitude": null}}"#;
        let est: FsaEstablishment = serde_json::from_str(json).unwrap();
        assert!(est.rating_date.is_none());
        let geocode = est.geocode.unwrap();
        assert!(geocode.longitude.is_none());
        assert!(geocode.latitude.is_none());
    }

    #[test]
    fn test_page_has_next() {
        let json = r#"{
            "establishments": [],
            "meta": {"dataSource": "Lucene", "extractDate": "2024-05-01T00:00:00",
                     "itemCount": 0, "returncode": "OK", "totalCount": 250,
                     "totalPages": 3, "pageSize": 100, "pageNumber": 2},
            "links": []
        }"#;
        let page: EstablishmentPage = serde_json::from_str(json).unwrap();
        assert!(page.has_next());

        let last = EstablishmentPage {
            meta: FsaMeta {
                page_number: Some(3),
                ..page.meta.clone()
            },
            ..page
        };
        assert!(!last.has_next());
    }
}
