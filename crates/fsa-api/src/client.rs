//! FSA API HTTP client

use crate::error::{FsaError, Result};
use crate::types::*;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Client for the Food Standards Agency ratings API
///
/// Every request carries the `x-api-version: 2` header the API requires.
pub struct FsaClient {
    http: reqwest::Client,
    base_url: String,
}

impl FsaClient {
    /// Public FSA ratings API
    pub const DEFAULT_BASE_URL: &'static str = "https://api.ratings.food.gov.uk";

    /// Create a client against the public API with a 10 second timeout
    pub fn new() -> Result<Self> {
        Self::with_base_url(Self::DEFAULT_BASE_URL, Duration::from_secs(10))
    }

    /// Create a client with a custom base URL and request timeout
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-version", HeaderValue::from_static("2"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get one establishment by FHRSID. `None` when FSA has no such id.
    pub async fn get_establishment(&self, fhrsid: &str) -> Result<Option<FsaEstablishment>> {
        let url = format!(
            "{}/Establishments/{}",
            self.base_url,
            urlencoding::encode(fhrsid)
        );
        debug!(url = %url, "FSA request");
        let response = self.http.get(&url).send().await?;

        // FSA answers unknown ids with 404, and with 400 for ids it cannot parse
        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST
        ) {
            return Ok(None);
        }
        let response = check_status(response).await?;
        Ok(Some(response.json().await?))
    }

    /// List one page of establishments
    pub async fn list_establishments(
        &self,
        query: &EstablishmentQuery,
    ) -> Result<EstablishmentPage> {
        let mut url = format!(
            "{}/Establishments?pageNumber={}&pageSize={}",
            self.base_url,
            query.page_number.max(1),
            query.page_size.clamp(1, 5000)
        );
        if let Some(id) = query.local_authority_id {
            url.push_str(&format!("&localAuthorityId={}", id));
        }
        if let Some(id) = query.business_type_id {
            url.push_str(&format!("&businessTypeId={}", id));
        }
        if let Some(name) = &query.name {
            url.push_str(&format!("&name={}", urlencoding::encode(name)));
        }

        debug!(url = %url, "FSA request");
        let response = check_status(self.http.get(&url).send().await?).await?;
        Ok(response.json().await?)
    }
}

/// Turn 429 and other failures into typed errors
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FsaError::RateLimited {
            retry_after: parse_retry_after(response.headers()),
        });
    }
    let body = response.text().await.unwrap_or_default();
    Err(FsaError::Status {
        status: status.as_u16(),
        body,
    })
}

/// `Retry-After` in delta-seconds form
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};

    async fn establishment(Path(id): Path<String>, headers: AxumHeaders) -> impl IntoResponse {
        if headers.get("x-api-version").and_then(|v| v.to_str().ok()) != Some("2") {
            return (AxumStatus::BAD_GATEWAY, Json(serde_json::json!({}))).into_response();
        }
        match id.as_str() {
            "1" => Json(serde_json::json!({
                "FHRSID": 1,
                "BusinessName": "Chippy",
                "RatingValue": "4",
                "RatingDate": "2024-01-15T00:00:00"
            }))
            .into_response(),
            "429" => (AxumStatus::TOO_MANY_REQUESTS, [("retry-after", "7")], "slow down")
                .into_response(),
            "500" => (AxumStatus::INTERNAL_SERVER_ERROR, "boom").into_response(),
            _ => (AxumStatus::NOT_FOUND, "").into_response(),
        }
    }

    async fn list() -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "establishments": [{"FHRSID": 1, "BusinessName": "Chippy", "RatingValue": "4"}],
            "meta": {"totalPages": 2, "pageNumber": 1, "extractDate": "2024-05-01T00:00:00"},
            "links": []
        }))
    }

    async fn spawn_stub() -> String {
        let app = Router::new()
            .route("/Establishments", get(list))
            .route("/Establishments/{id}", get(establishment));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(30)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn test_get_establishment_found_and_missing() {
        let base = spawn_stub().await;
        let client = FsaClient::with_base_url(&base, Duration::from_secs(5)).unwrap();

        let est = client.get_establishment("1").await.unwrap().unwrap();
        assert_eq!(est.fhrsid, 1);
        assert_eq!(est.business_name.as_deref(), Some("Chippy"));

        assert!(client.get_establishment("99").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_and_server_error() {
        let base = spawn_stub().await;
        let client = FsaClient::with_base_url(&base, Duration::from_secs(5)).unwrap();

        match client.get_establishment("429").await {
            Err(FsaError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("expected rate limit, got {:?}", other),
        }

        let err = client.get_establishment("500").await.unwrap_err();
        assert!(matches!(err, FsaError::Status { status: 500, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_list_establishments() {
        let base = spawn_stub().await;
        let client = FsaClient::with_base_url(&base, Duration::from_secs(5)).unwrap();

        let page = client
            .list_establishments(&EstablishmentQuery::default())
            .await
            .unwrap();
        assert_eq!(page.establishments.len(), 1);
        assert!(page.has_next());
    }
}
