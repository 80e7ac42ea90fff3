//! Open Prices HTTP client

use crate::error::Result;
use crate::http::{build_http, check_status};
use crate::types::*;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Client for the Open Prices crowdsourced price database
pub struct OpenPricesClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenPricesClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://prices.openfoodfacts.org";

    pub fn new() -> Result<Self> {
        Self::with_base_url(Self::DEFAULT_BASE_URL, Duration::from_secs(10))
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_http(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get one price by id. `None` on 404.
    pub async fn get_price(&self, id: &str) -> Result<Option<OpenPrice>> {
        let url = format!("{}/api/v1/prices/{}", self.base_url, urlencoding::encode(id));
        debug!(url = %url, "Open Prices request");
        let response = self.http.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(check_status(response).await?.json().await?))
    }

    /// One page of prices in `currency`, ordered by id so paging is stable
    pub async fn list_prices(&self, currency: &str, page: u32, size: u32) -> Result<PricePage> {
        let url = format!(
            "{}/api/v1/prices?currency={}&order_by=id&page={}&size={}",
            self.base_url,
            urlencoding::encode(currency),
            page.max(1),
            size.clamp(1, 100)
        );
        debug!(url = %url, "Open Prices request");
        let response = check_status(self.http.get(&url).send().await?).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OffError;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn price(Path(id): Path<String>) -> axum::response::Response {
        match id.as_str() {
            "42" => Json(serde_json::json!({
                "id": 42, "product_code": "5000112637922", "price": 1.25, "currency": "GBP",
                "created": "2024-04-30T18:00:00Z", "updated": null
            }))
            .into_response(),
            "503" => (AxumStatus::SERVICE_UNAVAILABLE, "maintenance").into_response(),
            _ => (AxumStatus::NOT_FOUND, "").into_response(),
        }
    }

    async fn list(Query(params): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
        let page: u64 = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
        Json(serde_json::json!({
            "items": [{"id": page, "price": 2.0, "currency": params.get("currency")}],
            "total": 2, "page": page, "size": 1, "pages": 2
        }))
    }

    async fn spawn_stub() -> String {
        let app = Router::new()
            .route("/api/v1/prices", get(list))
            .route("/api/v1/prices/{id}", get(price));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_get_price() {
        let base = spawn_stub().await;
        let client = OpenPricesClient::with_base_url(&base, Duration::from_secs(5)).unwrap();

        let price = client.get_price("42").await.unwrap().unwrap();
        assert_eq!(price.product_code.as_deref(), Some("5000112637922"));
        assert!(price.updated.is_none());

        assert!(client.get_price("7").await.unwrap().is_none());

        let err = client.get_price("503").await.unwrap_err();
        assert!(matches!(err, OffError::Status { status: 503, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_list_prices_pages() {
        let base = spawn_stub().await;
        let client = OpenPricesClient::with_base_url(&base, Duration::from_secs(5)).unwrap();

        let first = client.list_prices("GBP", 1, 1).await.unwrap();
        assert!(first.has_next());
        assert_eq!(first.items[0].currency.as_deref(), Some("GBP"));

        let second = client.list_prices("GBP", 2, 1).await.unwrap();
        assert!(!second.has_next());
        assert_eq!(second.items[0].id, 2);
    }
}
