//! Open Food Facts HTTP client

use crate::error::Result;
use crate::http::{build_http, check_status};
use crate::types::*;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

/// Fields requested from OFF; keeps responses small
const PRODUCT_FIELDS: &str = "code,product_name,product_name_en,brands,last_modified_t,nutriscore_grade,ecoscore_grade,nutriments";

/// Client for the Open Food Facts product database
pub struct OffClient {
    http: reqwest::Client,
    base_url: String,
}

impl OffClient {
    pub const DEFAULT_BASE_URL: &'static str = "https://world.openfoodfacts.org";

    /// Create a client against the public API with a 10 second timeout
    pub fn new() -> Result<Self> {
        Self::with_base_url(Self::DEFAULT_BASE_URL, Duration::from_secs(10))
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: build_http(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get a product by barcode. `None` when OFF reports it unknown.
    pub async fn get_product(&self, barcode: &str) -> Result<Option<OffProduct>> {
        let url = format!(
            "{}/api/v2/product/{}?fields={}",
            self.base_url,
            urlencoding::encode(barcode),
            PRODUCT_FIELDS
        );
        debug!(url = %url, "OFF request");
        let response = self.http.get(&url).send().await?;

        // v2 answers unknown barcodes with 404 and a `status: 0` body
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: ProductResponse = check_status(response).await?.json().await?;
        if envelope.status != 1 {
            return Ok(None);
        }
        Ok(envelope.product.map(|mut product| {
            if product.code.is_none() {
                product.code = envelope.code.clone();
            }
            product
        }))
    }

    /// One page of UK products, oldest modification first
    pub async fn search_uk_products(&self, page: u32, page_size: u32) -> Result<SearchPage> {
        let url = format!(
            "{}/api/v2/search?countries_tags_en=united-kingdom&sort_by=last_modified_t&page={}&page_size={}&fields={}",
            self.base_url,
            page.max(1),
            page_size.clamp(1, 100),
            PRODUCT_FIELDS
        );
        debug!(url = %url, "OFF request");
        let response = check_status(self.http.get(&url).send().await?).await?;
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OffError;
    use axum::extract::Path;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};

    async fn product(Path(barcode): Path<String>) -> axum::response::Response {
        match barcode.as_str() {
            "5000112637922" => Json(serde_json::json!({
                "code": "5000112637922",
                "status": 1,
                "product": {"product_name": "Baked Beans", "last_modified_t": 1714564800}
            }))
            .into_response(),
            "50000000" => Json(serde_json::json!({"code": "50000000", "status": 0})).into_response(),
            "42424242" => (AxumStatus::TOO_MANY_REQUESTS, "slow down").into_response(),
            _ => (
                AxumStatus::NOT_FOUND,
                Json(serde_json::json!({"status": 0, "status_verbose": "product not found"})),
            )
                .into_response(),
        }
    }

    async fn search() -> Json<serde_json::Value> {
        Json(serde_json::json!({
            "count": 2, "page": 1, "page_count": 2, "page_size": 100,
            "products": [{"code": "5000112637922", "product_name": "Baked Beans"},
                         {"code": "50000000", "product_name": "Crisps"}]
        }))
    }

    async fn spawn_stub() -> String {
        let app = Router::new()
            .route("/api/v2/product/{barcode}", get(product))
            .route("/api/v2/search", get(search));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_get_product_outcomes() {
        let base = spawn_stub().await;
        let client = OffClient::with_base_url(&base, Duration::from_secs(5)).unwrap();

        let found = client.get_product("5000112637922").await.unwrap().unwrap();
        assert_eq!(found.code.as_deref(), Some("5000112637922"));
        assert_eq!(found.last_modified_t, Some(1714564800));

        assert!(client.get_product("50000000").await.unwrap().is_none());
        assert!(client.get_product("12345678").await.unwrap().is_none());

        let err = client.get_product("42424242").await.unwrap_err();
        assert!(matches!(err, OffError::RateLimited { retry_after: None }));
    }

    #[tokio::test]
    async fn test_search_page() {
        let base = spawn_stub().await;
        let client = OffClient::with_base_url(&base, Duration::from_secs(5)).unwrap();
        let page = client.search_uk_products(1, 100).await.unwrap();
        assert_eq!(page.products.len(), 2);
        assert!(!page.has_next());
    }
}
