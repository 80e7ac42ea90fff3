use crate::error::{OffError, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use std::time::Duration;

/// Both upstreams ask callers to identify themselves
pub(crate) const DEFAULT_USER_AGENT: &str = concat!("pantry/", env!("CARGO_PKG_VERSION"));

pub(crate) fn build_http(timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()?)
}

/// Turn 429 and other failures into typed errors
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(OffError::RateLimited {
            retry_after: parse_retry_after(response.headers()),
        });
    }
    let body = response.text().await.unwrap_or_default();
    Err(OffError::Status {
        status: status.as_u16(),
        body,
    })
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
