//! Environment configuration

use pantry_cache::CachePolicy;
use pantry_read::TierTimeouts;
use pantry_sources::BackoffPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{EtlError, Result};
use crate::types::PipelineSettings;

/// Worker configuration, read from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// `None` runs against the in-memory store
    pub database_url: Option<String>,
    /// `None` uses the in-process cache
    pub redis_url: Option<String>,
    pub cache_ttl_positive: Duration,
    pub cache_ttl_negative: Duration,
    pub cache_timeout: Duration,
    pub store_timeout: Duration,
    pub adapter_timeout: Duration,
    pub adapter_max_attempts: u32,
    pub adapter_retry_backoff: Duration,
    pub adapter_retry_max_delay: Duration,
    pub etl_checkpoint_interval: u64,
    pub etl_lease_timeout: Duration,
    pub etl_page_size: u32,
    pub fsa_base_url: String,
    pub off_base_url: String,
    pub open_prices_base_url: String,
    pub fsa_local_authority_id: Option<u32>,
    /// Government nutrient table export; `None` leaves `food_composition` unsourced
    pub gov_nutrition_csv: Option<PathBuf>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self {
            database_url: database_url(&lookup),
            redis_url: lookup("REDIS_URL").filter(|s| !s.is_empty()),
            cache_ttl_positive: Duration::from_secs(parse(&lookup, "CACHE_TTL_POSITIVE_SECS", 3600)?),
            cache_ttl_negative: Duration::from_secs(parse(&lookup, "CACHE_TTL_NEGATIVE_SECS", 300)?),
            cache_timeout: Duration::from_millis(parse(&lookup, "CACHE_TIMEOUT_MS", 50)?),
            store_timeout: Duration::from_millis(parse(&lookup, "STORE_TIMEOUT_MS", 2000)?),
            adapter_timeout: Duration::from_secs(parse(&lookup, "ADAPTER_TIMEOUT_SECS", 10)?),
            adapter_max_attempts: parse(&lookup, "ADAPTER_MAX_ATTEMPTS", 3)?,
            adapter_retry_backoff: Duration::from_millis(parse(
                &lookup,
                "ADAPTER_RETRY_BACKOFF_MS",
                1000,
            )?),
            adapter_retry_max_delay: Duration::from_secs(parse(
                &lookup,
                "ADAPTER_RETRY_MAX_DELAY_SECS",
                10,
            )?),
            etl_checkpoint_interval: parse(&lookup, "ETL_CHECKPOINT_INTERVAL", 500)?,
            etl_lease_timeout: Duration::from_secs(parse(&lookup, "ETL_LEASE_TIMEOUT_SECS", 900)?),
            etl_page_size: parse(&lookup, "ETL_PAGE_SIZE", 100)?,
            fsa_base_url: lookup("FSA_BASE_URL")
                .unwrap_or_else(|| fsa_api::FsaClient::DEFAULT_BASE_URL.to_string()),
            off_base_url: lookup("OFF_BASE_URL")
                .unwrap_or_else(|| off_api::OffClient::DEFAULT_BASE_URL.to_string()),
            open_prices_base_url: lookup("OPEN_PRICES_BASE_URL")
                .unwrap_or_else(|| off_api::OpenPricesClient::DEFAULT_BASE_URL.to_string()),
            fsa_local_authority_id: match lookup("FSA_LOCAL_AUTHORITY_ID") {
                Some(v) => Some(v.trim().parse().map_err(|_| {
                    EtlError::Config(format!("FSA_LOCAL_AUTHORITY_ID must be a number, got '{}'", v))
                })?),
                None => None,
            },
            gov_nutrition_csv: lookup("GOV_NUTRITION_CSV")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            port: parse(&lookup, "PORT", 8080)?,
        };

        if config.etl_page_size == 0 {
            return Err(EtlError::Config("ETL_PAGE_SIZE must be at least 1".to_string()));
        }
        if config.etl_checkpoint_interval == 0 {
            return Err(EtlError::Config(
                "ETL_CHECKPOINT_INTERVAL must be at least 1".to_string(),
            ));
        }
        // Reject bad TTL pairs at startup
        config.cache_policy()?;
        Ok(config)
    }

    pub fn cache_policy(&self) -> Result<CachePolicy> {
        Ok(CachePolicy::new(
            self.cache_ttl_positive,
            self.cache_ttl_negative,
        )?)
    }

    pub fn tier_timeouts(&self) -> TierTimeouts {
        TierTimeouts {
            cache: self.cache_timeout,
            store: self.store_timeout,
            adapter: self.adapter_timeout,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.adapter_max_attempts.max(1),
            initial_delay: self.adapter_retry_backoff,
            max_delay: self.adapter_retry_max_delay,
            ..BackoffPolicy::default()
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            checkpoint_interval: self.etl_checkpoint_interval,
            lease_timeout: self.etl_lease_timeout,
            max_rate_limit_waits: self.adapter_max_attempts,
            ..PipelineSettings::default()
        }
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T> {
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            EtlError::Config(format!("{} must be a number, got '{}'", key, raw))
        }),
        _ => Ok(default),
    }
}

/// `DATABASE_URL`, or a URL assembled from `DB_*` parts (Cloud SQL style)
fn database_url(lookup: &impl Fn(&str) -> Option<String>) -> Option<String> {
    if let Some(url) = lookup("DATABASE_URL") {
        return Some(url);
    }
    let host = lookup("DB_HOST")?;
    let name = lookup("DB_NAME").unwrap_or_else(|| "pantry".to_string());
    let user = lookup("DB_USER").unwrap_or_else(|| "postgres".to_string());
    let password = lookup("DB_PASSWORD").unwrap_or_default();

    if host.starts_with("/cloudsql/") {
        Some(format!(
            "postgresql://{}:{}@localhost/{}?host={}",
            user, password, name, host
        ))
    } else {
        let port = lookup("DB_PORT").unwrap_or_else(|| "5432".to_string());
        Some(format!(
            "postgresql://{}:{}@{}:{}/{}",
            user, password, host, port, name
        ))
    }
}
