//! Pantry ETL - ingests UK food data into the record store
//!
//! `ingest` pulls one entity type from its upstream source into the record
//! store, invalidating cached copies as records change. `lookup` runs a
//! single tiered read and `flush-cache` empties the cache tier.

use clap::{Parser, Subcommand};
use fsa_api::FsaClient;
use off_api::{OffClient, OpenPricesClient};
use pantry_cache::{CacheTier, MemoryCacheTier, RedisCacheTier, DEFAULT_KEY_PREFIX};
use pantry_db::{IngestionLog, LeaseStore, MemoryStore, PgStore, RecordStore};
use pantry_etl::{serve, Config, EtlError, Pipeline, Result, ServerState, SharedState};
use pantry_read::{Lookup, ReadOrchestrator};
use pantry_records::EntityType;
use pantry_sources::{CompositionSource, FsaSource, OffSource, OpenPricesSource, SourceRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pantry-etl")]
#[command(about = "Ingest and look up UK food hygiene, nutrition and price data")]
struct Cli {
    /// Use the in-memory store when no database is configured
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one entity type from its upstream source
    Ingest {
        /// establishment, nutrition_fact, price_point or food_composition
        #[arg(long)]
        entity: EntityType,

        /// Run a single batch and exit
        #[arg(long)]
        once: bool,

        /// Seconds to wait between batches
        #[arg(long, default_value_t = 3600)]
        interval_secs: u64,
    },
    /// Read one record through cache, store and upstream
    Lookup { entity: EntityType, id: String },
    /// Drop every cache entry
    FlushCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter = EnvFilter::from_default_env().add_directive("pantry_etl=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match config.database_url.clone() {
        Some(url) => {
            let store = PgStore::connect(&url).await?;
            store.migrate().await?;
            run(cli.command, config, Arc::new(store)).await
        }
        None if cli.memory => {
            warn!("No database configured; using the in-memory store");
            run(cli.command, config, Arc::new(MemoryStore::new())).await
        }
        None => Err(EtlError::Config(
            "DATABASE_URL or DB_HOST environment variable is required (or pass --memory)"
                .to_string(),
        )),
    }
}

async fn run<S>(command: Command, config: Config, store: Arc<S>) -> Result<()>
where
    S: RecordStore + IngestionLog + LeaseStore + 'static,
{
    let cache = build_cache(&config).await?;

    match command {
        Command::Ingest {
            entity,
            once,
            interval_secs,
        } => {
            let sources = build_sources(&config)?;
            ingest(&config, store, cache, sources, entity, once, interval_secs).await
        }
        Command::Lookup { entity, id } => {
            let sources = build_sources(&config)?;
            let reader = ReadOrchestrator::new(cache, store, sources)
                .with_policy(config.cache_policy()?)
                .with_timeouts(config.tier_timeouts());
            match reader.read(entity, &id).await {
                Lookup::Found { record, tier } => {
                    info!(%tier, "Record found");
                    let json = serde_json::to_string_pretty(&record)
                        .map_err(|e| EtlError::Config(e.to_string()))?;
                    println!("{}", json);
                }
                Lookup::NotFound => println!("{} {} not found", entity, id.trim()),
                Lookup::Degraded { reason } => {
                    println!("{} {} unavailable: {}", entity, id.trim(), reason)
                }
            }
            Ok(())
        }
        Command::FlushCache => {
            cache.flush().await?;
            info!(backend = cache.stats().backend, "Cache flushed");
            Ok(())
        }
    }
}

async fn ingest<S>(
    config: &Config,
    store: Arc<S>,
    cache: Arc<dyn CacheTier>,
    sources: SourceRegistry,
    entity: EntityType,
    once: bool,
    interval_secs: u64,
) -> Result<()>
where
    S: RecordStore + IngestionLog + LeaseStore + 'static,
{
    let state: SharedState = Arc::new(RwLock::new(ServerState::new()));

    // Status endpoints run for the life of the process
    let http_state = state.clone();
    let http_addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tokio::spawn(async move {
        if let Err(e) = serve(http_state, http_addr).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Ctrl-C stops the running batch at the next chunk boundary
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stop requested; checkpointing current batch");
            let _ = cancel_tx.send(true);
        }
    });

    let pipeline =
        Pipeline::new(store, cache, sources, config.pipeline_settings()).with_status(state);

    loop {
        match pipeline.run_batch(entity, cancel_rx.clone()).await {
            Ok(batch) => info!(
                batch_id = batch.batch_id,
                status = %batch.status,
                upserted = batch.records_upserted,
                failed = batch.records_failed,
                "Ingestion batch done"
            ),
            Err(e @ EtlError::LeaseConflict { .. }) if !once => {
                warn!("{}; trying again next interval", e)
            }
            Err(e) => return Err(e),
        }

        if once || *cancel_rx.borrow() {
            return Ok(());
        }

        let mut stop = cancel_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {}
            _ = stop.wait_for(|stopped| *stopped) => return Ok(()),
        }
    }
}

async fn build_cache(config: &Config) -> Result<Arc<dyn CacheTier>> {
    match &config.redis_url {
        Some(url) => {
            info!("Using Redis cache tier");
            let tier =
                RedisCacheTier::connect(url, DEFAULT_KEY_PREFIX, config.cache_timeout).await?;
            Ok(Arc::new(tier))
        }
        None => Ok(Arc::new(MemoryCacheTier::new())),
    }
}

fn build_sources(config: &Config) -> Result<SourceRegistry> {
    let backoff = config.backoff();
    let page_size = config.etl_page_size;

    let fsa = FsaClient::with_base_url(&config.fsa_base_url, config.adapter_timeout)?;
    let off = OffClient::with_base_url(&config.off_base_url, config.adapter_timeout)?;
    let prices =
        OpenPricesClient::with_base_url(&config.open_prices_base_url, config.adapter_timeout)?;

    let mut sources = SourceRegistry::new()
        .with(Arc::new(
            FsaSource::new(fsa, backoff.clone(), page_size)
                .with_local_authority(config.fsa_local_authority_id),
        ))
        .with(Arc::new(OffSource::new(off, backoff.clone(), page_size)))
        .with(Arc::new(OpenPricesSource::new(prices, backoff, page_size)));

    if let Some(path) = &config.gov_nutrition_csv {
        info!(path = %path.display(), "Food composition table configured");
        sources.register(Arc::new(CompositionSource::new(path.clone(), page_size as usize)));
    }
    Ok(sources)
}
