//! HTTP server for health checks and batch stats
//!
//! Provides /health and /api/stats.

use crate::types::EtlStats;
use axum::{extract::State, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use pantry_cache::CacheStats;
use pantry_db::IngestionBatch;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tracing::info;

const RECENT_BATCHES: usize = 10;

/// What the status endpoints report, updated by the pipeline as it runs
#[derive(Debug)]
pub struct ServerState {
    pub started_at: DateTime<Utc>,
    /// Batch currently running, if any
    pub current_batch: Option<IngestionBatch>,
    /// Finished batches, newest first
    pub recent_batches: Vec<IngestionBatch>,
    pub stats: EtlStats,
    pub cache: Option<CacheStats>,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            current_batch: None,
            recent_batches: Vec::new(),
            stats: EtlStats::default(),
            cache: None,
        }
    }

    /// Move a finished batch out of `current_batch` into the history
    pub fn finish_batch(&mut self, batch: IngestionBatch) {
        if self
            .current_batch
            .as_ref()
            .is_some_and(|b| b.batch_id == batch.batch_id)
        {
            self.current_batch = None;
        }
        self.stats.add_batch(&batch);
        self.recent_batches.insert(0, batch);
        self.recent_batches.truncate(RECENT_BATCHES);
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedState = Arc<RwLock<ServerState>>;

#[derive(Serialize)]
struct Health {
    status: &'static str,
    ingesting: bool,
}

#[derive(Serialize)]
struct StatsBody {
    uptime: i64,
    stats: EtlStats,
    #[serde(rename = "currentBatch")]
    current_batch: Option<IngestionBatch>,
    #[serde(rename = "recentBatches")]
    recent_batches: Vec<IngestionBatch>,
    cache: Option<CacheStats>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/stats", get(stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the status endpoints on `addr` until the process exits
pub async fn serve(state: SharedState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Status server listening");
    axum::serve(listener, router(state)).await
}

async fn health(State(shared): State<SharedState>) -> Json<Health> {
    let state = shared.read().await;
    Json(Health {
        status: "ok",
        ingesting: state.current_batch.is_some(),
    })
}

async fn stats(State(shared): State<SharedState>) -> Json<StatsBody> {
    let state = shared.read().await;
    Json(StatsBody {
        uptime: (Utc::now() - state.started_at).num_seconds(),
        stats: state.stats.clone(),
        current_batch: state.current_batch.clone(),
        recent_batches: state.recent_batches.clone(),
        cache: state.cache.clone(),
    })
}
