//! HTTP surface of the oracle
//!
//! Public: `/`, `/health`, `/metrics`, `/v1/telemetry`, `/v1/global_status`,
//! `/v1/risk_leaderboard`. Behind `x-pro-key`: `/v1/route`, `/v1/log_trade`,
//! `/v1/logs`.

pub mod journal;
pub mod routes;

pub use routes::ApiError;

use anyhow::Context;
use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::auth::api_key_middleware;
use crate::config::OracleConfig;
use crate::metrics::ServiceMetrics;
use crate::middleware::{rate_limit_middleware, request_logging, RateLimitConfig, RateLimitLayer};
use crate::store::{CachedSampleStore, SampleStore, SqliteSampleStore, StoreError};
use crate::telemetry::TelemetryEngine;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: TelemetryEngine,
    /// Trade journal lives next to the samples but never feeds the engine
    pub journal: Arc<SqliteSampleStore>,
    pub metrics: Arc<ServiceMetrics>,
    pub limiter: RateLimitLayer,
    /// Present when window reads are served from memory
    pub cache: Option<Arc<CachedSampleStore>>,
}

impl AppState {
    /// Open the database, prime the cache if enabled, and wire the shared state.
    pub async fn from_config(config: &OracleConfig) -> anyhow::Result<Self> {
        let sqlite = Arc::new(
            SqliteSampleStore::open(&config.store.db_path)
                .with_context(|| format!("Failed to open database at {}", config.store.db_path))?,
        );

        let cache = if config.store.cache_enabled {
            let cache = CachedSampleStore::new(
                sqlite.clone(),
                config.store.cache_capacity_per_source,
                config.store.cache_horizon,
            );
            cache.prime().await.context("Failed to prime sample cache")?;
            Some(Arc::new(cache))
        } else {
            info!("Sample cache disabled, every query reads SQLite");
            None
        };
        let samples: Arc<dyn SampleStore> = match &cache {
            Some(cache) => cache.clone(),
            None => sqlite.clone(),
        };

        let metrics = Arc::new(ServiceMetrics::new());
        Ok(Self {
            engine: TelemetryEngine::new(samples, config.aggregation.clone()),
            journal: sqlite,
            metrics: metrics.clone(),
            limiter: RateLimitLayer::new(RateLimitConfig::from(&config.ingest))
                .with_metrics(metrics),
            cache,
        })
    }

    /// Count and log a store failure, then map it to its HTTP error.
    pub(crate) fn store_failure(&self, err: StoreError) -> ApiError {
        self.metrics.record_store_error();
        error!(error = %err, retryable = err.is_retryable(), "Sample store failure");
        ApiError::from(err)
    }
}

/// Build the full router with CORS, tracing and request logging applied.
pub fn create_router(state: AppState) -> Router {
    let ingest = Router::new()
        .route("/v1/telemetry", post(routes::submit_telemetry))
        .route_layer(from_fn_with_state(
            state.limiter.clone(),
            rate_limit_middleware,
        ));

    let pro = Router::new()
        .route("/v1/route", post(routes::route_order))
        .route("/v1/log_trade", post(journal::log_trade))
        .route("/v1/logs", get(journal::list_logs))
        .route_layer(from_fn(api_key_middleware));

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health_check))
        .route("/metrics", get(routes::metrics))
        .route("/v1/global_status", get(routes::global_status))
        .route("/v1/risk_leaderboard", get(routes::risk_leaderboard))
        .merge(ingest)
        .merge(pro)
        .layer(from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
