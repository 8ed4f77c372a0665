use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::routing::{recommend, RouteDecision, RouteRequest};
use super::scoring::{health_leaderboard, risk_leaderboard, HealthEntry, RiskEntry};
use super::stats::{compute_all, SourceStats, StatsParams};
use super::window::collect_window;
use crate::config::AggregationConfig;
use crate::models::{now_millis, NewSample, Sample};
use crate::store::{SampleStore, StoreError};

/// Stateless query front-end over a [`SampleStore`].
///
/// Every query reads its window fresh and recomputes statistics; nothing is
/// shared between requests except the store itself.
#[derive(Clone)]
pub struct TelemetryEngine {
    store: Arc<dyn SampleStore>,
    config: AggregationConfig,
    params: StatsParams,
}

impl TelemetryEngine {
    pub fn new(store: Arc<dyn SampleStore>, config: AggregationConfig) -> Self {
        let params = StatsParams::from(&config);
        Self {
            store,
            config,
            params,
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    pub async fn record(&self, sample: NewSample) -> Result<Sample, StoreError> {
        let stored = self.store.record_sample(sample).await?;
        debug!(
            source = %stored.source,
            latency_ms = stored.latency_ms,
            slippage = stored.slippage,
            status = stored.status.as_str(),
            "Sample recorded"
        );
        Ok(stored)
    }

    /// Statistics for every source with enough samples in `[now - window, now]`.
    pub async fn stats_at(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<SourceStats>, StoreError> {
        let snapshot = collect_window(self.store.as_ref(), now, window).await?;
        let stats = compute_all(&snapshot, &self.params);
        debug!(
            window_secs = window.as_secs(),
            samples = snapshot.total_samples,
            sources = snapshot.windows.len(),
            qualifying = stats.len(),
            "Window aggregated"
        );
        Ok(stats)
    }

    pub async fn global_status(&self) -> Result<Vec<HealthEntry>, StoreError> {
        self.global_status_at(now_millis()).await
    }

    pub async fn global_status_at(&self, now: DateTime<Utc>) -> Result<Vec<HealthEntry>, StoreError> {
        let stats = self.stats_at(now, self.config.public_window).await?;
        Ok(health_leaderboard(&stats))
    }

    pub async fn risk_leaderboard(&self) -> Result<Vec<RiskEntry>, StoreError> {
        self.risk_leaderboard_at(now_millis()).await
    }

    pub async fn risk_leaderboard_at(&self, now: DateTime<Utc>) -> Result<Vec<RiskEntry>, StoreError> {
        let stats = self.stats_at(now, self.config.risk_window).await?;
        Ok(risk_leaderboard(&stats))
    }

    pub async fn route(&self, request: &RouteRequest) -> Result<RouteDecision, StoreError> {
        self.route_at(request, now_millis()).await
    }

    pub async fn route_at(
        &self,
        request: &RouteRequest,
        now: DateTime<Utc>,
    ) -> Result<RouteDecision, StoreError> {
        let stats = self.stats_at(now, self.config.routing_window).await?;
        Ok(recommend(request, &stats))
    }
}
