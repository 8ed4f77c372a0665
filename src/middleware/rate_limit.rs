//! Rate limiting middleware.
//!
//! In-memory fixed-window limiter keyed by peer address, with a burst
//! allowance on top of the per-window budget. `x-forwarded-for` is only
//! honored when configured as trusted.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use super::logging::client_key;
use crate::config::IngestConfig;
use crate::metrics::ServiceMetrics;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests per window.
    pub max_requests: u32,
    pub window: Duration,
    /// Extra requests above the limit before hard reject.
    pub burst: u32,
    /// Key on the first `x-forwarded-for` hop instead of the peer address.
    pub trust_forwarded_for: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for RateLimitConfig {
    fn from(config: &IngestConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: config.window,
            burst: config.burst,
            trust_forwarded_for: config.trust_forwarded_for,
        }
    }
}

/// Limiter state shared by every clone of the layer.
#[derive(Clone)]
pub struct RateLimitLayer {
    config: RateLimitConfig,
    state: Arc<Mutex<HashMap<String, RateLimitEntry>>>,
    metrics: Option<Arc<ServiceMetrics>>,
}

struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

#[derive(Debug, PartialEq, Eq)]
enum RateLimitResult {
    Allowed { remaining: u32 },
    BurstUsed { remaining: u32 },
    Exceeded { retry_after: Duration },
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(HashMap::new())),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn check(&self, client: &str) -> RateLimitResult {
        self.check_at(client, Instant::now())
    }

    fn check_at(&self, client: &str, now: Instant) -> RateLimitResult {
        let mut state = self.state.lock();
        let entry = state
            .entry(client.to_string())
            .or_insert(RateLimitEntry {
                count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) >= self.config.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count = entry.count.saturating_add(1);

        let limit = self.config.max_requests.saturating_add(self.config.burst);
        let remaining = limit.saturating_sub(entry.count);
        let reset_at = entry.window_start + self.config.window;

        if entry.count > limit {
            RateLimitResult::Exceeded {
                retry_after: reset_at.saturating_duration_since(now),
            }
        } else if entry.count > self.config.max_requests {
            RateLimitResult::BurstUsed { remaining }
        } else {
            RateLimitResult::Allowed { remaining }
        }
    }

    /// Drop clients idle for two windows. Run periodically from a background task.
    pub fn cleanup(&self) -> usize {
        let mut state = self.state.lock();
        let now = Instant::now();
        let window = self.config.window;
        let before = state.len();
        state.retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
        before - state.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.state.lock().len()
    }

    pub fn window(&self) -> Duration {
        self.config.window
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimitLayer>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = client_key(&request, limiter.config.trust_forwarded_for);

    match limiter.check(&client) {
        RateLimitResult::Allowed { .. } | RateLimitResult::BurstUsed { .. } => {
            next.run(request).await
        }
        RateLimitResult::Exceeded { retry_after } => {
            // Round up so clients never retry inside the same window.
            let retry_secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            let retry_secs = retry_secs.max(1);
            warn!(client = %client, retry_after_secs = retry_secs, "Rate limit exceeded");
            if let Some(metrics) = &limiter.metrics {
                metrics.record_rate_limited();
            }

            let body = serde_json::json!({
                "error": "Too many requests. Please slow down.",
                "retryable": true,
                "retry_after_seconds": retry_secs,
            });
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_secs.to_string())],
                axum::Json(body),
            )
                .into_response()
        }
    }
}
