use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::time::Instant;
use tracing::{debug, info};

use super::AppState;
use crate::metrics::QueryKind;
use crate::models::{NewSample, TelemetryPayload};
use crate::store::StoreError;
use crate::telemetry::{HealthEntry, RiskEntry, RouteDecision, RouteRequest, RouteStatus};

/// Seconds a client should wait before retrying after a store failure
const STORE_RETRY_AFTER_SECS: u64 = 1;

// ===== Route Handlers =====

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "status": "online",
        "service": "PnL Global Oracle",
    }))
}

pub async fn health_check() -> &'static str {
    "OK"
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Anonymous telemetry contribution
pub async fn submit_telemetry(
    State(state): State<AppState>,
    payload: Result<Json<TelemetryPayload>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| {
        state.metrics.record_rejected();
        ApiError::from(rejection)
    })?;

    let sample = NewSample::parse(
        &payload.broker,
        payload.latency_ms,
        payload.slippage,
        &payload.status,
    )
    .map_err(|reason| {
        state.metrics.record_rejected();
        debug!(broker = %payload.broker, reason = %reason, "Telemetry rejected");
        ApiError::BadRequest(reason)
    })?;

    let stored = state
        .engine
        .record(sample)
        .await
        .map_err(|e| state.store_failure(e))?;
    state.metrics.record_ingest(&stored.source);

    Ok(Json(json!({ "status": "contributed" })))
}

/// Traffic-light leaderboard over the public window
pub async fn global_status(
    State(state): State<AppState>,
) -> Result<Json<Vec<HealthEntry>>, ApiError> {
    let start = Instant::now();
    let entries = state
        .engine
        .global_status()
        .await
        .map_err(|e| state.store_failure(e))?;
    state
        .metrics
        .record_query(QueryKind::GlobalStatus, start.elapsed());
    Ok(Json(entries))
}

/// Risk-ranked leaderboard, safest first
pub async fn risk_leaderboard(
    State(state): State<AppState>,
) -> Result<Json<Vec<RiskEntry>>, ApiError> {
    let start = Instant::now();
    let entries = state
        .engine
        .risk_leaderboard()
        .await
        .map_err(|e| state.store_failure(e))?;
    state
        .metrics
        .record_query(QueryKind::RiskLeaderboard, start.elapsed());
    Ok(Json(entries))
}

pub async fn route_order(
    State(state): State<AppState>,
    request: Result<Json<RouteRequest>, JsonRejection>,
) -> Result<Json<RouteDecision>, ApiError> {
    let Json(request) = request?;
    if request.symbol.trim().is_empty() {
        return Err(ApiError::BadRequest("symbol must not be empty".to_string()));
    }

    let start = Instant::now();
    let decision = state
        .engine
        .route(&request)
        .await
        .map_err(|e| state.store_failure(e))?;
    state.metrics.record_query(QueryKind::Route, start.elapsed());

    match decision.status {
        RouteStatus::Optimized => info!(
            symbol = %decision.symbol,
            recommendation = decision.recommendation.as_deref().unwrap_or_default(),
            score = decision.score.unwrap_or_default(),
            "Route optimized"
        ),
        RouteStatus::NoData => {
            state.metrics.record_no_data_route();
            info!(symbol = %decision.symbol, "No qualifying sources for route");
        }
    }

    Ok(Json(decision))
}

// ===== Error Handling =====

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    /// Retryable storage failure
    StoreUnavailable(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        if err.is_retryable() {
            ApiError::StoreUnavailable(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, retryable) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, false),
            ApiError::StoreUnavailable(detail) => {
                debug!(detail = %detail, "Responding 503");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Telemetry store temporarily unavailable".to_string(),
                    true,
                )
            }
            ApiError::Internal(detail) => {
                debug!(detail = %detail, "Responding 500");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    false,
                )
            }
        };

        let body = Json(json!({
            "error": message,
            "retryable": retryable,
        }));

        if retryable {
            (
                status,
                [(header::RETRY_AFTER, STORE_RETRY_AFTER_SECS.to_string())],
                body,
            )
                .into_response()
        } else {
            (status, body).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::config::{AggregationConfig, IngestConfig};
    use crate::metrics::ServiceMetrics;
    use crate::middleware::{RateLimitConfig, RateLimitLayer};
    use crate::store::SqliteSampleStore;
    use crate::telemetry::TelemetryEngine;
    use axum::{body::Body, http::Request, Router};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_app() -> (Router, AppState) {
        let store = Arc::new(SqliteSampleStore::in_memory().unwrap());
        let metrics = Arc::new(ServiceMetrics::new());
        let state = AppState {
            engine: TelemetryEngine::new(store.clone(), AggregationConfig::default()),
            journal: store,
            metrics: metrics.clone(),
            limiter: RateLimitLayer::new(RateLimitConfig::from(&IngestConfig::default()))
                .with_metrics(metrics),
            cache: None,
        };
        (create_router(state.clone()), state)
    }

    fn telemetry(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/telemetry")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_root_reports_online() {
        let (app, _) = test_app();
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "online");
        assert_eq!(body["service"], "PnL Global Oracle");
    }

    #[tokio::test]
    async fn test_submit_telemetry_contributes() {
        let (app, state) = test_app();
        let response = app
            .oneshot(telemetry(json!({
                "broker": " Binance ",
                "latency_ms": 42.5,
                "slippage": 0.0002,
                "status": "verified"
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "contributed");
        assert_eq!(state.journal.sample_count().await.unwrap(), 1);
        assert_eq!(state.metrics.ingested_total(), 1);
    }

    #[tokio::test]
    async fn test_submit_telemetry_rejects_bad_input() {
        let (app, state) = test_app();
        let response = app
            .clone()
            .oneshot(telemetry(json!({
                "broker": "kraken",
                "latency_ms": -1.0,
                "slippage": 0.0,
                "status": "verified"
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["retryable"], false);

        let response = app
            .oneshot(telemetry(json!({ "broker": "kraken" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(state.journal.sample_count().await.unwrap(), 0);
        assert_eq!(
            state
                .metrics
                .samples_rejected
                .load(std::sync::atomic::Ordering::Relaxed),
            2
        );
    }

    #[tokio::test]
    async fn test_empty_leaderboards() {
        let (app, _) = test_app();
        for uri in ["/v1/global_status", "/v1/risk_leaderboard"] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(json_body(response).await, json!([]));
        }
    }

    #[tokio::test]
    async fn test_route_requires_key() {
        let (app, _) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/route")
                    .header("content-type", "application/json")
                    .header("x-pro-key", "bad_key")
                    .body(Body::from(r#"{"symbol":"BTC-USD","size":1}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "Invalid API Key");
    }

    #[tokio::test]
    async fn test_route_no_data() {
        let (app, state) = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/route")
                    .header("content-type", "application/json")
                    .header("x-pro-key", "sk_live_alice")
                    .body(Body::from(r#"{"symbol":"BTC-USD","size":1,"urgency":"normal"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "no_data");
        assert!(body["recommendation"].is_null());
        assert_eq!(
            state
                .metrics
                .no_data_routes
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_store_error_maps_to_503() {
        let response = ApiError::from(StoreError::Task("cancelled".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().contains_key(header::RETRY_AFTER));

        let response = ApiError::from(StoreError::InvalidRow("bad".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
