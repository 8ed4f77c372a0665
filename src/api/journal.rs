//! Private trade journal, scoped to the calling key

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::Json,
    Extension,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use super::{ApiError, AppState};
use crate::auth::CallerIdentity;
use crate::models::{normalize_source, TradeLog, TradeLogRecord};

pub const DEFAULT_LOG_LIMIT: usize = 50;
pub const MAX_LOG_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    limit: Option<usize>,
}

fn validate(mut log: TradeLog) -> Result<TradeLog, ApiError> {
    log.symbol = log.symbol.trim().to_string();
    log.side = log.side.trim().to_lowercase();
    log.broker = normalize_source(&log.broker);

    if log.symbol.is_empty() {
        return Err(ApiError::BadRequest("symbol must not be empty".to_string()));
    }
    if log.broker.is_empty() {
        return Err(ApiError::BadRequest("broker must not be empty".to_string()));
    }
    if !log.qty.is_finite() || !log.latency_ms.is_finite() || !log.slippage.is_finite() {
        return Err(ApiError::BadRequest(
            "qty, latency_ms and slippage must be finite".to_string(),
        ));
    }
    Ok(log)
}

pub async fn log_trade(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    log: Result<Json<TradeLog>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(log) = log?;
    let log = validate(log)?;
    let symbol = log.symbol.clone();

    let log_id = state
        .journal
        .insert_trade_log(&caller.user_id, log)
        .await
        .map_err(|e| state.store_failure(e))?;
    state.metrics.record_trade_log();
    info!(user_id = %caller.user_id, log_id, symbol = %symbol, "Trade logged");

    Ok(Json(json!({ "success": true, "log_id": log_id })))
}

/// The caller's journal, newest first
pub async fn list_logs(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Query(params): Query<LogsQuery>,
) -> Result<Json<Vec<TradeLogRecord>>, ApiError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);
    let logs = state
        .journal
        .trade_logs(&caller.user_id, limit)
        .await
        .map_err(|e| state.store_failure(e))?;
    Ok(Json(logs))
}
