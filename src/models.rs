use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Client-reported classification of a telemetry ping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    Verified,
    Anomaly,
}

impl SampleStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SampleStatus::Verified => "verified",
            SampleStatus::Anomaly => "anomaly",
        }
    }

}

impl FromStr for SampleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "verified" => Ok(SampleStatus::Verified),
            "anomaly" => Ok(SampleStatus::Anomaly),
            _ => Err(format!("unknown status '{}', expected verified or anomaly", s)),
        }
    }
}

/// A stored telemetry ping. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: i64,
    pub source: String,
    pub latency_ms: f64,
    pub slippage: f64,
    pub status: SampleStatus,
    pub timestamp: DateTime<Utc>,
}

/// A ping that has passed validation but has not been written yet
#[derive(Debug, Clone, PartialEq)]
pub struct NewSample {
    pub source: String,
    pub latency_ms: f64,
    pub slippage: f64,
    pub status: SampleStatus,
}

impl NewSample {
    /// Validate raw client input. The source name is trimmed and lower-cased.
    pub fn parse(
        source: &str,
        latency_ms: f64,
        slippage: f64,
        status: &str,
    ) -> Result<Self, String> {
        let source = normalize_source(source);
        if source.is_empty() {
            return Err("broker must not be empty".to_string());
        }
        if !latency_ms.is_finite() || latency_ms < 0.0 {
            return Err(format!("latency_ms must be a finite value >= 0, got {}", latency_ms));
        }
        if !slippage.is_finite() {
            return Err("slippage must be finite".to_string());
        }
        let status: SampleStatus = status.parse()?;

        Ok(Self {
            source,
            latency_ms,
            slippage,
            status,
        })
    }
}

/// Case-normalized source key used for storage and grouping
pub fn normalize_source(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Current time truncated to millisecond resolution, matching what the store persists
pub fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_default()
}

/// Anonymous telemetry submission body
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryPayload {
    pub broker: String,
    pub latency_ms: f64,
    pub slippage: f64,
    pub status: String,
}

/// A private trade journal entry submitted by an authenticated caller
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradeLog {
    pub symbol: String,
    pub side: String,
    pub qty: f64,
    pub broker: String,
    pub latency_ms: f64,
    pub slippage: f64,
    pub status: String,
}

/// A stored trade journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLogRecord {
    pub id: i64,
    pub user_id: String,
    pub symbol: String,
    pub side: String,
    pub qty: f64,
    pub broker: String,
    pub latency_ms: f64,
    pub slippage: f64,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}
