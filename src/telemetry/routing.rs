//! Router
//!
//! Picks the best-scoring source for an order. An empty candidate set is a
//! normal `no_data` outcome, not an error.

use serde::{Deserialize, Serialize};

use super::scoring::{routing_score, RiskFactor, Urgency};
use super::stats::SourceStats;

pub const MAX_ALTERNATIVES: usize = 2;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteRequest {
    pub symbol: String,
    /// Part of the request contract; does not affect scoring
    #[serde(default)]
    pub size: f64,
    #[serde(default)]
    pub urgency: Urgency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Optimized,
    NoData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteMetrics {
    pub expected_latency: f64,
    pub risk_factors: Vec<RiskFactor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDecision {
    pub status: RouteStatus,
    pub symbol: String,
    pub recommendation: Option<String>,
    pub score: Option<f64>,
    pub metrics: Option<RouteMetrics>,
    pub alternatives: Vec<String>,
}

impl RouteDecision {
    pub fn no_data(symbol: &str) -> Self {
        Self {
            status: RouteStatus::NoData,
            symbol: symbol.to_string(),
            recommendation: None,
            score: None,
            metrics: None,
            alternatives: Vec::new(),
        }
    }
}

/// Rank qualifying sources by routing score and pick the lowest.
pub fn recommend(request: &RouteRequest, stats: &[SourceStats]) -> RouteDecision {
    let mut ranked: Vec<(&SourceStats, f64, Vec<RiskFactor>)> = stats
        .iter()
        .map(|s| {
            let scored = routing_score(s, request.urgency);
            (s, scored.score, scored.risk_factors)
        })
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut ranked = ranked.into_iter();
    let Some((best, score, risk_factors)) = ranked.next() else {
        return RouteDecision::no_data(&request.symbol);
    };

    RouteDecision {
        status: RouteStatus::Optimized,
        symbol: request.symbol.clone(),
        recommendation: Some(best.source.clone()),
        score: Some(score),
        metrics: Some(RouteMetrics {
            expected_latency: best.mean_latency,
            risk_factors,
        }),
        alternatives: ranked
            .take(MAX_ALTERNATIVES)
            .map(|(s, _, _)| s.source.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, mean: f64, jitter: f64, p99: f64, hurst: f64) -> SourceStats {
        SourceStats {
            source: name.into(),
            count: 25,
            mean_latency: mean,
            p99_latency: p99,
            jitter,
            hurst,
            mean_slippage: 0.0,
            systemic_ratio: 0.5,
            fat_tail_ratio: p99 / (mean + 1.0),
            recent_history: vec![],
        }
    }

    fn request(urgency: Urgency) -> RouteRequest {
        RouteRequest {
            symbol: "BTC-USD".into(),
            size: 1.5,
            urgency,
        }
    }

    #[test]
    fn test_empty_stats_is_no_data() {
        let decision = recommend(&request(Urgency::Normal), &[]);
        assert_eq!(decision.status, RouteStatus::NoData);
        assert!(decision.recommendation.is_none());
        assert!(decision.alternatives.is_empty());

        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["status"], "no_data");
        assert!(json["recommendation"].is_null());
    }

    #[test]
    fn test_picks_lowest_score_with_two_alternatives() {
        let stats = vec![
            source("alpaca", 80.0, 5.0, 100.0, 0.5),
            source("binance", 40.0, 2.0, 50.0, 0.5),
            source("coinbase", 60.0, 30.0, 90.0, 0.5),
            source("kraken", 300.0, 20.0, 350.0, 0.5),
        ];
        let decision = recommend(&request(Urgency::Normal), &stats);

        assert_eq!(decision.status, RouteStatus::Optimized);
        assert_eq!(decision.recommendation.as_deref(), Some("binance"));
        assert_eq!(decision.score, Some(44.0));
        assert_eq!(decision.alternatives, vec!["alpaca", "coinbase"]);
        let metrics = decision.metrics.unwrap();
        assert_eq!(metrics.expected_latency, 40.0);
        assert!(metrics.risk_factors.is_empty());
    }

    #[test]
    fn test_high_hurst_source_pushed_down() {
        let stats = vec![
            source("clustered", 50.0, 1.0, 60.0, 0.8),
            source("steady", 120.0, 5.0, 140.0, 0.45),
        ];
        let normal = recommend(&request(Urgency::Normal), &stats);
        assert_eq!(normal.recommendation.as_deref(), Some("steady"));

        // Speed-only routing ignores the Hurst penalty.
        let fast = recommend(&request(Urgency::High), &stats);
        assert_eq!(fast.recommendation.as_deref(), Some("clustered"));
        assert_eq!(fast.score, Some(50.0));
        assert_eq!(
            fast.metrics.unwrap().risk_factors,
            vec![RiskFactor::UnstableHurst]
        );
    }

    #[test]
    fn test_single_source_has_no_alternatives() {
        let stats = vec![source("oanda", 10.0, 1.0, 12.0, 0.5)];
        let decision = recommend(&request(Urgency::Normal), &stats);
        assert_eq!(decision.recommendation.as_deref(), Some("oanda"));
        assert!(decision.alternatives.is_empty());
    }

    #[test]
    fn test_request_defaults() {
        let req: RouteRequest = serde_json::from_str(r#"{"symbol":"ETH-USD"}"#).unwrap();
        assert_eq!(req.urgency, Urgency::Normal);
        assert_eq!(req.size, 0.0);

        let req: RouteRequest =
            serde_json::from_str(r#"{"symbol":"ETH-USD","size":2,"urgency":"HIGH"}"#).unwrap();
        assert_eq!(req.urgency, Urgency::High);
    }
}
