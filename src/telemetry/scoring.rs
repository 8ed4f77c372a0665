//! Risk Scorer
//!
//! Pure functions from [`SourceStats`] to three score families:
//! - risk score (lower = safer) for the risk leaderboard
//! - health score 0-100 with a traffic light for the public leaderboard
//! - routing score (lower = better) with named risk factors for the router

use serde::{Deserialize, Serialize};
use std::fmt;

use super::stats::SourceStats;

pub const FAT_TAIL_RATIO_LIMIT: f64 = 3.0;
pub const FAT_TAIL_RISK_PENALTY: f64 = 50.0;

pub const HURST_UNSTABLE_LIMIT: f64 = 0.6;
pub const HURST_ROUTING_PENALTY: f64 = 200.0;
pub const TAIL_MEAN_MULTIPLE: f64 = 3.0;
pub const TAIL_ROUTING_PENALTY: f64 = 100.0;

pub const RED_LATENCY_MS: f64 = 500.0;
pub const YELLOW_LATENCY_MS: f64 = 150.0;

/// `0.4 mean + 0.3 jitter + 0.3 p99 + 5000 slippage`, plus 50 when the tail is fat.
pub fn risk_score(stats: &SourceStats) -> f64 {
    let mut score = 0.4 * stats.mean_latency
        + 0.3 * stats.jitter
        + 0.3 * stats.p99_latency
        + 5000.0 * stats.mean_slippage;
    if stats.fat_tail_ratio > FAT_TAIL_RATIO_LIMIT {
        score += FAT_TAIL_RISK_PENALTY;
    }
    score
}

/// `100 - mean / 10 - slippage * 1000`, clamped to [0, 100] and truncated.
pub fn health_score(mean_latency: f64, mean_slippage: f64) -> u8 {
    let raw = 100.0 - mean_latency / 10.0 - mean_slippage * 1000.0;
    raw.clamp(0.0, 100.0) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLight {
    Green,
    Yellow,
    Red,
}

impl TrafficLight {
    pub fn from_latency(mean_latency: f64) -> Self {
        if mean_latency > RED_LATENCY_MS {
            TrafficLight::Red
        } else if mean_latency > YELLOW_LATENCY_MS {
            TrafficLight::Yellow
        } else {
            TrafficLight::Green
        }
    }
}

/// Routing mode. `High` trades risk awareness for raw speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    Normal,
    High,
}

impl Urgency {
    /// Only "high" (any case) selects speed-only routing.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("high") {
            Urgency::High
        } else {
            Urgency::Normal
        }
    }
}

impl<'de> Deserialize<'de> for Urgency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Urgency::parse(&raw))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskFactor {
    UnstableHurst,
    FatTail,
}

impl RiskFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFactor::UnstableHurst => "Unstable (High Hurst)",
            RiskFactor::FatTail => "Fat Tail Risk",
        }
    }
}

impl fmt::Display for RiskFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RiskFactor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingScore {
    pub score: f64,
    pub risk_factors: Vec<RiskFactor>,
}

/// `mean + 2 jitter` with Hurst and tail penalties. High urgency scores on mean alone.
pub fn routing_score(stats: &SourceStats, urgency: Urgency) -> RoutingScore {
    let mut score = stats.mean_latency + 2.0 * stats.jitter;
    let mut risk_factors = Vec::new();

    if stats.hurst > HURST_UNSTABLE_LIMIT {
        score += HURST_ROUTING_PENALTY;
        risk_factors.push(RiskFactor::UnstableHurst);
    }
    if stats.p99_latency > TAIL_MEAN_MULTIPLE * stats.mean_latency {
        score += TAIL_ROUTING_PENALTY;
        risk_factors.push(RiskFactor::FatTail);
    }
    if urgency == Urgency::High {
        score = stats.mean_latency;
    }

    RoutingScore {
        score,
        risk_factors,
    }
}

/// Public leaderboard row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthEntry {
    pub source: String,
    pub status: TrafficLight,
    pub score: u8,
    /// Mean latency truncated to whole milliseconds
    pub latency: i64,
    /// Mean slippage rounded to 5 decimals
    pub slippage: f64,
    pub volume: usize,
}

/// Risk leaderboard row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskEntry {
    pub source: String,
    pub avg_latency: f64,
    pub p99: f64,
    pub jitter: f64,
    pub avg_slippage: f64,
    pub volume: usize,
    pub risk_score: f64,
    pub hurst: f64,
    pub fat_tail_ratio: f64,
    pub systemic_ratio: f64,
    pub history: Vec<f64>,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Traffic-light leaderboard, best first. Ties keep the input order.
pub fn health_leaderboard(stats: &[SourceStats]) -> Vec<HealthEntry> {
    let mut entries: Vec<HealthEntry> = stats
        .iter()
        .map(|s| HealthEntry {
            source: s.source.clone(),
            status: TrafficLight::from_latency(s.mean_latency),
            score: health_score(s.mean_latency, s.mean_slippage),
            latency: s.mean_latency.trunc() as i64,
            slippage: round_to(s.mean_slippage, 5),
            volume: s.count,
        })
        .collect();
    entries.sort_by(|a, b| b.score.cmp(&a.score));
    entries
}

/// Risk leaderboard, safest first. Ties keep the input order.
pub fn risk_leaderboard(stats: &[SourceStats]) -> Vec<RiskEntry> {
    let mut entries: Vec<RiskEntry> = stats
        .iter()
        .map(|s| RiskEntry {
            source: s.source.clone(),
            avg_latency: s.mean_latency,
            p99: s.p99_latency,
            jitter: s.jitter,
            avg_slippage: s.mean_slippage,
            volume: s.count,
            risk_score: risk_score(s),
            hurst: s.hurst,
            fat_tail_ratio: s.fat_tail_ratio,
            systemic_ratio: s.systemic_ratio,
            history: s.recent_history.clone(),
        })
        .collect();
    entries.sort_by(|a, b| a.risk_score.total_cmp(&b.risk_score));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(mean: f64, jitter: f64, p99: f64, slippage: f64) -> SourceStats {
        SourceStats {
            source: "test".into(),
            count: 10,
            mean_latency: mean,
            p99_latency: p99,
            jitter,
            hurst: 0.5,
            mean_slippage: slippage,
            systemic_ratio: 0.5,
            fat_tail_ratio: p99 / (mean + 1.0),
            recent_history: vec![],
        }
    }

    #[test]
    fn test_risk_score_formula() {
        let s = stats(100.0, 10.0, 200.0, 0.001);
        let expected = 0.4 * 100.0 + 0.3 * 10.0 + 0.3 * 200.0 + 5000.0 * 0.001;
        assert!((risk_score(&s) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_risk_score_fat_tail_penalty() {
        let calm = stats(100.0, 10.0, 303.0, 0.0); // ratio exactly 3.0 -> no penalty
        let fat = stats(100.0, 10.0, 304.0, 0.0);
        assert!((risk_score(&calm) - (40.0 + 3.0 + 90.9)).abs() < 1e-9);
        assert!((risk_score(&fat) - (40.0 + 3.0 + 91.2 + 50.0)).abs() < 1e-9);
    }

    #[test]
    fn test_risk_score_monotonic_in_each_input() {
        let base = stats(100.0, 10.0, 200.0, 0.001);
        let base_score = risk_score(&base);

        let mut s = base.clone();
        s.jitter += 5.0;
        assert!(risk_score(&s) >= base_score);

        let s = stats(100.0, 10.0, 250.0, 0.001);
        assert!(risk_score(&s) >= base_score);

        let s = stats(100.0, 10.0, 200.0, 0.002);
        assert!(risk_score(&s) >= base_score);

        // Mean increase while the fat-tail state is unchanged
        let s = stats(110.0, 10.0, 200.0, 0.001);
        assert!(risk_score(&s) >= base_score);

        // p99 crossing into fat-tail territory only adds
        let tail = stats(100.0, 10.0, 1000.0, 0.001);
        assert!(risk_score(&tail) > risk_score(&stats(100.0, 10.0, 300.0, 0.001)));
    }

    #[test]
    fn test_health_score_clamped_and_truncated() {
        assert_eq!(health_score(0.0, 0.0), 100);
        assert_eq!(health_score(45.0, 0.0), 95); // 95.5 truncates
        assert_eq!(health_score(100.0, 0.01), 80);
        assert_eq!(health_score(5000.0, 0.0), 0);
        assert_eq!(health_score(0.0, -1.0), 100);
    }

    #[test]
    fn test_traffic_light_thresholds() {
        assert_eq!(TrafficLight::from_latency(150.0), TrafficLight::Green);
        assert_eq!(TrafficLight::from_latency(150.1), TrafficLight::Yellow);
        assert_eq!(TrafficLight::from_latency(500.0), TrafficLight::Yellow);
        assert_eq!(TrafficLight::from_latency(500.1), TrafficLight::Red);
    }

    #[test]
    fn test_routing_score_penalties() {
        let mut s = stats(100.0, 10.0, 150.0, 0.0);
        let plain = routing_score(&s, Urgency::Normal);
        assert_eq!(plain.score, 120.0);
        assert!(plain.risk_factors.is_empty());

        s.hurst = 0.7;
        s.p99_latency = 400.0;
        let risky = routing_score(&s, Urgency::Normal);
        assert_eq!(risky.score, 120.0 + 200.0 + 100.0);
        assert_eq!(
            risky.risk_factors,
            vec![RiskFactor::UnstableHurst, RiskFactor::FatTail]
        );
    }

    #[test]
    fn test_high_urgency_scores_mean_only() {
        for (jitter, hurst, p99) in [(0.0, 0.1, 10.0), (50.0, 0.9, 5000.0), (3.5, 0.61, 301.0)] {
            let mut s = stats(100.25, jitter, p99, 0.0);
            s.hurst = hurst;
            let scored = routing_score(&s, Urgency::High);
            assert_eq!(scored.score, 100.25);
        }
    }

    #[test]
    fn test_urgency_parse() {
        assert_eq!(Urgency::parse("high"), Urgency::High);
        assert_eq!(Urgency::parse(" HIGH "), Urgency::High);
        assert_eq!(Urgency::parse("normal"), Urgency::Normal);
        assert_eq!(Urgency::parse("urgent"), Urgency::Normal);
        let parsed: Urgency = serde_json::from_str("\"High\"").unwrap();
        assert_eq!(parsed, Urgency::High);
    }

    #[test]
    fn test_leaderboards_sorted() {
        let mut fast = stats(20.0, 1.0, 25.0, 0.0001);
        fast.source = "fast".into();
        let mut slow = stats(600.0, 80.0, 900.0, 0.002);
        slow.source = "slow".into();
        let mut mid = stats(200.0, 20.0, 260.0, 0.0005);
        mid.source = "mid".into();
        let all = vec![slow, fast, mid];

        let health = health_leaderboard(&all);
        let order: Vec<&str> = health.iter().map(|e| e.source.as_str()).collect();
        assert_eq!(order, vec!["fast", "mid", "slow"]);
        assert_eq!(health[0].status, TrafficLight::Green);
        assert_eq!(health[1].status, TrafficLight::Yellow);
        assert_eq!(health[2].status, TrafficLight::Red);
        assert_eq!(health[0].slippage, 0.0001);

        let risk = risk_leaderboard(&all);
        let order: Vec<&str> = risk.iter().map(|e| e.source.as_str()).collect();
        assert_eq!(order, vec!["fast", "mid", "slow"]);
    }

    #[test]
    fn test_risk_factor_serializes_as_label() {
        let json = serde_json::to_string(&vec![RiskFactor::FatTail]).unwrap();
        assert_eq!(json, "[\"Fat Tail Risk\"]");
    }
}
