//! Statistics Engine
//!
//! Per-source statistics over one window: mean, jitter (sample standard
//! deviation), nearest-rank p99, a Hurst exponent estimate, the fat-tail
//! ratio and the systemic load ratio.

use rayon::prelude::*;
use serde::Serialize;
use statrs::statistics::Statistics;

use super::window::{SourceWindow, WindowSnapshot};
use crate::config::AggregationConfig;

/// Neutral Hurst value reported when there is not enough evidence
pub const HURST_NEUTRAL: f64 = 0.5;

/// Substituted for a zero lag deviation so the log stays finite
const HURST_STD_EPSILON: f64 = 1e-6;

/// Derived statistics for one source. Recomputed on every query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStats {
    pub source: String,
    pub count: usize,
    pub mean_latency: f64,
    pub p99_latency: f64,
    /// Sample standard deviation of latency
    pub jitter: f64,
    pub hurst: f64,
    pub mean_slippage: f64,
    /// `min(1, source mean / (global mean + 1))`. A ratio of means, not a correlation coefficient.
    pub systemic_ratio: f64,
    pub fat_tail_ratio: f64,
    /// Last K latencies, oldest first
    pub recent_history: Vec<f64>,
}

/// Thresholds for the statistics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsParams {
    pub min_samples: usize,
    pub recent_history: usize,
    pub hurst_min_samples: usize,
    pub hurst_max_lag: usize,
}

impl Default for StatsParams {
    fn default() -> Self {
        Self::from(&AggregationConfig::default())
    }
}

impl From<&AggregationConfig> for StatsParams {
    fn from(config: &AggregationConfig) -> Self {
        Self {
            min_samples: config.min_samples.max(1),
            recent_history: config.recent_history,
            hurst_min_samples: config.hurst_min_samples,
            hurst_max_lag: config.hurst_max_lag,
        }
    }
}

/// Arithmetic mean; 0 for an empty series
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().mean()
}

/// Sample standard deviation (divides by n - 1); 0 below two values
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().std_dev()
}

/// Population standard deviation (divides by n); 0 for an empty series
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().population_std_dev()
}

/// Nearest-rank percentile: sort ascending, take index `floor(n * q)` clamped to `n - 1`.
pub fn percentile_nearest_rank(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let idx = ((sorted.len() as f64 * q).floor() as usize).min(sorted.len() - 1);
    Some(sorted[idx])
}

pub fn p99(values: &[f64]) -> f64 {
    percentile_nearest_rank(values, 0.99).unwrap_or(0.0)
}

/// Hurst exponent from the scaling of lagged differences.
///
/// For each lag `k` in `2..min(max_lag, n / 2)` take the standard deviation of
/// `series[k..] - series[..n - k]`, fit `ln(std)` against `ln(k)` by least
/// squares and report twice the slope. Series shorter than `min_samples`
/// report the neutral 0.5.
pub fn hurst_exponent(series: &[f64], min_samples: usize, max_lag: usize) -> f64 {
    let n = series.len();
    if n < min_samples {
        return HURST_NEUTRAL;
    }

    let upper = max_lag.min(n / 2);
    let mut log_lags = Vec::new();
    let mut log_stds = Vec::new();
    for lag in 2..upper {
        let diffs: Vec<f64> = series[lag..]
            .iter()
            .zip(&series[..n - lag])
            .map(|(later, earlier)| later - earlier)
            .collect();
        let mut std = population_std_dev(&diffs);
        if !(std > 0.0) {
            std = HURST_STD_EPSILON;
        }
        log_lags.push((lag as f64).ln());
        log_stds.push(std.ln());
    }

    match least_squares_slope(&log_lags, &log_stds) {
        Some(slope) => 2.0 * slope,
        None => HURST_NEUTRAL,
    }
}

/// Slope of the ordinary least-squares line through `(x, y)`.
fn least_squares_slope(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() < 2 || x.len() != y.len() {
        return None;
    }
    let x_mean = x.iter().sum::<f64>() / x.len() as f64;
    let y_mean = y.iter().sum::<f64>() / y.len() as f64;

    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (xi, yi) in x.iter().zip(y) {
        sxy += (xi - x_mean) * (yi - y_mean);
        sxx += (xi - x_mean) * (xi - x_mean);
    }
    if sxx == 0.0 {
        return None;
    }
    Some(sxy / sxx)
}

/// `p99 / (mean + 1)`
pub fn fat_tail_ratio(p99: f64, mean: f64) -> f64 {
    p99 / (mean + 1.0)
}

/// `min(1, source_mean / (global_mean + 1))`
pub fn systemic_ratio(source_mean: f64, global_mean: f64) -> f64 {
    (source_mean / (global_mean + 1.0)).min(1.0)
}

impl SourceStats {
    /// Statistics for one window, or None when it has fewer than `min_samples` samples.
    pub fn compute(window: &SourceWindow, global_mean: f64, params: &StatsParams) -> Option<Self> {
        let count = window.count();
        if count < params.min_samples.max(1) {
            return None;
        }

        let mean_latency = mean(&window.latencies);
        let p99_latency = p99(&window.latencies);
        let history_start = count.saturating_sub(params.recent_history);

        Some(Self {
            source: window.source.clone(),
            count,
            mean_latency,
            p99_latency,
            jitter: sample_std_dev(&window.latencies),
            hurst: hurst_exponent(&window.latencies, params.hurst_min_samples, params.hurst_max_lag),
            mean_slippage: mean(&window.slippages),
            systemic_ratio: systemic_ratio(mean_latency, global_mean),
            fat_tail_ratio: fat_tail_ratio(p99_latency, mean_latency),
            recent_history: window.latencies[history_start..].to_vec(),
        })
    }
}

/// Statistics for every qualifying source, ordered by source name.
pub fn compute_all(snapshot: &WindowSnapshot, params: &StatsParams) -> Vec<SourceStats> {
    let global_mean = snapshot.global_mean_latency;
    // Parallel collect keeps the BTreeMap order.
    snapshot
        .windows
        .values()
        .collect::<Vec<_>>()
        .par_iter()
        .filter_map(|window| SourceStats::compute(window, global_mean, params))
        .collect()
}
