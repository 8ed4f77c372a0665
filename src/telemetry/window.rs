//! Windowed Aggregator
//!
//! Pulls every sample in `[now - window, now]` and groups it per source.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

use super::stats::mean;
use crate::config::window_offset;
use crate::models::{normalize_source, Sample};
use crate::store::{SampleStore, StoreError};

/// Ordered latency and slippage series for one source inside a window
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceWindow {
    pub source: String,
    pub latencies: Vec<f64>,
    pub slippages: Vec<f64>,
}

impl SourceWindow {
    pub fn count(&self) -> usize {
        self.latencies.len()
    }
}

/// All sources seen in one window. A source missing here is unknown, not healthy.
#[derive(Debug, Clone, Default)]
pub struct WindowSnapshot {
    pub windows: BTreeMap<String, SourceWindow>,
    /// Mean latency over every sample in the window, across all sources
    pub global_mean_latency: f64,
    pub total_samples: usize,
}

impl WindowSnapshot {
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// Windows beyond `MAX_WINDOW` are clamped.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now - window_offset(window)
}

/// Group time-ordered samples by case-normalized source.
pub fn group_by_source(samples: &[Sample]) -> WindowSnapshot {
    let mut windows: BTreeMap<String, SourceWindow> = BTreeMap::new();
    let mut all_latencies = Vec::with_capacity(samples.len());

    for sample in samples {
        let key = normalize_source(&sample.source);
        let window = windows.entry(key.clone()).or_insert_with(|| SourceWindow {
            source: key,
            ..Default::default()
        });
        window.latencies.push(sample.latency_ms);
        window.slippages.push(sample.slippage);
        all_latencies.push(sample.latency_ms);
    }

    WindowSnapshot {
        windows,
        global_mean_latency: mean(&all_latencies),
        total_samples: all_latencies.len(),
    }
}

/// Read the window ending at `now` from the store and group it.
pub async fn collect_window(
    store: &dyn SampleStore,
    now: DateTime<Utc>,
    window: Duration,
) -> Result<WindowSnapshot, StoreError> {
    let since = window_start(now, window);
    let mut samples = store.samples_since(since).await?;
    // Rows written after `now` was taken belong to the next window.
    samples.retain(|s| s.timestamp <= now);
    Ok(group_by_source(&samples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_millis, NewSample, SampleStatus};
    use crate::store::SqliteSampleStore;

    fn sample(id: i64, source: &str, latency_ms: f64) -> Sample {
        Sample {
            id,
            source: source.to_string(),
            latency_ms,
            slippage: 0.001,
            status: SampleStatus::Verified,
            timestamp: now_millis(),
        }
    }

    #[test]
    fn test_empty_input_gives_empty_snapshot() {
        let snapshot = group_by_source(&[]);
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.total_samples, 0);
        assert_eq!(snapshot.global_mean_latency, 0.0);
    }

    #[test]
    fn test_groups_case_insensitively_and_keeps_order() {
        let samples = vec![
            sample(1, "Binance", 10.0),
            sample(2, "alpaca", 100.0),
            sample(3, "BINANCE", 30.0),
        ];
        let snapshot = group_by_source(&samples);

        assert_eq!(snapshot.windows.len(), 2);
        assert_eq!(snapshot.windows["binance"].latencies, vec![10.0, 30.0]);
        assert_eq!(snapshot.windows["binance"].count(), 2);
        assert_eq!(snapshot.total_samples, 3);
        assert!((snapshot.global_mean_latency - 140.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_start_clamps_oversized_windows() {
        let now = now_millis();
        assert_eq!(
            window_start(now, Duration::from_secs(60)),
            now - chrono::Duration::seconds(60)
        );
        assert_eq!(
            window_start(now, Duration::from_secs(u64::MAX)),
            now - chrono::Duration::days(30)
        );
    }

    #[tokio::test]
    async fn test_collect_window_reads_recent_samples() {
        let store = SqliteSampleStore::in_memory().unwrap();
        for latency in [10.0, 20.0, 30.0] {
            store
                .record_sample(NewSample::parse("ibkr", latency, 0.0, "verified").unwrap())
                .await
                .unwrap();
        }

        let snapshot = collect_window(&store, now_millis(), Duration::from_secs(120))
            .await
            .unwrap();
        assert_eq!(snapshot.windows["ibkr"].latencies, vec![10.0, 20.0, 30.0]);

        let stale_now = now_millis() - chrono::Duration::hours(1);
        let snapshot = collect_window(&store, stale_now, Duration::from_secs(120))
            .await
            .unwrap();
        assert!(snapshot.is_empty());
    }
}
