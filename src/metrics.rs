//! Prometheus metrics for the oracle service

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Distinct `source` label values exported before folding into `OVERFLOW_SOURCE`
pub const MAX_SOURCE_LABELS: usize = 256;
pub const OVERFLOW_SOURCE: &str = "_other";

/// Escape a label value for the Prometheus text format.
pub fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}

/// Which aggregate view a query served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    GlobalStatus,
    RiskLeaderboard,
    Route,
}

impl QueryKind {
    fn label(&self) -> &'static str {
        match self {
            QueryKind::GlobalStatus => "global_status",
            QueryKind::RiskLeaderboard => "risk_leaderboard",
            QueryKind::Route => "route",
        }
    }
}

/// Fixed-bucket histogram of query compute time
#[derive(Debug)]
pub struct QueryHistogram {
    /// Bucket upper bounds in microseconds
    buckets: Vec<u64>,
    counts: Vec<AtomicU64>,
    sum_us: AtomicU64,
    count: AtomicU64,
}

impl QueryHistogram {
    pub fn new() -> Self {
        // 500us .. 1s
        let buckets = vec![
            500, 1_000, 2_500, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000, 1_000_000,
        ];
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum_us: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, elapsed: Duration) {
        let value_us = elapsed.as_micros().min(u64::MAX as u128) as u64;
        if let Some(i) = self.buckets.iter().position(|&b| value_us <= b) {
            self.counts[i].fetch_add(1, Ordering::Relaxed);
        }
        self.sum_us.fetch_add(value_us, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn to_prometheus(&self, name: &str, labels: &str) -> String {
        let mut output = String::new();
        let mut cumulative = 0u64;
        for (i, &boundary) in self.buckets.iter().enumerate() {
            cumulative += self.counts[i].load(Ordering::Relaxed);
            output.push_str(&format!(
                "{}_bucket{{{},le=\"{}\"}} {}\n",
                name,
                labels,
                boundary as f64 / 1_000_000.0,
                cumulative
            ));
        }
        let total = self.count.load(Ordering::Relaxed);
        output.push_str(&format!("{}_bucket{{{},le=\"+Inf\"}} {}\n", name, labels, total));
        output.push_str(&format!(
            "{}_sum{{{}}} {}\n",
            name,
            labels,
            self.sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0
        ));
        output.push_str(&format!("{}_count{{{}}} {}\n", name, labels, total));
        output
    }
}

impl Default for QueryHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Service-wide counters, shared through `AppState`
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    pub samples_rejected: AtomicU64,
    pub samples_rate_limited: AtomicU64,
    pub store_errors: AtomicU64,
    pub no_data_routes: AtomicU64,
    pub trade_logs_written: AtomicU64,
    /// Accepted samples per normalized source
    samples_ingested: RwLock<BTreeMap<String, AtomicU64>>,
    global_status_queries: QueryHistogram,
    risk_queries: QueryHistogram,
    route_queries: QueryHistogram,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ingest(&self, source: &str) {
        {
            let map = self.samples_ingested.read();
            if let Some(counter) = map.get(source) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let mut map = self.samples_ingested.write();
        let key = if map.contains_key(source) || map.len() < MAX_SOURCE_LABELS {
            source
        } else {
            OVERFLOW_SOURCE
        };
        map.entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.samples_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.samples_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_data_route(&self) {
        self.no_data_routes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trade_log(&self) {
        self.trade_logs_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self, kind: QueryKind, elapsed: Duration) {
        self.histogram(kind).observe(elapsed);
    }

    pub fn query_count(&self, kind: QueryKind) -> u64 {
        self.histogram(kind).count()
    }

    pub fn ingested_total(&self) -> u64 {
        self.samples_ingested
            .read()
            .values()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    fn histogram(&self, kind: QueryKind) -> &QueryHistogram {
        match kind {
            QueryKind::GlobalStatus => &self.global_status_queries,
            QueryKind::RiskLeaderboard => &self.risk_queries,
            QueryKind::Route => &self.route_queries,
        }
    }

    /// Export all metrics in Prometheus text format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP oracle_samples_ingested_total Accepted telemetry samples\n");
        output.push_str("# TYPE oracle_samples_ingested_total counter\n");
        for (source, count) in self.samples_ingested.read().iter() {
            output.push_str(&format!(
                "oracle_samples_ingested_total{{source=\"{}\"}} {}\n",
                escape_label_value(source),
                count.load(Ordering::Relaxed)
            ));
        }

        let counters = [
            (
                "oracle_samples_rejected_total",
                "Telemetry samples rejected by validation",
                &self.samples_rejected,
            ),
            (
                "oracle_samples_rate_limited_total",
                "Telemetry requests refused by the ingest rate limit",
                &self.samples_rate_limited,
            ),
            (
                "oracle_store_errors_total",
                "Sample store failures surfaced to callers",
                &self.store_errors,
            ),
            (
                "oracle_route_no_data_total",
                "Route queries answered with no_data",
                &self.no_data_routes,
            ),
            (
                "oracle_trade_logs_total",
                "Private trade journal entries written",
                &self.trade_logs_written,
            ),
        ];
        for (name, help, counter) in counters {
            output.push_str(&format!("\n# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, counter.load(Ordering::Relaxed)));
        }

        output.push_str("\n# HELP oracle_query_duration_seconds Window read plus scoring time\n");
        output.push_str("# TYPE oracle_query_duration_seconds histogram\n");
        for kind in [QueryKind::GlobalStatus, QueryKind::RiskLeaderboard, QueryKind::Route] {
            let labels = format!("view=\"{}\"", kind.label());
            output.push_str(
                &self
                    .histogram(kind)
                    .to_prometheus("oracle_query_duration_seconds", &labels),
            );
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_counts_per_source() {
        let metrics = ServiceMetrics::new();
        metrics.record_ingest("binance");
        metrics.record_ingest("binance");
        metrics.record_ingest("kraken");
        assert_eq!(metrics.ingested_total(), 3);

        let text = metrics.to_prometheus();
        assert!(text.contains("oracle_samples_ingested_total{source=\"binance\"} 2"));
        assert!(text.contains("oracle_samples_ingested_total{source=\"kraken\"} 1"));
    }

    #[test]
    fn test_source_labels_escaped() {
        let metrics = ServiceMetrics::new();
        metrics.record_ingest("evil\"} 1\nfake_metric{a=\"b\\");

        let text = metrics.to_prometheus();
        assert!(text.contains(
            "oracle_samples_ingested_total{source=\"evil\\\"} 1\\nfake_metric{a=\\\"b\\\\\"} 1\n"
        ));
        assert!(!text.lines().any(|l| l.starts_with("fake_metric")));
    }

    #[test]
    fn test_source_labels_capped() {
        let metrics = ServiceMetrics::new();
        for i in 0..MAX_SOURCE_LABELS + 10 {
            metrics.record_ingest(&format!("broker{}", i));
        }
        metrics.record_ingest("broker0");
        assert_eq!(metrics.ingested_total(), MAX_SOURCE_LABELS as u64 + 11);

        let text = metrics.to_prometheus();
        let series = text
            .lines()
            .filter(|l| l.starts_with("oracle_samples_ingested_total{"))
            .count();
        assert_eq!(series, MAX_SOURCE_LABELS + 1);
        assert!(text.contains("oracle_samples_ingested_total{source=\"broker0\"} 2"));
        assert!(text.contains("oracle_samples_ingested_total{source=\"_other\"} 10"));
    }

    #[test]
    fn test_query_histogram_buckets() {
        let metrics = ServiceMetrics::new();
        metrics.record_query(QueryKind::Route, Duration::from_micros(800));
        metrics.record_query(QueryKind::Route, Duration::from_secs(5));
        assert_eq!(metrics.query_count(QueryKind::Route), 2);
        assert_eq!(metrics.query_count(QueryKind::GlobalStatus), 0);

        let text = metrics.to_prometheus();
        assert!(text.contains("oracle_query_duration_seconds_bucket{view=\"route\",le=\"0.001\"} 1"));
        assert!(text.contains("oracle_query_duration_seconds_bucket{view=\"route\",le=\"+Inf\"} 2"));
    }

    #[test]
    fn test_counters_exported() {
        let metrics = ServiceMetrics::new();
        metrics.record_rejected();
        metrics.record_no_data_route();
        metrics.record_no_data_route();
        let text = metrics.to_prometheus();
        assert!(text.contains("oracle_samples_rejected_total 1"));
        assert!(text.contains("oracle_route_no_data_total 2"));
        assert!(text.contains("# TYPE oracle_store_errors_total counter"));
    }
}
