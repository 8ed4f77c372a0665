//! Oracle Configuration
//!
//! Loaded from an optional TOML file, then overridden by environment variables.
//! Durations are written as integer milliseconds in TOML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Longest window or cache horizon accepted; longer values are clamped on load.
pub const MAX_WINDOW: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Convert a configured window to a chrono offset, clamped to `MAX_WINDOW`.
pub fn window_offset(window: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(window.min(MAX_WINDOW).as_millis() as i64)
}

/// Main configuration for the oracle service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub aggregation: AggregationConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".into(),
        }
    }
}

/// Sample store and in-process cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database file
    pub db_path: String,
    /// Serve window reads from the in-memory ring buffers
    pub cache_enabled: bool,
    /// Ring buffer capacity per source
    pub cache_capacity_per_source: usize,
    /// How far back the ring buffers retain samples
    #[serde(with = "duration_serde")]
    pub cache_horizon: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "pnl_oracle.db".into(),
            cache_enabled: true,
            cache_capacity_per_source: 10_000,
            cache_horizon: Duration::from_secs(600),
        }
    }
}

/// Window lengths and sample thresholds for the statistics pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Window behind the traffic-light leaderboard
    #[serde(with = "duration_serde")]
    pub public_window: Duration,
    /// Window behind the risk leaderboard
    #[serde(with = "duration_serde")]
    pub risk_window: Duration,
    /// Window behind live routing
    #[serde(with = "duration_serde")]
    pub routing_window: Duration,
    /// Sources with fewer samples in the window are left out
    pub min_samples: usize,
    /// Number of most recent latencies reported per source
    pub recent_history: usize,
    /// Below this count the Hurst estimate is the neutral 0.5
    pub hurst_min_samples: usize,
    /// Exclusive upper bound on the lags used by the Hurst fit
    pub hurst_max_lag: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            public_window: Duration::from_secs(300),
            risk_window: Duration::from_secs(300),
            routing_window: Duration::from_secs(120),
            min_samples: 5,
            recent_history: 20,
            hurst_min_samples: 20,
            hurst_max_lag: 20,
        }
    }
}

impl AggregationConfig {
    pub fn longest_window(&self) -> Duration {
        self.public_window
            .max(self.risk_window)
            .max(self.routing_window)
    }
}

/// Anonymous ingest rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Requests allowed per client per window
    pub max_requests: u32,
    #[serde(with = "duration_serde")]
    pub window: Duration,
    /// Extra requests tolerated above the limit before rejecting
    pub burst: u32,
    /// Key clients by the first `x-forwarded-for` hop instead of the peer
    /// address. Only enable behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_requests: 600,
            window: Duration::from_secs(60),
            burst: 120,
            trust_forwarded_for: false,
        }
    }
}

impl OracleConfig {
    /// Load from an optional TOML file, apply environment overrides, then normalize.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                info!("Loading config from {}", p.display());
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("Invalid config file {}", p.display()))?
            }
            None => OracleConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.normalize();
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str| {
            get(key).and_then(|v| match v.trim().parse::<u64>() {
                Ok(n) if n > 0 => Some(Duration::from_secs(n)),
                _ => {
                    warn!(key, value = %v, "Ignoring invalid duration override");
                    None
                }
            })
        };

        if let Some(v) = get("ORACLE_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        // Only SQLite URLs are meaningful here; other schemes are left to the default path.
        let sqlite_url = get("DATABASE_URL").filter(|v| v.trim().starts_with("sqlite:"));
        if let Some(v) = get("DATABASE_PATH").or(sqlite_url) {
            self.store.db_path = v;
        }
        if let Some(v) = get("ORACLE_CACHE_ENABLED") {
            self.store.cache_enabled = matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON");
        }
        if let Some(d) = secs("PUBLIC_WINDOW_SECS") {
            self.aggregation.public_window = d;
        }
        if let Some(d) = secs("RISK_WINDOW_SECS") {
            self.aggregation.risk_window = d;
        }
        if let Some(d) = secs("ROUTING_WINDOW_SECS") {
            self.aggregation.routing_window = d;
        }
        if let Some(n) = get("MIN_SAMPLES").and_then(|v| v.trim().parse::<usize>().ok()) {
            self.aggregation.min_samples = n;
        }
        if let Some(v) = get("ORACLE_TRUST_FORWARDED_FOR") {
            self.ingest.trust_forwarded_for =
                matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON");
        }
    }

    /// Clamp values that would otherwise break downstream invariants.
    pub fn normalize(&mut self) {
        self.store.db_path = strip_sqlite_url(&self.store.db_path);
        self.aggregation.min_samples = self.aggregation.min_samples.max(1);
        self.store.cache_capacity_per_source = self.store.cache_capacity_per_source.max(1);

        let windows = [
            ("public_window", &mut self.aggregation.public_window),
            ("risk_window", &mut self.aggregation.risk_window),
            ("routing_window", &mut self.aggregation.routing_window),
            ("cache_horizon", &mut self.store.cache_horizon),
        ];
        for (name, window) in windows {
            if *window > MAX_WINDOW {
                warn!(
                    setting = name,
                    configured_ms = window.as_millis() as u64,
                    max_ms = MAX_WINDOW.as_millis() as u64,
                    "Window longer than supported, clamping"
                );
                *window = MAX_WINDOW;
            }
        }

        let longest = self.aggregation.longest_window();
        if self.store.cache_horizon < longest {
            warn!(
                horizon_ms = self.store.cache_horizon.as_millis() as u64,
                window_ms = longest.as_millis() as u64,
                "Cache horizon shorter than the longest window, extending"
            );
            self.store.cache_horizon = longest;
        }
    }
}

/// Accept `sqlite:///path` style URLs as plain file paths.
fn strip_sqlite_url(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("sqlite:///")
        .or_else(|| trimmed.strip_prefix("sqlite://"))
        .unwrap_or(trimmed)
        .to_string()
}

// Serde helper for Duration (milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = OracleConfig::default();
        assert_eq!(config.aggregation.public_window, Duration::from_secs(300));
        assert_eq!(config.aggregation.routing_window, Duration::from_secs(120));
        assert_eq!(config.aggregation.min_samples, 5);
        assert_eq!(config.aggregation.hurst_min_samples, 20);
    }

    #[test]
    fn test_partial_toml() {
        let config: OracleConfig = toml::from_str(
            r#"
            [aggregation]
            routing_window = 60000
            min_samples = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.aggregation.routing_window, Duration::from_secs(60));
        assert_eq!(config.aggregation.min_samples, 3);
        assert_eq!(config.aggregation.public_window, Duration::from_secs(300));
        assert_eq!(config.server.bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ROUTING_WINDOW_SECS", "30"),
            ("MIN_SAMPLES", "0"),
            ("PUBLIC_WINDOW_SECS", "bogus"),
            ("DATABASE_URL", "sqlite:///./pnl.db"),
        ]
        .into_iter()
        .collect();

        let mut config = OracleConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        config.normalize();

        assert_eq!(config.aggregation.routing_window, Duration::from_secs(30));
        assert_eq!(config.aggregation.public_window, Duration::from_secs(300));
        assert_eq!(config.aggregation.min_samples, 1);
        assert_eq!(config.store.db_path, "./pnl.db");
    }

    #[test]
    fn test_cache_horizon_covers_windows() {
        let mut config = OracleConfig::default();
        config.store.cache_horizon = Duration::from_secs(10);
        config.normalize();
        assert_eq!(config.store.cache_horizon, Duration::from_secs(300));
    }

    #[test]
    fn test_oversized_windows_clamped() {
        let mut config = OracleConfig::default();
        config.aggregation.risk_window = Duration::from_secs(u64::MAX);
        config.store.cache_horizon = Duration::from_secs(u64::MAX / 2);
        config.normalize();

        assert_eq!(config.aggregation.risk_window, MAX_WINDOW);
        assert_eq!(config.store.cache_horizon, MAX_WINDOW);
        assert_eq!(config.aggregation.public_window, Duration::from_secs(300));
        assert_eq!(window_offset(Duration::from_secs(u64::MAX)), chrono::Duration::days(30));
        assert_eq!(window_offset(Duration::from_secs(90)), chrono::Duration::seconds(90));
    }

    #[test]
    fn test_forwarded_for_trust_is_opt_in() {
        let mut config = OracleConfig::default();
        assert!(!config.ingest.trust_forwarded_for);

        let toml_config: OracleConfig = toml::from_str(
            r#"
            [ingest]
            trust_forwarded_for = true
            "#,
        )
        .unwrap();
        assert!(toml_config.ingest.trust_forwarded_for);

        config.apply_env(|k| (k == "ORACLE_TRUST_FORWARDED_FOR").then(|| "true".to_string()));
        assert!(config.ingest.trust_forwarded_for);
    }
}
