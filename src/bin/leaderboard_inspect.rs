//! Leaderboard Inspector
//!
//! Offline view of a telemetry database: prints the public leaderboard, the
//! risk leaderboard, per-source statistics and a routing decision as JSON.
//!
//! Usage:
//!   leaderboard_inspect --db-path pnl_oracle.db --window-secs 300 --min-samples 5 --urgency high

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pnl_oracle_backend::config::AggregationConfig;
use pnl_oracle_backend::models::now_millis;
use pnl_oracle_backend::store::SqliteSampleStore;
use pnl_oracle_backend::telemetry::{RouteRequest, TelemetryEngine, Urgency};

#[derive(Parser, Debug)]
#[command(name = "leaderboard_inspect")]
#[command(about = "Print leaderboards and a routing decision from a telemetry database")]
struct Args {
    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH", default_value = "pnl_oracle.db")]
    db_path: String,

    /// Window length applied to every view
    #[arg(long, default_value = "300")]
    window_secs: u64,

    /// Minimum samples per source
    #[arg(long, default_value = "5")]
    min_samples: usize,

    /// Routing urgency ("high" for speed-only routing)
    #[arg(long, default_value = "normal")]
    urgency: String,

    /// Symbol for the routing decision
    #[arg(long, default_value = "BTC-USD")]
    symbol: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let db_path = args
        .db_path
        .trim_start_matches("sqlite:///")
        .trim_start_matches("sqlite://")
        .to_string();
    let store = Arc::new(
        SqliteSampleStore::open(&db_path)
            .with_context(|| format!("Failed to open database at {}", db_path))?,
    );
    info!(db_path = %db_path, samples = store.sample_count().await?, "Database opened");

    let window = Duration::from_secs(args.window_secs.max(1));
    let config = AggregationConfig {
        public_window: window,
        risk_window: window,
        routing_window: window,
        min_samples: args.min_samples.max(1),
        ..AggregationConfig::default()
    };
    let engine = TelemetryEngine::new(store, config);

    let now = now_millis();
    let request = RouteRequest {
        symbol: args.symbol.clone(),
        size: 0.0,
        urgency: Urgency::parse(&args.urgency),
    };

    let report = json!({
        "generated_at": now,
        "window_secs": window.as_secs(),
        "min_samples": args.min_samples.max(1),
        "stats": engine.stats_at(now, window).await?,
        "global_status": engine.global_status_at(now).await?,
        "risk_leaderboard": engine.risk_leaderboard_at(now).await?,
        "route": engine.route_at(&request, now).await?,
    });

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
