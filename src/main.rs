//! PnL Global Oracle server
//!
//! Usage:
//!   pnl-oracle --config oracle.toml --bind 0.0.0.0:8000 --db-path pnl_oracle.db
//!
//! Environment Variables:
//!   ORACLE_CONFIG_PATH - Path to TOML config file
//!   ORACLE_BIND_ADDR, DATABASE_PATH, ORACLE_CACHE_ENABLED,
//!   PUBLIC_WINDOW_SECS, RISK_WINDOW_SECS, ROUTING_WINDOW_SECS, MIN_SAMPLES,
//!   ORACLE_TRUST_FORWARDED_FOR
//!   RUST_LOG - tracing filter (default: pnl_oracle_backend=debug,tower_http=info)

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pnl_oracle_backend::api::{create_router, AppState};
use pnl_oracle_backend::OracleConfig;

#[derive(Parser, Debug)]
#[command(name = "pnl-oracle")]
#[command(about = "Crowd-sourced execution telemetry oracle")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, env = "ORACLE_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Listen address, overrides config and ORACLE_BIND_ADDR
    #[arg(short, long)]
    bind: Option<String>,

    /// SQLite database file, overrides config and DATABASE_PATH
    #[arg(long)]
    db_path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();
    let args = Args::parse();

    let mut config = OracleConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(db_path) = args.db_path {
        config.store.db_path = db_path;
        config.normalize();
    }

    info!(
        db_path = %config.store.db_path,
        cache_enabled = config.store.cache_enabled,
        public_window_secs = config.aggregation.public_window.as_secs(),
        risk_window_secs = config.aggregation.risk_window.as_secs(),
        routing_window_secs = config.aggregation.routing_window.as_secs(),
        min_samples = config.aggregation.min_samples,
        "Starting PnL Global Oracle"
    );

    let state = AppState::from_config(&config).await?;

    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(limiter.window().max(std::time::Duration::from_secs(1)));
        loop {
            interval.tick().await;
            let dropped = limiter.cleanup();
            if dropped > 0 {
                tracing::debug!(dropped, "Rate limiter entries expired");
            }
        }
    });

    if let Some(cache) = state.cache.clone() {
        tokio::spawn(async move {
            let period = (cache.horizon() / 4).max(std::time::Duration::from_secs(1));
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                let dropped = cache.evict_expired();
                if dropped > 0 {
                    tracing::debug!(
                        dropped,
                        sources = cache.tracked_sources(),
                        "Expired samples evicted from cache"
                    );
                }
            }
        });
    }

    let app = create_router(state);

    let addr: SocketAddr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind_addr))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "API server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pnl_oracle_backend=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents), then the crate directory.
    let _ = dotenv();
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
