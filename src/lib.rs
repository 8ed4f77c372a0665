//! PnL Global Oracle backend
//!
//! Crowd-sourced execution telemetry in, ranked source health, risk
//! leaderboards and routing recommendations out.

pub mod api;
pub mod auth;
pub mod config;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod store;
pub mod telemetry;

pub use config::OracleConfig;
pub use store::{SampleStore, StoreError};
pub use telemetry::TelemetryEngine;
