//! Telemetry Aggregation & Risk Scoring
//!
//! Turns raw latency/slippage pings into ranked views of execution sources.
//!
//! Pipeline, recomputed on every query:
//! - `window`: read `[now - window, now]` from the sample store, group per source
//! - `stats`: mean, jitter, p99, Hurst exponent, fat-tail and systemic ratios
//! - `scoring`: risk score, health score with traffic light, routing score
//! - `routing`: pick the best source for an order, with fallbacks
//!
//! `engine::TelemetryEngine` wires the pipeline to a [`crate::store::SampleStore`].

pub mod engine;
pub mod routing;
pub mod scoring;
pub mod stats;
pub mod window;

pub use engine::*;
pub use routing::*;
pub use scoring::*;
pub use stats::*;
pub use window::*;
