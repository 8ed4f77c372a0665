//! Middleware for observability and ingest protection.
//!
//! - Request logging with latency tracking
//! - Per-client rate limiting for anonymous telemetry

pub mod logging;
pub mod rate_limit;

pub use logging::{client_key, forwarded_for, peer_ip, request_logging};
pub use rate_limit::{rate_limit_middleware, RateLimitConfig, RateLimitLayer};
