//! Request logging middleware.
//!
//! Logs every HTTP request with method, path, status code, and latency.

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::Request,
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{info, warn};

/// Peer address of the connection, when served with connect info.
pub fn peer_ip<B>(request: &Request<B>) -> Option<String> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// First hop of `x-forwarded-for`. Client-supplied unless a trusted proxy sets it.
pub fn forwarded_for<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Client identity for per-client limits: the peer address, or the first
/// forwarded hop when the deployment sits behind a trusted proxy.
pub fn client_key<B>(request: &Request<B>, trust_forwarded_for: bool) -> String {
    let forwarded = trust_forwarded_for
        .then(|| forwarded_for(request))
        .flatten();
    forwarded
        .or_else(|| peer_ip(request))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Logs at INFO for completed requests, WARN for 5xx. `/health` is skipped.
pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let client = peer_ip(&request).unwrap_or_else(|| "unknown".to_string());
    let forwarded = forwarded_for(&request).unwrap_or_default();
    let start = Instant::now();
    let response = next.run(request).await;
    let latency = start.elapsed();
    let status = response.status().as_u16();

    if status >= 500 {
        warn!(
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency.as_millis(),
            client = %client,
            forwarded_for = %forwarded,
            "Request failed (5xx)"
        );
    } else if status >= 400 {
        info!(
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency.as_millis(),
            client = %client,
            forwarded_for = %forwarded,
            "Request completed (4xx)"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency.as_millis(),
            "Request completed"
        );
    }

    response
}
