//! API key middleware

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::debug;

pub const API_KEY_HEADER: &str = "x-pro-key";
const API_KEY_PREFIX: &str = "sk_";

/// Resolved caller, inserted into request extensions by [`api_key_middleware`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
}

/// Resolve a caller from the raw key: `sk_` prefix required, id is the last `_` segment.
pub fn resolve_caller(key: &str) -> Result<CallerIdentity, AuthError> {
    let key = key.trim();
    if !key.starts_with(API_KEY_PREFIX) {
        return Err(AuthError::InvalidKey);
    }
    match key.rsplit('_').next() {
        Some(user_id) if !user_id.is_empty() => Ok(CallerIdentity {
            user_id: user_id.to_string(),
        }),
        _ => Err(AuthError::InvalidKey),
    }
}

fn key_from_headers(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(API_KEY_HEADER)
        .ok_or(AuthError::MissingKey)?
        .to_str()
        .map_err(|_| AuthError::InvalidKey)
}

/// Rejects requests without a valid `x-pro-key`; handlers read `Extension<CallerIdentity>`.
pub async fn api_key_middleware(mut req: Request, next: Next) -> Result<Response, AuthError> {
    let caller = resolve_caller(key_from_headers(req.headers())?)?;
    debug!(user_id = %caller.user_id, path = %req.uri().path(), "Caller resolved");
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingKey,
    InvalidKey,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MissingKey => "Missing API Key",
            AuthError::InvalidKey => "Invalid API Key",
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": message, "retryable": false })),
        )
            .into_response()
    }
}
