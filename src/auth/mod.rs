//! Caller identification for the pro endpoints
//!
//! Keys are opaque `sk_..._<caller>` strings passed in `x-pro-key`. Issuance
//! and storage of keys live outside this service.

pub mod middleware;

pub use middleware::{api_key_middleware, resolve_caller, AuthError, CallerIdentity, API_KEY_HEADER};
