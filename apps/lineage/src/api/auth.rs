//! # Authentication Module
//!
//! API key authentication for the Lineage HTTP API.
//!
//! ## Configuration
//!
//! The key comes from `LINEAGE_API_KEY` (see [`crate::config`]). When set,
//! all requests except `/health` must carry it:
//! ```text
//! Authorization: Bearer <your-api-key>
//! ```
//!
//! This guards the service itself. Person login (`POST /auth/login`) is a
//! separate concern handled by the registry.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// The configured API key, shared with the middleware.
pub type ApiKey = Arc<str>;

// =============================================================================
// API KEY AUTHENTICATION
// =============================================================================

/// Constant-time key comparison.
///
/// Both keys are padded to the same length so `ct_eq` always runs over the
/// same number of bytes.
pub fn key_matches(provided: &str, expected: &str) -> bool {
    let provided_bytes = provided.as_bytes();
    let expected_bytes = expected.as_bytes();

    let max_len = provided_bytes.len().max(expected_bytes.len());
    let mut padded_provided = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    padded_provided[..provided_bytes.len()].copy_from_slice(provided_bytes);
    padded_expected[..expected_bytes.len()].copy_from_slice(expected_bytes);

    let bytes_match: bool = padded_provided.ct_eq(&padded_expected).into();
    bytes_match && provided_bytes.len() == expected_bytes.len()
}

/// The key presented in `Authorization`, with or without the `Bearer ` scheme.
fn presented_key(request: &Request<Body>) -> Option<&str> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    Some(value.strip_prefix("Bearer ").unwrap_or(value))
}

/// API key authentication middleware.
///
/// `/health` is always allowed so load balancers can check the service.
pub async fn api_key_auth_middleware(
    State(expected): State<ApiKey>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let rejection = match presented_key(&request) {
        Some(key) if key_matches(key, &expected) => None,
        Some(_) => Some("invalid_api_key"),
        None => Some("missing_authorization_header"),
    };
    let Some(reason) = rejection else {
        return Ok(next.run(request).await);
    };
    tracing::warn!(
        event = "auth_failure",
        reason,
        path = %request.uri().path(),
        "API key rejected"
    );
    Err((StatusCode::UNAUTHORIZED, "Unauthorized"))
}

// =============================================================================
// TESTS
// =============================================================================
