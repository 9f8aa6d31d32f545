//! # Lineage HTTP API Module
//!
//! This module implements the HTTP REST API server using axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check (never authenticated)
//! - `GET /status` - Registry metrics
//! - `POST /codes/era` - Era code of a date
//! - `POST /codes/resolve` - Resolve (or allocate) a classification code
//! - `GET /codes/{dimension}` - Known codes of a dimension
//! - `POST /persons` - Register a person
//! - `GET /persons/{id}` - Find a person by display identifier
//! - `GET /persons/{id}/children` - Registered children
//! - `GET /persons/{id}/ancestors?depth=` - Ancestors
//! - `GET /persons/{id}/descendants?depth=` - Descendants
//! - `POST /auth/login` - Authenticate a living person
//! - `GET /catalog/children?path=` - Geography catalog children
//! - `POST /export` - Registry snapshot (base64) with BLAKE3 checksum
//!
//! ## Security Configuration
//!
//! See [`crate::config::SecurityConfig`]: API key, rate limit and CORS
//! origins come from `LINEAGE_*` variables or `[security]` in `lineage.toml`.

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::key_matches;
pub use middleware::create_rate_limiter;
pub use handlers::{
    ancestors_handler, catalog_handler, children_handler, codes_handler, descendants_handler,
    era_handler, export_handler, health_handler, login_handler, person_handler, register_handler,
    resolve_handler, status_handler,
};
pub use types::{
    CatalogQuery, CatalogResponse, CodeJson, CodesJson, CodesResponse, DepthQuery, EraRequest,
    EraResponse, ErrorResponse, ExportResponse, HealthResponse, LineageJson, LoginRequest,
    LoginResponse, PersonJson, RegisterRequest, RegisterResponse, RelativesResponse,
    ResolveRequest, StatusResponse,
};

use crate::config::SecurityConfig;
use axum::{
    Json, Router,
    http::{HeaderValue, Method, StatusCode, header},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lineage_core::{GeographyCatalog, LineageError, Outbox, Registry};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
///
/// The registry synchronizes internally, so handlers share it without a lock.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    /// Local queue for registrations made while the store is unavailable.
    pub outbox: Option<Arc<Outbox>>,
    pub catalog: &'static GeographyCatalog,
}

impl AppState {
    /// Create new app state with a registry and the built-in catalog.
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
            outbox: None,
            catalog: GeographyCatalog::builtin(),
        }
    }

    #[must_use]
    pub fn with_outbox(mut self, outbox: Outbox) -> Self {
        self.outbox = Some(Arc::new(outbox));
        self
    }
}

// =============================================================================
// ERROR MAPPING
// =============================================================================

/// Handler error, rendered as an [`ErrorResponse`].
#[derive(Debug)]
pub enum ApiError {
    Lineage(LineageError),
    /// A non-person resource (catalog path, ...) does not exist.
    NotFound(String),
    /// A worker task failed.
    Internal(String),
}

impl From<LineageError> for ApiError {
    fn from(e: LineageError) -> Self {
        Self::Lineage(e)
    }
}

/// HTTP status for a registry error.
pub fn status_for(error: &LineageError) -> StatusCode {
    match error {
        LineageError::InputValidation(_) | LineageError::InvalidIdentifier(_) => {
            StatusCode::BAD_REQUEST
        }
        LineageError::PersonNotFound(_) => StatusCode::NOT_FOUND,
        LineageError::ParentNotFound(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LineageError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        LineageError::AuthenticationUnsupported(_) => StatusCode::FORBIDDEN,
        LineageError::DuplicateIdentifier(_)
        | LineageError::ClassificationConflict { .. }
        | LineageError::CodeAlreadyAssigned { .. } => StatusCode::CONFLICT,
        LineageError::PersistenceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        LineageError::SequenceExhausted(_)
        | LineageError::Serialization(_)
        | LineageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Stable machine-readable kind of a registry error.
pub fn error_kind(error: &LineageError) -> &'static str {
    match error {
        LineageError::InputValidation(_) => "input_validation",
        LineageError::InvalidIdentifier(_) => "invalid_identifier",
        LineageError::ParentNotFound(_) => "parent_not_found",
        LineageError::PersonNotFound(_) => "person_not_found",
        LineageError::DuplicateIdentifier(_) => "duplicate_identifier",
        LineageError::ClassificationConflict { .. } => "classification_conflict",
        LineageError::CodeAlreadyAssigned { .. } => "code_already_assigned",
        LineageError::SequenceExhausted(_) => "sequence_exhausted",
        LineageError::AuthenticationUnsupported(_) => "authentication_unsupported",
        LineageError::InvalidCredentials => "invalid_credentials",
        LineageError::PersistenceUnavailable(_) => "persistence_unavailable",
        LineageError::Serialization(_) => "serialization",
        LineageError::Io(_) => "io",
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            Self::Lineage(e) => (status_for(&e), error_kind(&e), e.to_string()),
            Self::NotFound(what) => (StatusCode::NOT_FOUND, "not_found", what),
            Self::Internal(what) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", what),
        };
        if status.is_server_error() {
            tracing::error!(%status, kind, error = %message, "request failed");
        }
        (
            status,
            Json(ErrorResponse {
                kind: kind.to_string(),
                error: message,
            }),
        )
            .into_response()
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer.
///
/// - `"*"`: all origins (development only)
/// - unset: localhost only
/// - otherwise: the comma-separated origin list
fn build_cors_layer(origins: Option<&str>) -> CorsLayer {
    match origins {
        Some("*") => {
            tracing::warn!("CORS: Allowing ALL origins. This is insecure for production!");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!("CORS: No valid origins configured, defaulting to localhost only");
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => {
            tracing::info!("CORS: No origins configured, defaulting to localhost only");
            build_localhost_cors()
        }
    }
}

/// Build a restrictive CORS layer that only allows localhost origins.
fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|origin| origin.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing - logs all requests
/// 2. CORS - handles preflight requests
/// 3. Body limit
/// 4. Rate Limiting - protects against DoS (if enabled)
/// 5. Authentication - validates API key (if configured)
pub fn create_router(state: AppState, security: &SecurityConfig) -> Router {
    let cors = build_cors_layer(security.cors_origins.as_deref());

    let rate_limiter = if security.rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", security.rate_limit);
        Some(create_rate_limiter(security.rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let mut router = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/codes/era", post(handlers::era_handler))
        .route("/codes/resolve", post(handlers::resolve_handler))
        .route("/codes/{dimension}", get(handlers::codes_handler))
        .route("/persons", post(handlers::register_handler))
        .route("/persons/{id}", get(handlers::person_handler))
        .route("/persons/{id}/children", get(handlers::children_handler))
        .route("/persons/{id}/ancestors", get(handlers::ancestors_handler))
        .route("/persons/{id}/descendants", get(handlers::descendants_handler))
        .route("/auth/login", post(handlers::login_handler))
        .route("/catalog/children", get(handlers::catalog_handler))
        .route("/export", post(handlers::export_handler));

    // Innermost: runs last on the request.
    match security.api_key.as_deref() {
        Some(key) => {
            tracing::info!("API key authentication enabled");
            router = router.layer(axum_middleware::from_fn_with_state(
                auth::ApiKey::from(key),
                auth::api_key_auth_middleware,
            ));
        }
        None => {
            tracing::warn!(
                "API key authentication DISABLED - all endpoints are publicly accessible! \
                 Set LINEAGE_API_KEY to enable authentication."
            );
        }
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(axum::extract::DefaultBodyLimit::max(2 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server. Returns after Ctrl+C.
pub async fn run_server(
    addr: &str,
    state: AppState,
    security: &SecurityConfig,
) -> Result<(), LineageError> {
    let router = create_router(state, security);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| LineageError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("Lineage HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| LineageError::Io(format!("Server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
