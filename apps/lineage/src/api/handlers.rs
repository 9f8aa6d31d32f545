//! # API Endpoint Handlers
//!
//! Registry calls that hash secrets or write to the store run on the
//! blocking pool; cheap reads run inline.

use super::{
    ApiError, AppState,
    types::{
        CatalogQuery, CatalogResponse, CodeJson, CodesResponse, DepthQuery, EraRequest,
        EraResponse, ExportResponse, HealthResponse, LineageJson, LoginRequest, LoginResponse,
        PersonJson, RegisterRequest, RegisterResponse, RelativesResponse, ResolveRequest,
        StatusResponse,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use lineage_core::{
    Dimension, EpochSpec, EraKind, LineageError, Outcome, Registry, primitives::MAX_LINEAGE_DEPTH,
    snapshot_checksum,
};

/// Depth of a lineage walk when the query string omits it.
const DEFAULT_WALK_DEPTH: usize = 3;

/// Run `f` against the registry on the blocking pool.
async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Registry) -> Result<T, LineageError> + Send + 'static,
{
    let registry = state.registry.clone();
    tokio::task::spawn_blocking(move || f(&registry))
        .await
        .map_err(|e| ApiError::Internal(format!("worker failed: {}", e)))?
        .map_err(ApiError::from)
}

/// Validate that depth is within bounds to prevent DoS.
fn walk_depth(query: &DepthQuery) -> Result<usize, ApiError> {
    let depth = query.depth.unwrap_or(DEFAULT_WALK_DEPTH);
    if depth > MAX_LINEAGE_DEPTH {
        return Err(LineageError::InputValidation(format!(
            "depth {} exceeds maximum {}",
            depth, MAX_LINEAGE_DEPTH
        ))
        .into());
    }
    Ok(depth)
}

// =============================================================================
// HEALTH & STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Registry metrics.
pub async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    let metrics = state.registry.metrics()?;
    Ok(Json(StatusResponse::from_metrics(
        state.registry.store().name(),
        metrics,
    )))
}

// =============================================================================
// CODES
// =============================================================================

/// Era code of a date. An unreadable date yields an empty code.
pub async fn era_handler(Json(request): Json<EraRequest>) -> Result<Json<EraResponse>, ApiError> {
    let kind: EraKind = request.kind.parse()?;
    let code = EpochSpec::for_kind(kind)
        .code_for_str(&request.date)
        .map(|code| code.to_string())
        .unwrap_or_default();
    Ok(Json(EraResponse { code }))
}

/// Resolve a label, allocating a code when it has none.
pub async fn resolve_handler(
    State(state): State<AppState>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<CodeJson>, ApiError> {
    let dimension: Dimension = request.dimension.parse()?;
    let resolution = blocking(&state, move |registry| {
        registry.classifier().resolve(dimension, &request.label)
    })
    .await?;
    Ok(Json(CodeJson::from(resolution)))
}

/// Curated and allocated codes of a dimension.
pub async fn codes_handler(
    State(state): State<AppState>,
    Path(dimension): Path<String>,
) -> Result<Json<CodesResponse>, ApiError> {
    let dimension: Dimension = dimension.parse()?;
    let codes = state.registry.classifier().codes(dimension)?;
    Ok(Json(CodesResponse {
        dimension,
        codes: codes.into_iter().map(CodeJson::from).collect(),
    }))
}

// =============================================================================
// PERSONS
// =============================================================================

/// Register a person.
///
/// 201 when created, 200 on an idempotent replay, 202 when the store was
/// unavailable and the request went to the outbox.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outbox = state.outbox.clone();
    let outcome = blocking(&state, move |registry| {
        let request = request.into_registration()?;
        match outbox {
            Some(outbox) => registry.register_or_queue(request, &outbox),
            None => registry.register(request).map(Outcome::Registered),
        }
    })
    .await?;

    Ok(match outcome {
        Outcome::Registered(receipt) if receipt.replayed => {
            (StatusCode::OK, Json(RegisterResponse::from_receipt(receipt)))
        }
        Outcome::Registered(receipt) => {
            (StatusCode::CREATED, Json(RegisterResponse::from_receipt(receipt)))
        }
        Outcome::Queued { ticket } => {
            (StatusCode::ACCEPTED, Json(RegisterResponse::queued(ticket)))
        }
    })
}

/// Find a person by display identifier.
pub async fn person_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PersonJson>, ApiError> {
    let person = state.registry.find_by_id(&id)?;
    Ok(Json(PersonJson::from(&person)))
}

/// Registered children, in registration order.
pub async fn children_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RelativesResponse>, ApiError> {
    let person = state.registry.find_by_id(&id)?;
    let children = state.registry.graph().children(&person.id)?;
    Ok(Json(RelativesResponse {
        id: person.id.to_string(),
        relatives: children
            .iter()
            .map(|child| LineageJson {
                depth: 1,
                person: PersonJson::from(child),
            })
            .collect(),
    }))
}

/// Ancestors up to `depth` generations.
pub async fn ancestors_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<RelativesResponse>, ApiError> {
    let depth = walk_depth(&query)?;
    let person = state.registry.find_by_id(&id)?;
    let entries = state.registry.graph().ancestors(&person.id, depth)?;
    Ok(Json(RelativesResponse {
        id: person.id.to_string(),
        relatives: entries.iter().map(LineageJson::from).collect(),
    }))
}

/// Descendants up to `depth` generations.
pub async fn descendants_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<RelativesResponse>, ApiError> {
    let depth = walk_depth(&query)?;
    let person = state.registry.find_by_id(&id)?;
    let entries = state.registry.graph().descendants(&person.id, depth)?;
    Ok(Json(RelativesResponse {
        id: person.id.to_string(),
        relatives: entries.iter().map(LineageJson::from).collect(),
    }))
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

/// Authenticate a living person.
pub async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let session = blocking(&state, move |registry| {
        registry.authenticate(&request.id, &request.secret)
    })
    .await?;
    Ok(Json(LoginResponse::from(session)))
}

// =============================================================================
// CATALOG
// =============================================================================

/// Children of a geography node; the continents when `path` is empty.
pub async fn catalog_handler(
    State(state): State<AppState>,
    Query(query): Query<CatalogQuery>,
) -> Result<Json<CatalogResponse>, ApiError> {
    let path = query.path.trim().trim_matches('/').to_string();
    let level = state.catalog.level_of(&path);
    if !path.is_empty() && level.is_none() {
        return Err(ApiError::NotFound(format!("catalog path '{}' not found", path)));
    }
    let entries = state.catalog.children_of(&path).into_iter().cloned().collect();
    Ok(Json(CatalogResponse {
        path,
        level,
        entries,
    }))
}

// =============================================================================
// EXPORT HANDLER
// =============================================================================

/// Export the registry as a snapshot.
pub async fn export_handler(
    State(state): State<AppState>,
) -> Result<Json<ExportResponse>, ApiError> {
    let data = blocking(&state, |registry| registry.export_snapshot()).await?;
    let checksum = snapshot_checksum(&data);
    Ok(Json(ExportResponse::new(&data, checksum)))
}
