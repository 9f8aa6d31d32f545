//! Integration tests for the Lineage HTTP API.
//!
//! Uses axum-test to test the API handlers without starting a real server.

// Allow unwrap and panic in tests - these are standard for test code
// Allow holding MutexGuard across await in env tests - tests are serialized
// intentionally to avoid env var conflicts
#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use axum::http::{HeaderValue, StatusCode, header};
use axum_test::TestServer;
use lineage::api::{
    AppState, CatalogResponse, CodeJson, CodesResponse, EraResponse, ErrorResponse,
    ExportResponse, HealthResponse, LoginResponse, PersonJson, RegisterResponse,
    RelativesResponse, StatusResponse, create_router,
};
use lineage::config::{ENV_API_KEY, ENV_RATE_LIMIT, SecurityConfig};
use lineage_core::{ClassificationSeed, GeoLevel, Outbox, Registry};
use serde_json::{Value, json};
use std::sync::Mutex;

/// Mutex to serialize tests that modify env vars.
static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

const FATHER_ID: &str = "G95C1P2R2E1F1 1";
const CHILD_ID: &str = "G96C1P2R2E1F1 1";

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn open_security() -> SecurityConfig {
    SecurityConfig {
        api_key: None,
        rate_limit: 0,
        cors_origins: None,
    }
}

fn fresh_state() -> AppState {
    AppState::new(Registry::in_memory(ClassificationSeed::curated().unwrap()).unwrap())
}

/// Create a test server with a fresh in-memory registry.
fn create_test_server() -> TestServer {
    TestServer::new(create_router(fresh_state(), &open_security())).unwrap()
}

fn create_secured_server(api_key: &str) -> TestServer {
    let security = SecurityConfig {
        api_key: Some(api_key.to_string()),
        ..open_security()
    };
    TestServer::new(create_router(fresh_state(), &security)).unwrap()
}

fn living(given: &str, family: &str, birth: &str, secret: &str) -> Value {
    json!({
        "kind": "living",
        "given_name": given,
        "family_name": family,
        "gender": "male",
        "birth_date": birth,
        "continent": "Afrique",
        "country": "Guinée",
        "region": "Fouta-Djallon",
        "ethnicity": "Peuls",
        "secret": secret,
    })
}

fn deceased(given: &str, family: &str, birth: &str, death: &str) -> Value {
    json!({
        "kind": "deceased",
        "given_name": given,
        "family_name": family,
        "gender": "female",
        "birth_date": birth,
        "death_date": death,
        "continent": "Afrique",
        "country": "Guinée",
        "region": "Fouta-Djallon",
        "ethnicity": "Peuls",
    })
}

/// Path of a person resource; the space in the id is percent-encoded.
fn person_path(id: &str, suffix: &str) -> String {
    format!("/persons/{}{}", id.replace(' ', "%20"), suffix)
}

/// A father and one child.
async fn create_family_server() -> TestServer {
    let server = create_test_server();

    server
        .post("/persons")
        .json(&living("Alpha", "Diallo", "1960-03-02", "father-secret"))
        .await
        .assert_status(StatusCode::CREATED);

    let mut child = living("Boubacar", "Diallo", "2015-09-20", "child-secret");
    child["father"] = json!(FATHER_ID);
    server
        .post("/persons")
        .json(&child)
        .await
        .assert_status(StatusCode::CREATED);

    server
}

// =============================================================================
// HEALTH & STATUS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let server = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_empty_registry() {
    let server = create_test_server();

    let response = server.get("/status").await;

    response.assert_status_ok();
    let status: StatusResponse = response.json();
    assert_eq!(status.backend, "memory");
    assert_eq!(status.persons, 0);
    assert_eq!(status.prefixes, 0);
}

#[tokio::test]
async fn test_status_counts_family() {
    let server = create_family_server().await;

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.persons, 2);
    assert_eq!(status.living, 2);
    assert_eq!(status.deceased, 0);
    assert_eq!(status.lineage_roots, 1);
    assert_eq!(status.prefixes, 2);
}

// =============================================================================
// CODE ENDPOINTS
// =============================================================================

#[tokio::test]
async fn test_era_generation_and_decet() {
    let server = create_test_server();

    let generation: EraResponse = server
        .post("/codes/era")
        .json(&json!({ "date": "1990-04-12" }))
        .await
        .json();
    assert_eq!(generation.code, "G96");

    let decet: EraResponse = server
        .post("/codes/era")
        .json(&json!({ "date": "2001-01-01", "kind": "decet" }))
        .await
        .json();
    assert_eq!(decet.code, "D94");
}

#[tokio::test]
async fn test_era_unreadable_date_is_empty_code() {
    let server = create_test_server();

    let response = server
        .post("/codes/era")
        .json(&json!({ "date": "sometime" }))
        .await;

    response.assert_status_ok();
    let era: EraResponse = response.json();
    assert!(era.code.is_empty());
}

#[tokio::test]
async fn test_era_unknown_kind_rejected() {
    let server = create_test_server();

    let response = server
        .post("/codes/era")
        .json(&json!({ "date": "1990-04-12", "kind": "century" }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_resolve_curated_label() {
    let server = create_test_server();

    let response = server
        .post("/codes/resolve")
        .json(&json!({ "dimension": "family", "label": "  Diallo " }))
        .await;

    response.assert_status_ok();
    let code: CodeJson = response.json();
    assert_eq!(code.code, "F1");
    assert_eq!(code.origin, lineage_core::CodeOrigin::Static);
}

#[tokio::test]
async fn test_resolve_gap_allocates_once() {
    let server = create_test_server();
    let request = json!({ "dimension": "family", "label": "Millimono" });

    let first: CodeJson = server.post("/codes/resolve").json(&request).await.json();
    let second: CodeJson = server.post("/codes/resolve").json(&request).await.json();

    assert_eq!(first.origin, lineage_core::CodeOrigin::Fresh);
    assert_eq!(second.origin, lineage_core::CodeOrigin::Allocated);
    assert_eq!(first.code, second.code);
    assert!(first.code.starts_with('F'));

    let codes: CodesResponse = server.get("/codes/family").await.json();
    assert!(codes.codes.iter().any(|c| c.code == first.code));
}

#[tokio::test]
async fn test_codes_unknown_dimension_rejected() {
    let server = create_test_server();

    let response = server.get("/codes/planet").await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let error: ErrorResponse = response.json();
    assert_eq!(error.kind, "input_validation");
}

// =============================================================================
// REGISTRATION
// =============================================================================

#[tokio::test]
async fn test_register_living_person() {
    let server = create_test_server();

    let response = server
        .post("/persons")
        .json(&living("Alpha", "Diallo", "1960-03-02", "s3cret"))
        .await;

    response.assert_status(StatusCode::CREATED);
    let registered: RegisterResponse = response.json();
    assert_eq!(registered.status, "registered");
    let person = registered.person.unwrap();
    assert_eq!(person.id, FATHER_ID);
    assert_eq!(person.kind, "living");
    assert!(registered.gaps.is_empty());

    // Credentials never leave the server.
    let raw = response.text();
    assert!(!raw.contains("s3cret"));
    assert!(!raw.contains("argon2"));
}

#[tokio::test]
async fn test_register_deceased_person() {
    let server = create_test_server();

    let response = server
        .post("/persons")
        .json(&deceased("Kadiatou", "Diallo", "1930-01-01", "2001-01-01"))
        .await;

    response.assert_status(StatusCode::CREATED);
    let registered: RegisterResponse = response.json();
    let person = registered.person.unwrap();
    assert_eq!(person.id, "D94G95C1P2R2E1F1 1");
    assert_eq!(person.codes.decet.as_deref(), Some("D94"));
}

#[tokio::test]
async fn test_register_reports_gaps() {
    let server = create_test_server();

    let response = server
        .post("/persons")
        .json(&living("Fodé", "Millimono", "1990-04-12", "x"))
        .await;

    response.assert_status(StatusCode::CREATED);
    let registered: RegisterResponse = response.json();
    assert_eq!(registered.gaps.len(), 1);
    assert_eq!(registered.gaps[0].label, "Millimono");
}

#[tokio::test]
async fn test_register_idempotent_replay() {
    let server = create_test_server();
    let mut request = living("Alpha", "Diallo", "1960-03-02", "s3cret");
    request["idempotency_key"] = json!("req-42");

    let first = server.post("/persons").json(&request).await;
    first.assert_status(StatusCode::CREATED);

    let second = server.post("/persons").json(&request).await;
    second.assert_status_ok();
    let replay: RegisterResponse = second.json();
    assert_eq!(replay.status, "replayed");
    assert_eq!(replay.person.unwrap().id, FATHER_ID);

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.persons, 1);
}

#[tokio::test]
async fn test_register_sequence_increments() {
    let server = create_test_server();

    for expected in 1..=3 {
        let registered: RegisterResponse = server
            .post("/persons")
            .json(&living("Alpha", "Diallo", "1960-03-02", "s"))
            .await
            .json();
        assert_eq!(
            registered.person.unwrap().id,
            format!("G95C1P2R2E1F1 {}", expected)
        );
    }
}

#[tokio::test]
async fn test_register_invalid_input_rejected() {
    let server = create_test_server();

    let mut missing_secret = living("Alpha", "Diallo", "1960-03-02", "s");
    missing_secret.as_object_mut().unwrap().remove("secret");
    let response = server.post("/persons").json(&missing_secret).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let error: ErrorResponse = response.json();
    assert_eq!(error.kind, "input_validation");

    let bad_date = living("Alpha", "Diallo", "not-a-date", "s");
    server
        .post("/persons")
        .json(&bad_date)
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let mut unknown_field = living("Alpha", "Diallo", "1960-03-02", "s");
    unknown_field["nickname"] = json!("Al");
    let response = server.post("/persons").json(&unknown_field).await;
    assert!(response.status_code().is_client_error());
}

#[tokio::test]
async fn test_register_unknown_parent_writes_nothing() {
    let server = create_test_server();
    let mut orphan = living("Boubacar", "Diallo", "2015-09-20", "s");
    orphan["father"] = json!("G95C1P2R2E1F1 9");

    let response = server.post("/persons").json(&orphan).await;

    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = response.json();
    assert_eq!(error.kind, "parent_not_found");

    let status: StatusResponse = server.get("/status").await.json();
    assert_eq!(status.persons, 0);
    assert_eq!(status.prefixes, 0);
}

#[tokio::test]
async fn test_register_with_outbox_still_registers_when_store_is_up() {
    let state = fresh_state().with_outbox(Outbox::in_memory());
    let server = TestServer::new(create_router(state, &open_security())).unwrap();

    let response = server
        .post("/persons")
        .json(&living("Alpha", "Diallo", "1960-03-02", "s"))
        .await;

    response.assert_status(StatusCode::CREATED);
    let registered: RegisterResponse = response.json();
    assert!(registered.ticket.is_none());
}

// =============================================================================
// LOOKUP & LINEAGE
// =============================================================================

#[tokio::test]
async fn test_person_lookup() {
    let server = create_family_server().await;

    let response = server.get(&person_path(CHILD_ID, "")).await;

    response.assert_status_ok();
    let person: PersonJson = response.json();
    assert_eq!(person.given_name, "Boubacar");
    assert_eq!(person.father.as_deref(), Some(FATHER_ID));
    assert!(person.mother.is_none());
}

#[tokio::test]
async fn test_person_lookup_normalizes_whitespace() {
    let server = create_family_server().await;

    let response = server.get("/persons/%20G95C1P2R2E1F1%20%20%201%20").await;

    response.assert_status_ok();
    let person: PersonJson = response.json();
    assert_eq!(person.id, FATHER_ID);
}

#[tokio::test]
async fn test_person_not_found_and_malformed() {
    let server = create_family_server().await;

    let missing = server.get(&person_path("G95C1P2R2E1F1 7", "")).await;
    missing.assert_status_not_found();
    let error: ErrorResponse = missing.json();
    assert_eq!(error.kind, "person_not_found");

    // A lookup key that cannot be an identifier is simply not found.
    server
        .get("/persons/not-an-id")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_children_and_walks() {
    let server = create_family_server().await;

    let children: RelativesResponse = server.get(&person_path(FATHER_ID, "/children")).await.json();
    assert_eq!(children.id, FATHER_ID);
    assert_eq!(children.relatives.len(), 1);
    assert_eq!(children.relatives[0].person.id, CHILD_ID);

    let ancestors: RelativesResponse = server
        .get(&person_path(CHILD_ID, "/ancestors"))
        .add_query_param("depth", 2)
        .await
        .json();
    assert_eq!(ancestors.relatives.len(), 1);
    assert_eq!(ancestors.relatives[0].depth, 1);
    assert_eq!(ancestors.relatives[0].person.id, FATHER_ID);

    let descendants: RelativesResponse = server
        .get(&person_path(FATHER_ID, "/descendants"))
        .await
        .json();
    assert_eq!(descendants.relatives.len(), 1);

    let none: RelativesResponse = server
        .get(&person_path(CHILD_ID, "/descendants"))
        .await
        .json();
    assert!(none.relatives.is_empty());
}

#[tokio::test]
async fn test_walk_depth_bounded() {
    let server = create_family_server().await;

    let response = server
        .get(&person_path(CHILD_ID, "/ancestors"))
        .add_query_param("depth", 100_000)
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

// =============================================================================
// LOGIN
// =============================================================================

#[tokio::test]
async fn test_login_living_person() {
    let server = create_family_server().await;

    let response = server
        .post("/auth/login")
        .json(&json!({ "id": FATHER_ID, "secret": "father-secret" }))
        .await;

    response.assert_status_ok();
    let login: LoginResponse = response.json();
    assert!(!login.token.is_empty());
    assert_eq!(login.person.id, FATHER_ID);
}

#[tokio::test]
async fn test_login_wrong_secret_is_unauthorized() {
    let server = create_family_server().await;

    let response = server
        .post("/auth/login")
        .json(&json!({ "id": FATHER_ID, "secret": "child-secret" }))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let error: ErrorResponse = response.json();
    assert_eq!(error.kind, "invalid_credentials");
}

#[tokio::test]
async fn test_login_deceased_is_forbidden() {
    let server = create_test_server();
    server
        .post("/persons")
        .json(&deceased("Kadiatou", "Diallo", "1930-01-01", "2001-01-01"))
        .await
        .assert_status(StatusCode::CREATED);

    let response = server
        .post("/auth/login")
        .json(&json!({ "id": "D94G95C1P2R2E1F1 1", "secret": "anything" }))
        .await;

    response.assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_login_unknown_person_is_not_found() {
    let server = create_test_server();

    let response = server
        .post("/auth/login")
        .json(&json!({ "id": FATHER_ID, "secret": "x" }))
        .await;

    response.assert_status_not_found();
}

// =============================================================================
// CATALOG
// =============================================================================

#[tokio::test]
async fn test_catalog_lists_continents() {
    let server = create_test_server();

    let response = server.get("/catalog/children").await;

    response.assert_status_ok();
    let catalog: CatalogResponse = response.json();
    assert!(catalog.path.is_empty());
    assert!(catalog.level.is_none());
    assert!(catalog.entries.iter().any(|e| e.name == "Afrique"));
    assert!(catalog.entries.iter().all(|e| !e.path.contains('/')));
}

#[tokio::test]
async fn test_catalog_children_of_country() {
    let server = create_test_server();

    let catalog: CatalogResponse = server
        .get("/catalog/children")
        .add_query_param("path", "C1/P1")
        .await
        .json();

    assert_eq!(catalog.level, Some(GeoLevel::Country));
    assert!(catalog.entries.iter().any(|e| e.name == "Basse-Guinée"));
    assert!(catalog.entries.iter().all(|e| e.path.starts_with("C1/P1/")));
    assert!(catalog.entries.iter().all(|e| e.level == GeoLevel::Region));
}

#[tokio::test]
async fn test_catalog_unknown_path_not_found() {
    let server = create_test_server();

    let response = server
        .get("/catalog/children")
        .add_query_param("path", "C99/P1")
        .await;

    response.assert_status_not_found();
}

// =============================================================================
// EXPORT
// =============================================================================

#[tokio::test]
async fn test_export_registry() {
    let server = create_family_server().await;

    let response = server.post("/export").await;

    response.assert_status_ok();
    let export: ExportResponse = response.json();
    assert!(export.size > 5);
    assert!(!export.data.is_empty());
    assert_eq!(export.checksum.len(), 64);

    // Unchanged registry, same bytes.
    let again: ExportResponse = server.post("/export").await.json();
    assert_eq!(export.checksum, again.checksum);
}

#[tokio::test]
async fn test_unknown_endpoint_is_404() {
    let server = create_test_server();

    server.get("/nonexistent").await.assert_status_not_found();
}

// =============================================================================
// API KEY AUTHENTICATION
// =============================================================================

#[tokio::test]
async fn test_auth_valid_bearer_token() {
    let api_key = "test-secret-key-12345";
    let server = create_secured_server(api_key);

    let response = server
        .get("/status")
        .add_header(
            header::AUTHORIZATION,
            format!("Bearer {}", api_key)
                .parse::<HeaderValue>()
                .unwrap(),
        )
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_valid_raw_token() {
    let api_key = "test-raw-key-67890";
    let server = create_secured_server(api_key);

    let response = server
        .get("/status")
        .add_header(header::AUTHORIZATION, api_key.parse::<HeaderValue>().unwrap())
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_invalid_token_rejected() {
    let server = create_secured_server("correct-key");

    let response = server
        .get("/status")
        .add_header(
            header::AUTHORIZATION,
            "Bearer wrong-key".parse::<HeaderValue>().unwrap(),
        )
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_missing_header_rejected() {
    let server = create_secured_server("required-key");

    server
        .get("/status")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_health_endpoint_bypasses_auth() {
    let server = create_secured_server("secret-key-for-bypass-test");

    server.get("/health").await.assert_status_ok();
}

#[tokio::test]
async fn test_auth_key_from_environment() {
    let _guard = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under ENV_TEST_MUTEX, so no concurrent env access.
    unsafe {
        std::env::set_var(ENV_API_KEY, "env-key");
        std::env::set_var(ENV_RATE_LIMIT, "0");
    }
    let security = SecurityConfig::from_env();
    // SAFETY: as above.
    unsafe {
        std::env::remove_var(ENV_API_KEY);
        std::env::remove_var(ENV_RATE_LIMIT);
    }

    assert_eq!(security.api_key.as_deref(), Some("env-key"));
    assert_eq!(security.rate_limit, 0);

    let server = TestServer::new(create_router(fresh_state(), &security)).unwrap();
    server
        .get("/status")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    server
        .get("/status")
        .add_header(
            header::AUTHORIZATION,
            "Bearer env-key".parse::<HeaderValue>().unwrap(),
        )
        .await
        .assert_status_ok();
}

// =============================================================================
// RATE LIMITING
// =============================================================================

#[tokio::test]
async fn test_rate_limit_returns_429() {
    let security = SecurityConfig {
        rate_limit: 1,
        ..open_security()
    };
    let server = TestServer::new(create_router(fresh_state(), &security)).unwrap();

    server.get("/health").await.assert_status_ok();
    server
        .get("/health")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}
