//! REST Surface Integration Tests
//!
//! Authentication, status mapping and response shape of the gateway router.
//!
//! Run with: `cargo test -p catalog-gateway-api --features test-utils --test http_tests`

#![cfg(feature = "test-utils")]

use axum::{
    body::Body,
    http::{header::AUTHORIZATION, Request, StatusCode},
    Router,
};
use catalog_gateway_api::test_utils::{bearer_for, TestCatalog};
use catalog_gateway_core::{Principal, ServiceType};
use serde_json::Value;
use tower::ServiceExt;

// ============================================================================
// Test Infrastructure
// ============================================================================

/// Helper to make GET requests to the test app
async fn make_request(app: Router, path: &str, auth_header: Option<&str>) -> (StatusCode, Value) {
    let mut req_builder = Request::builder().uri(path).method("GET");

    if let Some(auth) = auth_header {
        req_builder = req_builder.header(AUTHORIZATION, auth);
    }

    let request = req_builder.body(Body::empty()).unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).to_string()));

    (status, json)
}

fn assert_error_body(body: &Value) {
    assert!(body["error"].is_string(), "missing error: {}", body);
    assert!(body["request_id"].is_string(), "missing request_id: {}", body);
}

async fn setup() -> (TestCatalog, Router, String) {
    let catalog = TestCatalog::new().await.unwrap();
    let (app, api_keys) = catalog.router(catalog.builtin_authorizer());
    let auth = bearer_for(&api_keys, &Principal::user("bob")).await.unwrap();
    (catalog, app, auth)
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_needs_no_key() {
    let (_catalog, app, _auth) = setup().await;

    let (status, body) = make_request(app.clone(), "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".to_string()));

    let (status, body) = make_request(app, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"]["status"], "healthy");
    assert_eq!(body["secrets"]["status"], "healthy");
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_missing_or_invalid_key_is_unauthorized() {
    let (_catalog, app, _auth) = setup().await;

    let (status, body) = make_request(app.clone(), "/api/v1/tables", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_error_body(&body);

    let (status, body) =
        make_request(app.clone(), "/api/v1/tables", Some("Bearer cgw_nope")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_error_body(&body);

    let (status, _) = make_request(app, "/api/v1/tables", Some("Basic Ym9iOmJvYg==")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_revoked_key_is_unauthorized() {
    let catalog = TestCatalog::new().await.unwrap();
    let (app, api_keys) = catalog.router(catalog.builtin_authorizer());
    let auth = bearer_for(&api_keys, &Principal::user("bob")).await.unwrap();

    let (status, _) = make_request(app.clone(), "/api/v1/tables", Some(&auth)).await;
    assert_eq!(status, StatusCode::OK);

    let keys = api_keys.list_keys().await.unwrap();
    assert!(api_keys.revoke_key(keys[0].id).await.unwrap());

    let (status, _) = make_request(app, "/api/v1/tables", Some(&auth)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_list_pages_through_collection() {
    let (catalog, app, auth) = setup().await;
    catalog
        .seed_tables(&["a", "b", "c", "d", "e"])
        .await
        .unwrap();

    let (status, body) = make_request(app.clone(), "/api/v1/tables?limit=2", Some(&auth)).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["a", "b"]);
    assert!(body["paging"]["before"].is_null());
    assert_eq!(body["data"][0]["redaction"], "withheld");

    let after = body["paging"]["after"].as_str().unwrap().to_string();
    let (status, body) = make_request(
        app,
        &format!("/api/v1/tables?limit=2&after={}", after),
        Some(&auth),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["name"], "c");
    assert_eq!(body["data"][1]["name"], "d");
    assert!(body["paging"]["before"].is_string());
}

#[tokio::test]
async fn test_client_errors_are_bad_requests() {
    let (catalog, app, auth) = setup().await;
    catalog.seed_tables(&["a"]).await.unwrap();

    for path in [
        "/api/v1/tables?before=abc&after=def",
        "/api/v1/tables?limit=0",
        "/api/v1/tables?limit=ten",
        "/api/v1/tables?after=%21%21%21",
        "/api/v1/tables?fields=colour",
        "/api/v1/tables?include=some",
    ] {
        let (status, body) = make_request(app.clone(), path, Some(&auth)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", path);
        assert_error_body(&body);
    }
}

#[tokio::test]
async fn test_unknown_collection_is_not_found() {
    let (_catalog, app, auth) = setup().await;

    let (status, body) = make_request(app, "/api/v1/spreadsheets", Some(&auth)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_error_body(&body);
}

#[tokio::test]
async fn test_connection_config_redacted_for_non_admin() {
    let catalog = TestCatalog::new().await.unwrap();
    catalog.seed_service("warehouse", "ann", "hunter2").await.unwrap();
    let (app, api_keys) = catalog.router(catalog.builtin_authorizer());
    let bob = bearer_for(&api_keys, &Principal::user("bob")).await.unwrap();
    let root = bearer_for(&api_keys, &Principal::admin("root")).await.unwrap();

    let path = "/api/v1/databaseServices?fields=connection";

    let (status, body) = make_request(app.clone(), path, Some(&bob)).await;
    assert_eq!(status, StatusCode::OK);
    let item = &body["data"][0];
    assert_eq!(item["redaction"], "redacted");
    assert!(item["connection"].is_object());
    assert!(item["connection"]["config"].is_null());
    assert!(!body.to_string().contains("hunter2"));

    let (status, body) = make_request(app, path, Some(&root)).await;
    assert_eq!(status, StatusCode::OK);
    let item = &body["data"][0];
    assert_eq!(item["redaction"], "fully_visible");
    assert_eq!(item["connection"]["config"]["password"], "hunter2");
}

#[tokio::test]
async fn test_inconsistent_stored_connection_is_server_error() {
    let catalog = TestCatalog::new().await.unwrap();
    let stored = catalog.seed_service("warehouse", "ann", "hunter2").await.unwrap();

    // Stored config no longer matches its service type
    let mut corrupted = stored.connection.clone().unwrap();
    corrupted.service_type = ServiceType::Looker;
    let conn = catalog.backend().get_connection().await.unwrap();
    conn.execute(
        "UPDATE entities SET connection = ?1 WHERE name = 'warehouse'",
        [serde_json::to_string(&corrupted).unwrap()],
    )
    .unwrap();

    let (app, api_keys) = catalog.router(catalog.builtin_authorizer());
    let root = bearer_for(&api_keys, &Principal::admin("root")).await.unwrap();

    let (status, body) = make_request(
        app,
        "/api/v1/databaseServices?fields=connection",
        Some(&root),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_error_body(&body);
    assert_eq!(body["error"], "Internal server error");
    assert!(!body.to_string().contains("Looker"));
}
