use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use slotkeeper_backend::config::Config;
use slotkeeper_backend::{create_app, helpers};
use slotkeeper_db::{MemoryStore, Repository, Requester};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

const INTERNAL_TOKEN: &str = "slotkeeper-sk-internal";

/// Helper to create the app on an in-memory store
async fn setup_app() -> axum::Router {
    let store = MemoryStore::new();
    store
        .issue_token(
            helpers::hash_api_key(INTERNAL_TOKEN),
            Requester::internal(Uuid::new_v4()),
            helpers::now(),
        )
        .await
        .unwrap();

    let config = Config {
        rate_limit_matchmaking_burst: 1000,
        rate_limit_player_burst: 1000,
        rate_limit_general_burst: 1000,
        ..Config::default()
    };
    create_app(Arc::new(store), &config)
}

/// Helper to send a request and get response
async fn send_request(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("x-forwarded-for", "127.0.0.1");

    if let Some(token) = auth_token {
        request_builder = request_builder.header("Authorization", format!("Bearer {}", token));
    }

    let request = if let Some(json_body) = body {
        request_builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&json_body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes();

    let json = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, json)
}

fn assert_error_shape(body: &Value, kind: &str) {
    assert!(body.get("error").is_some(), "Response should have 'error' field");
    let error_msg = body["error"].as_str().unwrap();
    assert!(!error_msg.is_empty(), "Error message should not be empty");
    assert_eq!(body["kind"], kind);
}

#[tokio::test]
async fn test_missing_authorization_is_no_requester() {
    // GIVEN: A running application
    let app = setup_app().await;

    // WHEN: Matching without an Authorization header
    let (status, body) = send_request(
        app,
        "POST",
        "/servers/match",
        Some(json!({
            "releaseId": Uuid::new_v4(),
            "worldId": Uuid::new_v4(),
            "kind": "community"
        })),
        None,
    )
    .await;

    // THEN: Should return 401 with JSON error
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_error_shape(&body, "no_requester");
}

#[tokio::test]
async fn test_unknown_token_is_invalid_api_key() {
    // GIVEN: A running application
    let app = setup_app().await;

    // WHEN: Using a token that was never issued
    let (status, body) = send_request(
        app,
        "GET",
        &format!("/servers/{}", Uuid::new_v4()),
        None,
        Some("slotkeeper-sk-unknown"),
    )
    .await;

    // THEN: Should return 401
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_error_shape(&body, "invalid_api_key");
}

#[tokio::test]
async fn test_not_found_error_format() {
    // GIVEN: An empty store
    let app = setup_app().await;

    // WHEN: Fetching a server that does not exist
    let (status, body) = send_request(
        app,
        "GET",
        &format!("/servers/{}", Uuid::new_v4()),
        None,
        Some(INTERNAL_TOKEN),
    )
    .await;

    // THEN: Should return 404 with a descriptive message
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_error_shape(&body, "server_not_found");
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_validation_error_format() {
    // GIVEN: A running application
    let app = setup_app().await;

    // WHEN: Reporting an oversized status message
    let (status, body) = send_request(
        app,
        "POST",
        &format!("/servers/{}/status", Uuid::new_v4()),
        Some(json!({ "status": "online", "message": "x".repeat(600) })),
        Some(INTERNAL_TOKEN),
    )
    .await;

    // THEN: Should return 400 naming the limit
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error_shape(&body, "validation");
    assert!(body["error"].as_str().unwrap().contains("512"));
}

#[tokio::test]
async fn test_invalid_status_error_format() {
    // GIVEN: A running application
    let app = setup_app().await;

    // WHEN: Setting a player status that does not exist
    let (status, body) = send_request(
        app,
        "PUT",
        &format!("/servers/{}/players/{}", Uuid::new_v4(), Uuid::new_v4()),
        Some(json!({ "status": "afk" })),
        Some(INTERNAL_TOKEN),
    )
    .await;

    // THEN: Should return 400 and echo the literal
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error_shape(&body, "invalid_status");
    assert!(body["error"].as_str().unwrap().contains("afk"));
}

#[tokio::test]
async fn test_malformed_server_id_is_rejected() {
    // GIVEN: A running application
    let app = setup_app().await;

    // WHEN: Using a path segment that is not a UUID
    let (status, _body) = send_request(
        app,
        "GET",
        "/servers/not-a-uuid",
        None,
        Some(INTERNAL_TOKEN),
    )
    .await;

    // THEN: Should be a client error
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_oversized_roster_is_rejected() {
    // GIVEN: A running application
    let app = setup_app().await;
    let roster: Vec<Uuid> = (0..10_001u128).map(Uuid::from_u128).collect();

    // WHEN: Reporting more than 10 000 online players
    let (status, body) = send_request(
        app,
        "POST",
        &format!("/servers/{}/status", Uuid::new_v4()),
        Some(json!({ "status": "online", "players": roster })),
        Some(INTERNAL_TOKEN),
    )
    .await;

    // THEN: Should return 400 before touching storage
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_error_shape(&body, "validation");
}
