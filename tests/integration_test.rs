// Integration tests for Kiro Gateway
//
// These tests verify the full HTTP stack including routing, middleware,
// request parsing, and response formatting.

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
    Router,
};
use tower::ServiceExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::collections::HashMap;

use kiro_gateway::{
    auth::AuthManager,
    cache::ModelCache,
    config::{Config, DebugMode, FakeReasoningHandling},
    http_client::KiroHttpClient,
    resolver::ModelResolver,
    routes::{self, AppState},
};

// ==================================================================================================
// Test Helpers
// ==================================================================================================

/// Create a test application state with mocked dependencies
fn create_test_app_state() -> AppState {
    let cache = ModelCache::new(3600);
    cache.update(vec![
        json!({
            "modelId": "claude-sonnet-4",
            "modelName": "Claude Sonnet 4"
        }),
        json!({
            "modelId": "claude-haiku-4",
            "modelName": "Claude Haiku 4"
        }),
        json!({
            "modelId": "claude-opus-4",
            "modelName": "Claude Opus 4"
        }),
    ]);

    let auth_manager = Arc::new(
        AuthManager::new_for_testing(
            "test-access-token-12345".to_string(),
            "us-east-1".to_string(),
            300,
        )
        .expect("Failed to create test auth manager"),
    );

    let http_client = Arc::new(
        KiroHttpClient::new(auth_manager.clone(), 20, 30, 300, 3)
            .expect("Failed to create HTTP client"),
    );

    let resolver = ModelResolver::new(cache.clone(), HashMap::new());

    let config = Arc::new(Config {
        server_host: "127.0.0.1".to_string(),
        server_port: 8080,
        proxy_api_key: "test-api-key-secret".to_string(),
        kiro_region: "us-east-1".to_string(),
        kiro_cli_db_file: std::path::PathBuf::from("/tmp/test.db"),
        streaming_timeout: 300,
        token_refresh_threshold: 300,
        first_token_timeout: 15,
        http_max_connections: 20,
        http_connect_timeout: 30,
        http_request_timeout: 300,
        http_max_retries: 3,
        debug_mode: DebugMode::Off,
        log_level: "info".to_string(),
        tool_description_max_length: 10000,
        fake_reasoning_enabled: true,
        fake_reasoning_max_tokens: 4000,
        fake_reasoning_handling: FakeReasoningHandling::AsReasoningContent,
    });

    AppState {
        proxy_api_key: "test-api-key-secret".to_string(),
        model_cache: cache,
        auth_manager,
        http_client,
        resolver,
        config,
    }
}

/// Build the test application router
fn build_test_app(state: AppState) -> Router {
    let health_routes = routes::health_routes();
    let openai_routes = routes::openai_routes(state.clone());
    let anthropic_routes = routes::anthropic_routes(state);

    Router::new()
        .merge(health_routes)
        .merge(openai_routes)
        .merge(anthropic_routes)
}

/// Helper to parse JSON response body
async fn parse_json_body(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// ==================================================================================================
// Health Check Tests
// ==================================================================================================

#[tokio::test]
async fn test_root_endpoint() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["message"], "Kiro Gateway is running");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_health_endpoint() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
    assert!(body["version"].is_string());
}

// ==================================================================================================
// OpenAI API Authentication Tests
// ==================================================================================================

#[tokio::test]
async fn test_openai_models_without_auth() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    // Request without Authorization header
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = parse_json_body(response.into_body()).await;
    assert!(body["error"]["message"].as_str().unwrap().contains("API Key"));
}

#[tokio::test]
async fn test_openai_models_with_invalid_auth() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    // Request with wrong API key
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .header(header::AUTHORIZATION, "Bearer wrong-api-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = parse_json_body(response.into_body()).await;
    assert!(body["error"]["message"].as_str().unwrap().contains("Invalid"));
}

#[tokio::test]
async fn test_openai_models_with_valid_auth() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    // Request with correct API key
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .header(header::AUTHORIZATION, "Bearer test-api-key-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_json_body(response.into_body()).await;
    assert_eq!(body["object"], "list");
    assert!(body["data"].is_array());
    
    let models = body["data"].as_array().unwrap();
    assert_eq!(models.len(), 3);
    
    // Verify model structure
    for model in models {
        assert_eq!(model["object"], "model");
        assert!(model["id"].is_string());
        assert_eq!(model["owned_by"], "anthropic");
    }
}

#[tokio::test]
async fn test_openai_chat_completions_without_auth() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    let request_body = json!({
        "model": "claude-sonnet-4",
        "messages": [{"role": "user", "content": "Hello"}]
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_string(&request_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_openai_chat_completions_empty_messages() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    let request_body = json!({
        "model": "claude-sonnet-4",
        "messages": []
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header(header::AUTHORIZATION, "Bearer test-api-key-secret")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_string(&request_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = parse_json_body(response.into_body()).await;
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("messages"));
}

// ==================================================================================================
// Anthropic API Authentication Tests
// ==================================================================================================

#[tokio::test]
async fn test_anthropic_messages_without_auth() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    let request_body = json!({
        "model": "claude-sonnet-4",
        "max_tokens": 100,
        "messages": [{"role": "user", "content": "Hello"}]
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header(header::CONTENT_TYPE, "application/json")
                .header("anthropic-version", "2023-06-01")
                .body(Body::from(serde_json::to_string(&request_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_anthropic_messages_without_version_header() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    let request_body = json!({
        "model": "claude-sonnet-4",
        "max_tokens": 100,
        "messages": [{"role": "user", "content": "Hello"}]
    });

    // Request without anthropic-version header should still work (header is optional)
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header(header::AUTHORIZATION, "Bearer test-api-key-secret")
                .header(header::CONTENT_TYPE, "application/json")
                // No anthropic-version header - should still work
                .body(Body::from(serde_json::to_string(&request_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    // Should not fail validation - will fail later when trying to call Kiro API
    // but that's expected in tests without a real backend
    // The important thing is it doesn't return 400 for missing header
    assert_ne!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_anthropic_messages_empty_messages() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    let request_body = json!({
        "model": "claude-sonnet-4",
        "max_tokens": 100,
        "messages": []
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header(header::AUTHORIZATION, "Bearer test-api-key-secret")
                .header(header::CONTENT_TYPE, "application/json")
                .header("anthropic-version", "2023-06-01")
                .body(Body::from(serde_json::to_string(&request_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = parse_json_body(response.into_body()).await;
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("messages"));
}

#[tokio::test]
async fn test_anthropic_messages_invalid_max_tokens() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    let request_body = json!({
        "model": "claude-sonnet-4",
        "max_tokens": 0,
        "messages": [{"role": "user", "content": "Hello"}]
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/messages")
                .header(header::AUTHORIZATION, "Bearer test-api-key-secret")
                .header(header::CONTENT_TYPE, "application/json")
                .header("anthropic-version", "2023-06-01")
                .body(Body::from(serde_json::to_string(&request_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = parse_json_body(response.into_body()).await;
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("max_tokens"));
}

// ==================================================================================================
// API Key Format Tests
// ==================================================================================================

#[tokio::test]
async fn test_auth_with_x_api_key_header() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    // Using x-api-key header instead of Authorization Bearer
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .header("x-api-key", "test-api-key-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_auth_bearer_prefix_case_insensitive() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    // Test with uppercase "Bearer" (standard format)
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .header(header::AUTHORIZATION, "Bearer test-api-key-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

// ==================================================================================================
// 404 Not Found Tests
// ==================================================================================================

#[tokio::test]
async fn test_unknown_endpoint_with_auth() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    // Unknown endpoint with auth - should return 404
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/unknown")
                .header(header::AUTHORIZATION, "Bearer test-api-key-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_endpoint_without_auth() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    // Unknown endpoint without auth - may return 401 or 404 depending on route matching
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/unknown")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    // Either 401 (auth required) or 404 (not found) is acceptable
    assert!(
        response.status() == StatusCode::UNAUTHORIZED
            || response.status() == StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn test_wrong_method() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    // GET on POST-only endpoint
    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/v1/chat/completions")
                .header(header::AUTHORIZATION, "Bearer test-api-key-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

// ==================================================================================================
// Model Resolution Tests
// ==================================================================================================

#[tokio::test]
async fn test_model_list_contains_expected_models() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/models")
                .header(header::AUTHORIZATION, "Bearer test-api-key-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = parse_json_body(response.into_body()).await;
    let models = body["data"].as_array().unwrap();
    
    let model_ids: Vec<&str> = models
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();

    assert!(model_ids.contains(&"claude-sonnet-4"));
    assert!(model_ids.contains(&"claude-haiku-4"));
    assert!(model_ids.contains(&"claude-opus-4"));
}

// ==================================================================================================
// Content-Type Tests
// ==================================================================================================

#[tokio::test]
async fn test_json_content_type_required_for_post() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    let request_body = json!({
        "model": "claude-sonnet-4",
        "messages": [{"role": "user", "content": "Hello"}]
    });

    // POST without Content-Type header
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header(header::AUTHORIZATION, "Bearer test-api-key-secret")
                // Missing Content-Type
                .body(Body::from(serde_json::to_string(&request_body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    // Should fail with unsupported media type or bad request
    assert!(
        response.status() == StatusCode::UNSUPPORTED_MEDIA_TYPE
            || response.status() == StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn test_invalid_json_body() {
    let state = create_test_app_state();
    let app = build_test_app(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/chat/completions")
                .header(header::AUTHORIZATION, "Bearer test-api-key-secret")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{ invalid json }"))
                .unwrap(),
        )
        .await
        .unwrap();

    // Should fail with bad request due to JSON parse error
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
