use axum::{
    body::Body,
    extract::{Path, State},
    middleware::{self as axum_middleware},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
    Extension, Json, Router,
};
use chrono::Utc;
use futures::stream::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::auth::AuthCache;
use crate::config::Config;
use crate::crypto::Crypto;
use crate::error::{GatewayError, Result};
use crate::metrics::MetricsCollector;
use crate::middleware;
use crate::models::anthropic::AnthropicMessagesRequest;
use crate::oauth_state::OAuthStateRegistry;
use crate::orchestrator::Orchestrator;
use crate::store::{CustomAccountFormat, CustomAccountPatch, CustomAccountStatus, KiroAuthType, Store, Visibility};
use crate::tokenizer::count_anthropic_message_tokens;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across handlers. One per process: every user's
/// credentials live in `store`, not in this struct.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub auth_cache: Arc<AuthCache>,
    pub crypto: Arc<Crypto>,
    pub orchestrator: Arc<Orchestrator>,
    pub oauth_states: Arc<OAuthStateRegistry>,
    pub config: Arc<Config>,
    pub metrics: Arc<MetricsCollector>,
}

/// The authenticated caller, attached to request extensions by
/// [`middleware::auth_middleware`] once the API key resolves to a user row.
#[derive(Clone, Copy, Debug)]
pub struct AuthedUser {
    pub user_id: i64,
}

pub fn health_routes() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
}

pub fn anthropic_routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/messages", post(messages_handler))
        .route("/v1/messages/count_tokens", post(count_tokens_handler))
        .route("/cc/v1/messages", post(cc_messages_handler))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::auth_middleware))
        .with_state(state)
}

pub fn user_api_routes(state: AppState) -> Router {
    Router::new()
        .route("/user/api/custom-apis", get(list_custom_apis).post(create_custom_api))
        .route(
            "/user/api/custom-apis/{id}",
            patch(patch_custom_api).put(put_custom_api).delete(delete_custom_api),
        )
        .route("/user/api/custom-apis/{id}/status", post(set_custom_api_status))
        .route("/user/api/kiro-tokens", post(create_kiro_token_handler))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::auth_middleware))
        .with_state(state)
}

pub fn admin_api_routes(state: AppState) -> Router {
    Router::new()
        .route("/admin/api/custom-apis", get(admin_list_custom_apis).post(admin_create_custom_api))
        .route(
            "/admin/api/custom-apis/{id}",
            patch(admin_patch_custom_api).put(admin_put_custom_api).delete(admin_delete_custom_api),
        )
        .route("/admin/api/custom-apis/{id}/status", post(admin_set_custom_api_status))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::auth_middleware))
        .with_state(state)
}

async fn root_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "Kiro Gateway is running",
        "version": VERSION
    }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": VERSION
    }))
}

fn validate_messages_request(request: &AnthropicMessagesRequest) -> Result<()> {
    if request.messages.is_empty() {
        return Err(GatewayError::ValidationError {
            field: "messages".to_string(),
            message: "messages cannot be empty".to_string(),
        });
    }
    if request.max_tokens <= 0 {
        return Err(GatewayError::ValidationError {
            field: "max_tokens".to_string(),
            message: "max_tokens must be positive".to_string(),
        });
    }
    Ok(())
}

/// POST /v1/messages
async fn messages_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    Json(request): Json<AnthropicMessagesRequest>,
) -> Result<Response> {
    tracing::info!(
        user_id = user.user_id,
        model = %request.model,
        stream = request.stream,
        "request to /v1/messages"
    );
    validate_messages_request(&request)?;

    let input_tokens = count_anthropic_message_tokens(&request.messages, request.system.as_ref(), request.tools.as_ref());

    if request.stream {
        let stream = state.orchestrator.stream(user.user_id, &request, input_tokens).await?;
        let byte_stream = stream.map(|result| {
            result
                .map(bytes::Bytes::from)
                .map_err(|e: GatewayError| std::io::Error::other(e.to_string()))
        });
        let response = Response::builder()
            .status(200)
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(Body::from_stream(byte_stream))
            .map_err(|e| GatewayError::Internal(anyhow::anyhow!("failed to build sse response: {e}")))?;
        Ok(response)
    } else {
        let body = state.orchestrator.collect(user.user_id, &request, input_tokens).await?;
        Ok(Json(body).into_response())
    }
}

/// POST /cc/v1/messages — same contract as `/v1/messages`, but the streaming
/// path buffers upstream events and corrects `input_tokens` from the
/// upstream-reported context usage before replay (spec §4.9).
async fn cc_messages_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    Json(request): Json<AnthropicMessagesRequest>,
) -> Result<Response> {
    tracing::info!(
        user_id = user.user_id,
        model = %request.model,
        stream = request.stream,
        "request to /cc/v1/messages"
    );
    validate_messages_request(&request)?;

    let input_tokens = count_anthropic_message_tokens(&request.messages, request.system.as_ref(), request.tools.as_ref());

    if request.stream {
        let stream = state
            .orchestrator
            .stream_buffered(user.user_id, &request, input_tokens)
            .await?;
        let byte_stream = stream.map(|result| {
            result
                .map(bytes::Bytes::from)
                .map_err(|e: GatewayError| std::io::Error::other(e.to_string()))
        });
        let response = Response::builder()
            .status(200)
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(Body::from_stream(byte_stream))
            .map_err(|e| GatewayError::Internal(anyhow::anyhow!("failed to build sse response: {e}")))?;
        Ok(response)
    } else {
        let body = state.orchestrator.collect(user.user_id, &request, input_tokens).await?;
        Ok(Json(body).into_response())
    }
}

/// POST /v1/messages/count_tokens
async fn count_tokens_handler(Json(request): Json<AnthropicMessagesRequest>) -> Json<Value> {
    let input_tokens = count_anthropic_message_tokens(&request.messages, request.system.as_ref(), request.tools.as_ref());
    Json(json!({ "input_tokens": input_tokens }))
}

// ------------------------------------------------------ custom-api CRUD

#[derive(Debug, Deserialize)]
struct CreateCustomApiRequest {
    name: Option<String>,
    api_base: String,
    api_key: String,
    format: String,
    provider: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetStatusRequest {
    status: String,
}

async fn list_custom_apis(State(state): State<AppState>, Extension(user): Extension<AuthedUser>) -> Result<Json<Value>> {
    let accounts = state
        .store
        .get_custom_accounts_by_user(user.user_id)
        .await
        .map_err(GatewayError::Internal)?;
    Ok(Json(json!({ "accounts": accounts })))
}

async fn create_custom_api(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    Json(req): Json<CreateCustomApiRequest>,
) -> Result<Json<Value>> {
    let format = CustomAccountFormat::parse(&req.format).ok_or_else(|| GatewayError::ValidationError {
        field: "format".to_string(),
        message: "must be one of: openai, claude".to_string(),
    })?;

    let id = state
        .store
        .create_custom_account(
            user.user_id,
            req.name.as_deref(),
            &req.api_base,
            &req.api_key,
            format,
            req.provider.as_deref(),
            req.model.as_deref(),
        )
        .await
        .map_err(|e| GatewayError::ValidationError {
            field: "api_base".to_string(),
            message: e.to_string(),
        })?;

    Ok(Json(json!({ "id": id })))
}

async fn patch_custom_api(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    Path(id): Path<i64>,
    Json(patch): Json<CustomAccountPatch>,
) -> Result<Json<Value>> {
    apply_custom_account_patch(&state.store, id, Some(user.user_id), patch).await
}

/// PUT /user/api/custom-apis/{id} — full patch, same validation rules as
/// a partial PATCH; the distinction is purely in what the caller chooses to
/// send.
async fn put_custom_api(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    Path(id): Path<i64>,
    Json(patch): Json<CustomAccountPatch>,
) -> Result<Json<Value>> {
    apply_custom_account_patch(&state.store, id, Some(user.user_id), patch).await
}

async fn apply_custom_account_patch(store: &Store, id: i64, user_id: Option<i64>, patch: CustomAccountPatch) -> Result<Json<Value>> {
    let matched = store.update_custom_account(id, user_id, &patch).await.map_err(|e| {
        GatewayError::ValidationError {
            field: "custom_api".to_string(),
            message: e.to_string(),
        }
    })?;
    if !matched {
        return Err(GatewayError::OwnershipError("custom api account not found".to_string()));
    }
    Ok(Json(json!({ "ok": true })))
}

async fn delete_custom_api(State(state): State<AppState>, Extension(user): Extension<AuthedUser>, Path(id): Path<i64>) -> Result<Json<Value>> {
    let deleted = state
        .store
        .delete_custom_account(id, Some(user.user_id))
        .await
        .map_err(GatewayError::Internal)?;
    if !deleted {
        return Err(GatewayError::OwnershipError("custom api account not found".to_string()));
    }
    Ok(Json(json!({ "ok": true })))
}

async fn set_custom_api_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    Path(id): Path<i64>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<Value>> {
    let status = match req.status.as_str() {
        "active" => CustomAccountStatus::Active,
        "disabled" => CustomAccountStatus::Disabled,
        _ => {
            return Err(GatewayError::ValidationError {
                field: "status".to_string(),
                message: "must be one of: active, disabled".to_string(),
            })
        }
    };
    let matched = state
        .store
        .set_custom_account_status(id, Some(user.user_id), status)
        .await
        .map_err(GatewayError::Internal)?;
    if !matched {
        return Err(GatewayError::OwnershipError("custom api account not found".to_string()));
    }
    Ok(Json(json!({ "ok": true })))
}

// ------------------------------------------------------------- admin CRUD
// Identical handlers, but `user_id: None` so the store's ownership clause
// is never applied.

async fn admin_list_custom_apis(State(state): State<AppState>) -> Result<Json<Value>> {
    let accounts = state.store.admin_get_all_custom_accounts().await.map_err(GatewayError::Internal)?;
    Ok(Json(json!({ "accounts": accounts })))
}

async fn admin_create_custom_api(State(state): State<AppState>, Json(req): Json<CreateCustomApiRequestAdmin>) -> Result<Json<Value>> {
    let format = CustomAccountFormat::parse(&req.format).ok_or_else(|| GatewayError::ValidationError {
        field: "format".to_string(),
        message: "must be one of: openai, claude".to_string(),
    })?;
    let id = state
        .store
        .create_custom_account(
            req.user_id,
            req.name.as_deref(),
            &req.api_base,
            &req.api_key,
            format,
            req.provider.as_deref(),
            req.model.as_deref(),
        )
        .await
        .map_err(|e| GatewayError::ValidationError {
            field: "api_base".to_string(),
            message: e.to_string(),
        })?;
    Ok(Json(json!({ "id": id })))
}

#[derive(Debug, Deserialize)]
struct CreateCustomApiRequestAdmin {
    user_id: i64,
    name: Option<String>,
    api_base: String,
    api_key: String,
    format: String,
    provider: Option<String>,
    model: Option<String>,
}

async fn admin_patch_custom_api(State(state): State<AppState>, Path(id): Path<i64>, Json(patch): Json<CustomAccountPatch>) -> Result<Json<Value>> {
    apply_custom_account_patch(&state.store, id, None, patch).await
}

async fn admin_put_custom_api(State(state): State<AppState>, Path(id): Path<i64>, Json(patch): Json<CustomAccountPatch>) -> Result<Json<Value>> {
    apply_custom_account_patch(&state.store, id, None, patch).await
}

async fn admin_delete_custom_api(State(state): State<AppState>, Path(id): Path<i64>) -> Result<Json<Value>> {
    let deleted = state.store.delete_custom_account(id, None).await.map_err(GatewayError::Internal)?;
    if !deleted {
        return Err(GatewayError::OwnershipError("custom api account not found".to_string()));
    }
    Ok(Json(json!({ "ok": true })))
}

async fn admin_set_custom_api_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<Value>> {
    let status = match req.status.as_str() {
        "active" => CustomAccountStatus::Active,
        "disabled" => CustomAccountStatus::Disabled,
        _ => {
            return Err(GatewayError::ValidationError {
                field: "status".to_string(),
                message: "must be one of: active, disabled".to_string(),
            })
        }
    };
    let matched = state
        .store
        .set_custom_account_status(id, None, status)
        .await
        .map_err(GatewayError::Internal)?;
    if !matched {
        return Err(GatewayError::OwnershipError("custom api account not found".to_string()));
    }
    Ok(Json(json!({ "ok": true })))
}

// ---------------------------------------------------------- kiro tokens

#[derive(Debug, Deserialize)]
struct CreateKiroTokenRequest {
    region: String,
    auth_type: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: String,
    visibility: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    anonymous: bool,
}

/// POST /user/api/kiro-tokens — registers a Kiro credential under the
/// caller's own user id.
async fn create_kiro_token_handler(
    State(state): State<AppState>,
    Extension(user): Extension<AuthedUser>,
    Json(req): Json<CreateKiroTokenRequest>,
) -> Result<Json<Value>> {
    if !crate::config::SUPPORTED_REGIONS.contains(&req.region.as_str()) {
        return Err(GatewayError::ValidationError {
            field: "region".to_string(),
            message: format!("must be one of: {:?}", crate::config::SUPPORTED_REGIONS),
        });
    }

    let auth_type = KiroAuthType::parse(&req.auth_type);
    let visibility = req.visibility.as_deref().map(Visibility::parse).unwrap_or(Visibility::Private);

    let id = state
        .store
        .create_kiro_token(
            user.user_id,
            &req.refresh_token,
            auth_type,
            req.client_id.as_deref(),
            req.client_secret.as_deref(),
            &req.region,
            visibility,
            false,
        )
        .await
        .map_err(|e| GatewayError::ValidationError {
            field: "kiro_token".to_string(),
            message: e.to_string(),
        })?;

    Ok(Json(json!({ "id": id })))
}
