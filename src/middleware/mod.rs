// Authentication, CORS, and debug logging middleware

pub mod debug;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use tower_http::cors::{Any, CorsLayer};

use crate::error::GatewayError;
use crate::routes::{AppState, AuthedUser};

pub use debug::debug_middleware;
pub use debug::DEBUG_LOGGER;

/// Authentication middleware
///
/// Resolves the caller's account from the API key in the `Authorization`
/// header (`Bearer sk-...`) or the `x-api-key` header, and attaches
/// [`AuthedUser`] to the request for downstream handlers. Each user has
/// their own key, unlike the single shared proxy key this replaced.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, GatewayError> {
    let api_key = extract_api_key(&request);

    let Some(api_key) = api_key else {
        tracing::warn!(
            path = request.uri().path(),
            method = %request.method(),
            "auth: missing API key"
        );
        return Err(GatewayError::AuthError("missing API key".to_string()));
    };

    let user = state
        .store
        .get_user_by_api_key(&api_key)
        .await
        .map_err(GatewayError::Internal)?;

    let Some(user) = user else {
        tracing::warn!(
            path = request.uri().path(),
            method = %request.method(),
            "auth: unknown API key"
        );
        return Err(GatewayError::AuthError("invalid API key".to_string()));
    };

    request
        .extensions_mut()
        .insert(AuthedUser { user_id: user.id });

    Ok(next.run(request).await)
}

fn extract_api_key(request: &Request<Body>) -> Option<String> {
    if let Some(value) = request.headers().get("authorization") {
        if let Ok(s) = value.to_str() {
            if let Some(token) = s.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    if let Some(value) = request.headers().get("x-api-key") {
        if let Ok(s) = value.to_str() {
            return Some(s.to_string());
        }
    }
    None
}

/// Create CORS middleware layer
///
/// Configures CORS to allow all origins, methods, and headers.
/// Handles OPTIONS preflight requests automatically.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}
