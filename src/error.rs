// Error handling module
// Defines the gateway's error taxonomy and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Classification of an auth-refresh failure, used by the allocator and
/// health checker to decide whether to retry, flip a token to `invalid`, or
/// leave it alone.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureKind {
    #[error("expired")]
    Expired,
    #[error("invalid")]
    Invalid,
    #[error("transient")]
    Transient,
}

/// Errors that can occur during request processing.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Fatal at startup: missing/invalid configuration.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Authentication with a stored API key failed (missing/invalid header).
    #[error("authentication failed: {0}")]
    AuthError(String),

    /// A credential's refresh attempt failed.
    #[error("auth refresh failed ({classification:?}): {message}")]
    RefreshFailed {
        classification: AuthFailureKind,
        message: String,
    },

    /// Non-2xx response from an upstream provider.
    #[error("upstream error: {http_status} - {message}")]
    UpstreamError { http_status: u16, message: String },

    /// The allocator found no usable credential for this user.
    #[error("no credential available for this user")]
    NoCredentialAvailable,

    /// No byte arrived from upstream within the first-token deadline.
    #[error("first token timeout")]
    FirstTokenTimeout,

    /// Too many consecutive inter-frame read timeouts.
    #[error("stream read timeout")]
    StreamReadTimeout,

    /// Request body failed validation.
    #[error("validation error on field '{field}': {message}")]
    ValidationError { field: String, message: String },

    /// Caller does not own the referenced resource.
    #[error("ownership error: {0}")]
    OwnershipError(String),

    /// Invalid model name supplied by the client.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Anything else; logged in full, never echoed verbatim to the client.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            GatewayError::ConfigError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg)
            }
            GatewayError::AuthError(msg) => (StatusCode::UNAUTHORIZED, "auth_error", msg),
            GatewayError::RefreshFailed {
                classification,
                message,
            } => {
                let status = match classification {
                    AuthFailureKind::Expired | AuthFailureKind::Invalid => StatusCode::UNAUTHORIZED,
                    AuthFailureKind::Transient => StatusCode::BAD_GATEWAY,
                };
                (status, "auth_refresh_failed", message)
            }
            GatewayError::UpstreamError {
                http_status,
                message,
            } => {
                let status =
                    StatusCode::from_u16(http_status).unwrap_or(StatusCode::BAD_GATEWAY);
                (status, "upstream_error", message)
            }
            GatewayError::NoCredentialAvailable => (
                StatusCode::FORBIDDEN,
                "no_credential_available",
                "no credential available for this user".to_string(),
            ),
            GatewayError::FirstTokenTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "first_token_timeout",
                "upstream did not respond in time".to_string(),
            ),
            GatewayError::StreamReadTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "stream_read_timeout",
                "upstream stream stalled".to_string(),
            ),
            GatewayError::ValidationError { field, message } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_error",
                format!("{field}: {message}"),
            ),
            GatewayError::OwnershipError(msg) => (StatusCode::NOT_FOUND, "ownership_error", msg),
            GatewayError::InvalidModel(msg) => (StatusCode::BAD_REQUEST, "invalid_model", msg),
            GatewayError::Internal(err) => {
                tracing::error!("internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
            }
        }));

        (status, body).into_response()
    }
}

/// Renders a `GatewayError` as an Anthropic-shaped SSE error event followed
/// by `message_stop`, for mid-stream failures where headers are already sent.
pub fn to_sse_error_event(err: &GatewayError) -> String {
    let (error_type, message) = match err {
        GatewayError::NoCredentialAvailable => {
            ("no_credential_available", err.to_string())
        }
        GatewayError::UpstreamError { .. } => ("upstream_error", err.to_string()),
        GatewayError::RefreshFailed { .. } => ("auth_refresh_failed", err.to_string()),
        GatewayError::FirstTokenTimeout => ("first_token_timeout", err.to_string()),
        GatewayError::StreamReadTimeout => ("stream_read_timeout", err.to_string()),
        _ => ("internal_error", "internal server error".to_string()),
    };

    let error_event = json!({
        "type": "error",
        "error": { "type": error_type, "message": message }
    });

    format!(
        "event: error\ndata: {}\n\nevent: message_stop\ndata: {{\"type\":\"message_stop\"}}\n\n",
        error_event
    )
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        let err = GatewayError::AuthError("invalid token".to_string());
        assert_eq!(err.to_string(), "authentication failed: invalid token");

        let err = GatewayError::InvalidModel("gpt-4".to_string());
        assert_eq!(err.to_string(), "invalid model: gpt-4");

        let err = GatewayError::UpstreamError {
            http_status: 429,
            message: "rate limit exceeded".to_string(),
        };
        assert_eq!(err.to_string(), "upstream error: 429 - rate limit exceeded");
    }

    #[tokio::test]
    async fn status_codes_match_classification() {
        assert_eq!(
            GatewayError::NoCredentialAvailable.into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            GatewayError::ValidationError {
                field: "api_base".to_string(),
                message: "must be http(s)".to_string()
            }
            .into_response()
            .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            GatewayError::AuthError("missing api key".to_string())
                .into_response()
                .status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::UpstreamError {
                http_status: 502,
                message: "bad gateway".to_string()
            }
            .into_response()
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::RefreshFailed {
                classification: AuthFailureKind::Transient,
                message: "timeout".to_string()
            }
            .into_response()
            .status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::RefreshFailed {
                classification: AuthFailureKind::Expired,
                message: "401".to_string()
            }
            .into_response()
            .status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn sse_error_event_is_well_formed() {
        let rendered = to_sse_error_event(&GatewayError::NoCredentialAvailable);
        assert!(rendered.starts_with("event: error\n"));
        assert!(rendered.contains("event: message_stop"));
        assert!(rendered.ends_with("\n\n"));
    }
}
