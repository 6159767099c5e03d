// Error handling module
// Defines error types and HTTP response conversion

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the identity service
///
/// `Clone` because one refresh outcome is handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdentityError {
    /// There is no session to refresh
    #[error("No active session")]
    NoSession,

    /// The identity service refused the credential
    #[error("Identity service rejected the request: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// The refresh call did not finish in time
    #[error("Identity service did not respond within {0:?}")]
    Timeout(Duration),

    /// The identity service could not be reached
    #[error("Identity service unreachable: {0}")]
    Transport(String),

    /// The identity service answered with something unusable
    #[error("Invalid identity service response: {0}")]
    InvalidResponse(String),

    /// The refresh operation ended without publishing a result
    #[error("Refresh operation ended without a result")]
    Abandoned,
}

/// API errors that can occur during request processing
#[derive(Error, Debug)]
pub enum ApiError {
    /// The session ended and could not be recovered
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Login failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// The resource API answered with a non-success status
    #[error("Upstream API error: {status} - {message}")]
    UpstreamError {
        status: u16,
        message: String,
        /// Media type of `message` as sent by the resource API
        content_type: Option<String>,
    },

    /// The resource API could not be reached
    #[error("Transport error ({kind}): {message}")]
    Transport { kind: &'static str, message: String },

    /// Request validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        ApiError::SessionExpired(err.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Transport {
            kind: transport_error_kind(&err),
            message: err.to_string(),
        }
    }
}

/// Categorize a transport error for logs and responses
pub fn transport_error_kind(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connection_failed"
    } else if err.is_request() {
        "request_error"
    } else if err.is_body() {
        "body_error"
    } else if err.is_decode() {
        "decode_error"
    } else {
        "unknown"
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::SessionExpired(msg) => (StatusCode::UNAUTHORIZED, "session_expired", msg),
            ApiError::AuthError(msg) => (StatusCode::UNAUTHORIZED, "auth_error", msg),
            ApiError::UpstreamError { status, message, .. } => {
                let status_code =
                    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status_code, "upstream_error", message)
            }
            ApiError::Transport { kind, message } => {
                let status_code = if kind == "timeout" {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                };
                (status_code, "transport_error", message)
            }
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::Internal(err) => {
                // Log internal errors
                tracing::error!("Internal error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error".to_string(),
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

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ApiError::SessionExpired("No active session".to_string());
        assert_eq!(err.to_string(), "Session expired: No active session");

        let err = ApiError::UpstreamError {
            status: 404,
            message: "No such investor".to_string(),
            content_type: None,
        };
        assert_eq!(err.to_string(), "Upstream API error: 404 - No such investor");

        let err = ApiError::Transport {
            kind: "timeout",
            message: "operation timed out".to_string(),
        };
        assert_eq!(err.to_string(), "Transport error (timeout): operation timed out");
    }

    #[test]
    fn test_identity_error_becomes_session_expired() {
        let err = ApiError::from(IdentityError::Timeout(Duration::from_secs(10)));
        assert!(matches!(err, ApiError::SessionExpired(ref msg) if msg.contains("10s")));

        let err = ApiError::from(IdentityError::Rejected {
            status: 400,
            message: "invalid_grant".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Session expired: Identity service rejected the request: 400 - invalid_grant"
        );
    }

    #[tokio::test]
    async fn test_error_response_conversion() {
        let response = ApiError::SessionExpired("gone".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = ApiError::AuthError("bad password".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = ApiError::ValidationError("bad path".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::Internal(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_upstream_error_keeps_status() {
        for status in [400, 403, 404, 500, 503] {
            let response = ApiError::UpstreamError {
                status,
                message: "upstream".to_string(),
                content_type: None,
            }
            .into_response();
            assert_eq!(response.status().as_u16(), status);
        }

        // Out-of-range status falls back to 500
        let response = ApiError::UpstreamError {
            status: 1000,
            message: "upstream".to_string(),
            content_type: None,
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_transport_error_response() {
        let response = ApiError::Transport {
            kind: "timeout",
            message: "slow".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let response = ApiError::Transport {
            kind: "connection_failed",
            message: "refused".to_string(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
