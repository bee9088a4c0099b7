use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::Value;
use shared::models::ErrorResponse;
use thiserror::Error;
use tracing::error;

/// Result of a proxy handler.
pub type AppResult<T> = Result<T, ApiError>;

/// Error returned by the proxy handlers.
///
/// Rendered as `{"error": {"message": ...}}`, except for upstream failures,
/// whose JSON body is relayed unchanged.
#[derive(Debug, Error)]
#[error("{status}: {message}")]
pub struct ApiError {
    status: StatusCode,
    message: String,
    upstream_body: Option<Value>,
}

impl ApiError {
    /// Error with the given status and message.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            upstream_body: None,
        }
    }

    /// `400 Bad Request` with the given message.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// The proxy has no upstream credential configured.
    #[must_use]
    pub fn missing_api_key() -> Self {
        Self::bad_request("API key not configured")
    }

    /// Generic `500`, used when the upstream cannot be reached.
    #[must_use]
    pub fn internal_server_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }

    /// Relays a non-success upstream answer with its own status and body.
    #[must_use]
    pub fn upstream(status: StatusCode, body: Value) -> Self {
        let message = ErrorResponse::message_from_value(&body)
            .unwrap_or_else(|| format!("upstream returned {status}"));
        Self {
            status,
            message,
            upstream_body: Some(body),
        }
    }

    /// HTTP status the error renders with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.upstream_body {
            Some(body) => (self.status, Json(body)).into_response(),
            None => (self.status, Json(ErrorResponse::new(self.message))).into_response(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        error!(error = %err, "upstream request failed");
        Self::internal_server_error()
    }
}
