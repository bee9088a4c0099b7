//! Error bodies in the OpenAI format.

use serde::{Deserialize, Serialize};

/// OpenAI-style error envelope: `{"error": {"message": "..."}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// The nested error object.
    pub error: ErrorBody,
}

/// The `error` object of an [`ErrorResponse`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Human-readable description.
    pub message: String,
}

impl ErrorResponse {
    /// Wraps `message` in the envelope.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                message: message.into(),
            },
        }
    }

    /// Extracts `error.message` from an arbitrary JSON error body.
    #[must_use]
    pub fn message_from_value(value: &serde_json::Value) -> Option<String> {
        value
            .get("error")
            .and_then(|error| error.get("message"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
    }
}
