//! Humanized failures of a chat request.

use thiserror::Error;

/// Failure of a single chat request, rendered to the user as
/// `Error: <message>`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChatError {
    /// HTTP 401 or 403.
    #[error("Invalid API key or insufficient permissions{}", detail(.0.as_deref()))]
    InvalidCredential(Option<String>),

    /// HTTP 429.
    #[error("Rate limited by the API, please wait a moment and retry{}", detail(.0.as_deref()))]
    UpstreamRateLimited(Option<String>),

    /// HTTP 5xx.
    #[error("The API server returned an error (HTTP {status}){}", detail(.message.as_deref()))]
    UpstreamServer {
        /// Response status.
        status: u16,
        /// `error.message` of the body, if any.
        message: Option<String>,
    },

    /// Any other non-2xx status.
    #[error("Request failed with HTTP {status}{}", detail(.message.as_deref()))]
    Status {
        /// Response status.
        status: u16,
        /// `error.message` of the body, if any.
        message: Option<String>,
    },

    /// DNS, connection or body read failure.
    #[error("Could not reach the API: {0}")]
    Connectivity(String),

    /// The request deadline passed.
    #[error("No response within {seconds} seconds")]
    Timeout {
        /// Length of the deadline.
        seconds: u64,
    },

    /// Cancelled by the user or by shutdown.
    #[error("Request cancelled")]
    Aborted,

    /// The request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

fn detail(message: Option<&str>) -> String {
    message
        .filter(|message| !message.trim().is_empty())
        .map(|message| format!(": {message}"))
        .unwrap_or_default()
}

impl ChatError {
    /// Maps a non-success HTTP status to the humanized variant.
    #[must_use]
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        match status {
            401 | 403 => Self::InvalidCredential(message),
            429 => Self::UpstreamRateLimited(message),
            500..=599 => Self::UpstreamServer { status, message },
            _ => Self::Status { status, message },
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Connectivity("the connection timed out".to_string())
        } else if err.is_builder() {
            Self::InvalidRequest(err.to_string())
        } else {
            Self::Connectivity(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_humanized_variants() {
        assert_eq!(
            ChatError::from_status(401, None),
            ChatError::InvalidCredential(None)
        );
        assert_eq!(
            ChatError::from_status(403, None),
            ChatError::InvalidCredential(None)
        );
        assert_eq!(
            ChatError::from_status(429, None),
            ChatError::UpstreamRateLimited(None)
        );
        assert!(matches!(
            ChatError::from_status(502, None),
            ChatError::UpstreamServer { status: 502, .. }
        ));
        assert!(matches!(
            ChatError::from_status(404, None),
            ChatError::Status { status: 404, .. }
        ));
    }

    #[test]
    fn upstream_message_is_appended() {
        let err = ChatError::from_status(401, Some("Incorrect API key provided".into()));
        assert_eq!(
            err.to_string(),
            "Invalid API key or insufficient permissions: Incorrect API key provided"
        );

        let err = ChatError::from_status(500, Some("   ".into()));
        assert_eq!(
            err.to_string(),
            "The API server returned an error (HTTP 500)"
        );
    }

    #[test]
    fn timeout_names_the_deadline() {
        let err = ChatError::Timeout { seconds: 120 };
        assert_eq!(err.to_string(), "No response within 120 seconds");
    }
}
