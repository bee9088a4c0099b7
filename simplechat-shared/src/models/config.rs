//! Public configuration views served by the proxy.

use serde::{Deserialize, Serialize};

/// Payload of `GET /api/config`. Never carries the API key itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfigResponse {
    /// Upstream base URL.
    pub api_url: String,
    /// Default model.
    pub model_name: String,
    /// Whether the proxy holds a credential.
    pub has_api_key: bool,
}

/// Payload of `GET /api/defaults`, used to reset client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DefaultsResponse {
    /// Upstream base URL.
    pub api_url: String,
    /// Default model.
    pub model_name: String,
    /// Default system prompt.
    pub system_prompt: String,
    /// Whether the proxy holds a credential.
    pub has_api_key: bool,
}
