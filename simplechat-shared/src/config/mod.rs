//! # Configuration
//!
//! Server-side configuration ([`server`]), the persisted client settings
//! ([`client`]) and the URL rules both sides use to reach an
//! OpenAI-compatible API ([`endpoints`]).

pub mod client;
pub mod endpoints;
pub mod server;

/// Base URL used when neither the server nor the user configured one.
pub const DEFAULT_API_URL: &str = "https://api.openai.com/v1";
/// Model requested when neither the server nor the user configured one.
pub const DEFAULT_MODEL_NAME: &str = "gpt-3.5-turbo";
/// System prompt used until one is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
