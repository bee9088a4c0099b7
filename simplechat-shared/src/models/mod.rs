//! Types exchanged with OpenAI-compatible APIs and the proxy server.

pub mod chat;
pub mod config;
pub mod errors;

pub use chat::{
    ChatCompletionChunk, ChatCompletionRequest, ChatDelta, ChatDeltaChoice, ChatMessage,
    MessageRole, UsageBreakdown,
};
pub use config::{ClientConfigResponse, DefaultsResponse};
pub use errors::{ErrorBody, ErrorResponse};
