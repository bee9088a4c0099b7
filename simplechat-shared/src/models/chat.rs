//! Chat completion wire types.

use serde::{Deserialize, Serialize};

/// Author of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Instructions, and locally logged errors.
    System,
    /// The person chatting.
    User,
    /// The model.
    Assistant,
}

impl MessageRole {
    /// Wire name of the role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl TryFrom<&str> for MessageRole {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err("invalid message role"),
        }
    }
}

/// A single `{role, content}` entry of an outbound completion request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    /// Who wrote it.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message.
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Request body for `/chat/completions`, sent both upstream and to the proxy.
///
/// The proxy accepts partially filled bodies and substitutes its own defaults
/// for the missing fields, hence the options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionRequest {
    /// Model to run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// System prompt, history window and the new user message.
    pub messages: Vec<ChatMessage>,
    /// Completion length cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Whether the reply is streamed as SSE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// One decoded `data:` frame of a streaming completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatCompletionChunk {
    /// Deltas; only the first one is read.
    #[serde(default)]
    pub choices: Vec<ChatDeltaChoice>,
    /// Inline usage, usually on the last frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageBreakdown>,
}

impl ChatCompletionChunk {
    /// Content delta carried by the first choice, if any.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
    }

    /// Finish reason carried by the first choice, if any.
    #[must_use]
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.finish_reason.as_deref())
    }
}

/// One entry of `choices` in a streamed frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatDeltaChoice {
    /// Position of the choice.
    #[serde(default)]
    pub index: u32,
    /// Incremental message content.
    #[serde(default)]
    pub delta: ChatDelta,
    /// Why generation stopped, on the final frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// The `delta` object of a streamed choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatDelta {
    /// Role, sent on the first frame only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Text appended to the reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Token accounting for one request, as reported inline by the API or
/// reconstructed from metric snapshots.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageBreakdown {
    /// Tokens in the request.
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Tokens generated.
    #[serde(default)]
    pub completion_tokens: u64,
    /// Both together, as reported.
    #[serde(default)]
    pub total_tokens: u64,
}

impl UsageBreakdown {
    /// Creates a breakdown from the three counts.
    #[must_use]
    pub const fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}
