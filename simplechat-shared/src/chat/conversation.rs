//! # Conversation state machine
//!
//! A send runs `Idle → Validating → Streaming → Finalizing → Idle`. Failures
//! pass through `Error` on their way back to `Idle`. At most one send is in
//! flight; the message log is append-only and is written only by these
//! transitions.

use crate::chat::{
    errors::ChatError,
    metrics::MetricsSnapshot,
    stream::StreamOutcome,
    think::{ThinkSplit, ThinkTracker},
    usage::{UsageDelta, UsageReconciler, tokens_per_second},
};
use crate::config::client::{CredentialMode, Settings};
use crate::models::{ChatCompletionRequest, ChatMessage, MessageRole, UsageBreakdown};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Longest accepted input, in characters after trimming.
pub const MAX_MESSAGE_CHARS: usize = 4000;
/// Prior non-system messages replayed with every request.
pub const HISTORY_WINDOW: usize = 10;
/// Minimum gap between two accepted sends.
pub const MIN_SEND_INTERVAL: Duration = Duration::from_secs(1);
/// `max_tokens` of every outbound request.
pub const MAX_TOKENS: u32 = 1000;
/// `temperature` of every outbound request.
pub const TEMPERATURE: f32 = 0.7;
/// Committed when a stream ends without any answer text.
pub const EMPTY_RESPONSE: &str = "No response received";

/// Where a send currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Nothing in flight.
    Idle,
    /// Input is being checked.
    Validating,
    /// Tokens are arriving.
    Streaming,
    /// The stream ended; usage is being resolved.
    Finalizing,
    /// A failure is being logged.
    Error,
}

/// Why a send was refused. Rejections change nothing but the status line.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SendRejection {
    /// Blank input.
    #[error("Type a message first")]
    Empty,

    /// A reply is still streaming.
    #[error("Still waiting for the previous response")]
    AlreadyLoading,

    /// Less than [`MIN_SEND_INTERVAL`] since the last accepted send.
    #[error("Please wait a moment before sending another message")]
    RateLimited,

    /// Over [`MAX_MESSAGE_CHARS`].
    #[error("Message is too long ({length}/{max} characters)")]
    TooLong {
        /// Characters in the input.
        length: usize,
        /// The cap.
        max: usize,
    },

    /// Neither a local key nor the server proxy is available.
    #[error("Please configure API key in settings")]
    MissingCredential,
}

/// The status line shown under the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Idle with a local key.
    Ready,
    /// Idle, requests go through the proxy.
    ReadyServerConfig,
    /// Idle without any credential.
    MissingCredential,
    /// A request is in flight.
    Thinking,
    /// The last request failed.
    ErrorOccurred,
    /// The log was just cleared.
    Cleared,
    /// Settings were just saved.
    SettingsSaved,
    /// A send was refused.
    Rejected(SendRejection),
}

impl Status {
    /// The idle status matching the configured credential.
    #[must_use]
    pub fn ready_for(settings: &Settings) -> Self {
        match settings.credential_mode() {
            CredentialMode::ServerProxy => Self::ReadyServerConfig,
            CredentialMode::Direct => Self::Ready,
            CredentialMode::Missing => Self::MissingCredential,
        }
    }

    /// Whether the status should be shown as an error.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(
            self,
            Self::MissingCredential | Self::ErrorOccurred | Self::Rejected(_)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("Ready"),
            Self::ReadyServerConfig => f.write_str("Ready (using server config)"),
            Self::MissingCredential => f.write_str("Please configure API key in settings"),
            Self::Thinking => f.write_str("Thinking..."),
            Self::ErrorOccurred => f.write_str("Error occurred"),
            Self::Cleared => f.write_str("Chat cleared"),
            Self::SettingsSaved => f.write_str("Settings saved!"),
            Self::Rejected(rejection) => write!(f, "{rejection}"),
        }
    }
}

/// A committed log entry. Never modified once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique id; an assistant reply keeps its placeholder's id.
    pub id: Uuid,
    /// Author.
    pub role: MessageRole,
    /// Visible text.
    pub content: String,
    /// When the entry was appended.
    pub created_at: DateTime<Utc>,
    /// Usage of the request that produced a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageBreakdown>,
    /// Generation speed of a reply, zero otherwise.
    #[serde(default)]
    pub tokens_per_second: u64,
    /// Server metrics scraped right after a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
    /// Closed think spans of a reply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning: Vec<String>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            usage: None,
            tokens_per_second: 0,
            metrics: None,
            reasoning: Vec::new(),
        }
    }
}

/// The assistant reply while it is still streaming.
#[derive(Debug, Clone)]
pub struct StreamingPlaceholder {
    id: Uuid,
    tracker: ThinkTracker,
    split: ThinkSplit,
    chunk_count: u64,
    started_at: Instant,
}

impl StreamingPlaceholder {
    fn new(started_at: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracker: ThinkTracker::new(),
            split: ThinkSplit::default(),
            chunk_count: 0,
            started_at,
        }
    }

    /// Id the committed reply will carry.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Every token received so far, markers included.
    #[must_use]
    pub fn raw(&self) -> &str {
        self.tracker.raw()
    }

    /// Current reasoning/visible split of [`raw`](Self::raw).
    #[must_use]
    pub const fn split(&self) -> &ThinkSplit {
        &self.split
    }

    /// Number of tokens received.
    #[must_use]
    pub const fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    fn push(&mut self, token: &str) {
        self.split = self.tracker.push(token);
        self.chunk_count += 1;
    }

    fn committed_content(&self) -> String {
        if !self.split.visible.is_empty() {
            return self.split.visible.clone();
        }
        let raw = self.raw().trim();
        if self.split.segments.is_empty() && !raw.is_empty() {
            raw.to_string()
        } else {
            EMPTY_RESPONSE.to_string()
        }
    }
}

/// Token counts summed over the conversation; reset only by `clear`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    /// Sum of prompt tokens.
    pub prompt_tokens: u64,
    /// Sum of completion tokens.
    pub completion_tokens: u64,
    /// Sum of total tokens.
    pub total_tokens: u64,
}

impl UsageTotals {
    /// Adds one request's usage, saturating.
    pub fn add(&mut self, usage: &UsageBreakdown) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(usage.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(usage.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(usage.total_tokens);
    }
}

/// The message log and the state of the request in flight.
#[derive(Debug)]
pub struct Conversation {
    state: ConversationState,
    messages: Vec<Message>,
    placeholder: Option<StreamingPlaceholder>,
    totals: UsageTotals,
    last_accepted: Option<Instant>,
    last_metrics: Option<MetricsSnapshot>,
    status: Status,
    ready_status: Status,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(Status::Ready)
    }
}

impl Conversation {
    /// An empty conversation showing `status`.
    #[must_use]
    pub const fn new(status: Status) -> Self {
        Self {
            state: ConversationState::Idle,
            messages: Vec::new(),
            placeholder: None,
            totals: UsageTotals {
                prompt_tokens: 0,
                completion_tokens: 0,
                total_tokens: 0,
            },
            last_accepted: None,
            last_metrics: None,
            status,
            ready_status: status,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConversationState {
        self.state
    }

    /// The committed log, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The reply being streamed, if any.
    #[must_use]
    pub const fn placeholder(&self) -> Option<&StreamingPlaceholder> {
        self.placeholder.as_ref()
    }

    /// Usage summed since the last clear.
    #[must_use]
    pub const fn totals(&self) -> &UsageTotals {
        &self.totals
    }

    /// Snapshot taken after the most recent successful request.
    #[must_use]
    pub const fn last_metrics(&self) -> Option<&MetricsSnapshot> {
        self.last_metrics.as_ref()
    }

    /// Text for the status line.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.status
    }

    /// Whether a request is streaming or finalizing.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(
            self.state,
            ConversationState::Streaming | ConversationState::Finalizing
        )
    }

    /// Sets the status line outside of a send, e.g. after a settings change.
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
        if !status.is_error() && !matches!(status, Status::Thinking) {
            self.ready_status = status;
        }
    }

    /// Validates `input` and, when accepted, opens the placeholder and
    /// returns the request to send.
    ///
    /// # Errors
    /// Returns the [`SendRejection`] when validation fails; in that case
    /// only the status line changes.
    pub fn begin(
        &mut self,
        input: &str,
        settings: &Settings,
        now: Instant,
    ) -> Result<ChatCompletionRequest, SendRejection> {
        if self.state != ConversationState::Idle {
            return Err(self.reject(SendRejection::AlreadyLoading));
        }

        self.transition(ConversationState::Validating);
        if let Err(rejection) = self.validate(input, settings, now) {
            self.transition(ConversationState::Idle);
            return Err(self.reject(rejection));
        }

        let content = input.trim();
        let history = self
            .messages
            .iter()
            .filter(|message| message.role != MessageRole::System)
            .map(|message| ChatMessage::new(message.role, message.content.clone()))
            .collect::<Vec<_>>();
        let skip = history.len().saturating_sub(HISTORY_WINDOW);

        let mut outbound = Vec::with_capacity(HISTORY_WINDOW + 2);
        outbound.push(ChatMessage::new(
            MessageRole::System,
            settings.system_prompt.clone(),
        ));
        outbound.extend(history.into_iter().skip(skip));
        outbound.push(ChatMessage::new(MessageRole::User, content));

        self.messages.push(Message::new(MessageRole::User, content));
        self.placeholder = Some(StreamingPlaceholder::new(now));
        self.last_accepted = Some(now);
        self.ready_status = Status::ready_for(settings);
        self.status = Status::Thinking;
        self.transition(ConversationState::Streaming);

        Ok(ChatCompletionRequest {
            model: Some(settings.model_name.clone()),
            messages: outbound,
            max_tokens: Some(MAX_TOKENS),
            temperature: Some(TEMPERATURE),
            stream: Some(true),
        })
    }

    fn validate(&self, input: &str, settings: &Settings, now: Instant) -> Result<(), SendRejection> {
        let content = input.trim();
        if content.is_empty() {
            return Err(SendRejection::Empty);
        }
        if self
            .last_accepted
            .is_some_and(|last| now.saturating_duration_since(last) < MIN_SEND_INTERVAL)
        {
            return Err(SendRejection::RateLimited);
        }
        let length = content.chars().count();
        if length > MAX_MESSAGE_CHARS {
            return Err(SendRejection::TooLong {
                length,
                max: MAX_MESSAGE_CHARS,
            });
        }
        if settings.credential_mode() == CredentialMode::Missing {
            return Err(SendRejection::MissingCredential);
        }
        Ok(())
    }

    fn reject(&mut self, rejection: SendRejection) -> SendRejection {
        debug!(%rejection, "send rejected");
        self.status = match rejection {
            SendRejection::MissingCredential => Status::MissingCredential,
            other => Status::Rejected(other),
        };
        rejection
    }

    /// Feeds one content token into the placeholder and returns the updated
    /// split for rendering.
    pub fn apply_token(&mut self, token: &str) -> Option<&StreamingPlaceholder> {
        if self.state != ConversationState::Streaming {
            warn!(state = ?self.state, "token received outside of streaming");
            return None;
        }
        let placeholder = self.placeholder.as_mut()?;
        placeholder.push(token);
        Some(placeholder)
    }

    /// Marks the stream as ended; no more tokens are accepted.
    pub fn mark_finalizing(&mut self) {
        if self.state == ConversationState::Streaming {
            self.transition(ConversationState::Finalizing);
        }
    }

    /// Commits the placeholder as the assistant message.
    ///
    /// Usage comes from the stream when it reported any, otherwise from the
    /// snapshot delta; totals and tokens/s follow from it. `finished` is when
    /// the stream ended and closes the tokens/s window.
    pub fn finalize(
        &mut self,
        outcome: &StreamOutcome,
        metrics: Option<MetricsSnapshot>,
        reconciler: &mut UsageReconciler,
        finished: Instant,
    ) -> Option<&Message> {
        if !self.is_loading() {
            warn!(state = ?self.state, "finalize called without a request in flight");
            return None;
        }
        self.mark_finalizing();
        let placeholder = self.placeholder.take()?;

        let usage: Option<UsageDelta> = reconciler.reconcile(outcome.usage.as_ref(), metrics.as_ref());
        let elapsed = finished.saturating_duration_since(placeholder.started_at);
        let completion_tokens = usage.map_or(0, |usage| usage.completion_tokens);
        let speed = tokens_per_second(completion_tokens, placeholder.chunk_count, elapsed);

        if let Some(usage) = &usage {
            self.totals.add(usage);
        }
        if metrics.is_some() {
            self.last_metrics = metrics;
        }

        let mut message = Message::new(MessageRole::Assistant, placeholder.committed_content());
        message.id = placeholder.id;
        message.usage = usage;
        message.tokens_per_second = speed;
        message.metrics = metrics;
        message.reasoning = placeholder.split.segments;

        info!(
            tokens = placeholder.chunk_count,
            tokens_per_second = speed,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "response committed"
        );

        self.messages.push(message);
        self.status = self.ready_status;
        self.transition(ConversationState::Idle);
        self.messages.last()
    }

    /// Discards the placeholder and logs `Error: <reason>` as a system message.
    pub fn fail(&mut self, error: &ChatError) {
        if !self.is_loading() {
            warn!(state = ?self.state, %error, "failure reported without a request in flight");
            return;
        }

        self.placeholder = None;
        self.transition(ConversationState::Error);
        warn!(%error, "request failed");
        self.messages
            .push(Message::new(MessageRole::System, format!("Error: {error}")));
        self.status = Status::ErrorOccurred;
        self.transition(ConversationState::Idle);
    }

    /// Empties the log and the running totals.
    ///
    /// # Errors
    /// Returns [`SendRejection::AlreadyLoading`] while a request is in flight.
    pub fn clear(&mut self) -> Result<(), SendRejection> {
        if self.is_loading() {
            return Err(self.reject(SendRejection::AlreadyLoading));
        }
        self.messages.clear();
        self.totals = UsageTotals::default();
        self.last_metrics = None;
        self.status = Status::Cleared;
        Ok(())
    }

    /// Content of the `nth` most recent user message, `1` being the latest.
    #[must_use]
    pub fn user_message(&self, nth: usize) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|message| message.role == MessageRole::User)
            .nth(nth.checked_sub(1)?)
            .map(|message| message.content.as_str())
    }

    fn transition(&mut self, to: ConversationState) {
        debug!(from = ?self.state, ?to, "conversation transition");
        self.state = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_settings() -> Settings {
        Settings {
            api_key: "sk-test".into(),
            ..Settings::default()
        }
    }

    fn send(conversation: &mut Conversation, input: &str, at: Instant) -> ChatCompletionRequest {
        conversation.begin(input, &direct_settings(), at).unwrap()
    }

    fn complete(conversation: &mut Conversation, tokens: &[&str], at: Instant) {
        for token in tokens {
            conversation.apply_token(token);
        }
        let outcome = StreamOutcome {
            usage: Some(UsageBreakdown::new(3, 2, 5)),
            finish_reason: Some("stop".into()),
            token_count: tokens.len() as u64,
        };
        let mut reconciler = UsageReconciler::default();
        conversation.finalize(&outcome, None, &mut reconciler, at);
    }

    #[test]
    fn accepted_send_builds_request_and_opens_placeholder() {
        let mut conversation = Conversation::default();
        let request = send(&mut conversation, "  hello  ", Instant::now());

        assert_eq!(conversation.state(), ConversationState::Streaming);
        assert_eq!(conversation.status(), Status::Thinking);
        assert!(conversation.placeholder().is_some());
        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.messages()[0].content, "hello");

        assert_eq!(request.model.as_deref(), Some("gpt-3.5-turbo"));
        assert_eq!(request.max_tokens, Some(MAX_TOKENS));
        assert_eq!(request.stream, Some(true));
        assert_eq!(
            request.messages,
            vec![
                ChatMessage::new(MessageRole::System, "You are a helpful assistant."),
                ChatMessage::new(MessageRole::User, "hello"),
            ]
        );
    }

    #[test]
    fn second_send_while_streaming_is_rejected() {
        let mut conversation = Conversation::default();
        let start = Instant::now();
        send(&mut conversation, "first", start);
        let placeholder_id = conversation.placeholder().map(StreamingPlaceholder::id);

        let result = conversation.begin("second", &direct_settings(), start + Duration::from_secs(5));

        assert_eq!(result, Err(SendRejection::AlreadyLoading));
        assert_eq!(conversation.messages().len(), 1);
        assert_eq!(conversation.placeholder().map(StreamingPlaceholder::id), placeholder_id);
        assert_eq!(conversation.state(), ConversationState::Streaming);
    }

    #[test]
    fn validation_rejections_have_no_side_effects() {
        let mut conversation = Conversation::default();
        let now = Instant::now();

        assert_eq!(
            conversation.begin("   ", &direct_settings(), now),
            Err(SendRejection::Empty)
        );
        assert_eq!(
            conversation.begin("hi", &Settings::default(), now),
            Err(SendRejection::MissingCredential)
        );
        assert_eq!(conversation.status(), Status::MissingCredential);

        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert_eq!(
            conversation.begin(&long, &direct_settings(), now),
            Err(SendRejection::TooLong {
                length: MAX_MESSAGE_CHARS + 1,
                max: MAX_MESSAGE_CHARS
            })
        );

        assert!(conversation.messages().is_empty());
        assert!(conversation.placeholder().is_none());
        assert_eq!(conversation.state(), ConversationState::Idle);
    }

    #[test]
    fn message_at_the_cap_is_accepted() {
        let mut conversation = Conversation::default();
        let exact = "é".repeat(MAX_MESSAGE_CHARS);
        assert!(conversation.begin(&exact, &direct_settings(), Instant::now()).is_ok());
    }

    #[test]
    fn sends_are_limited_to_one_per_second() {
        let mut conversation = Conversation::default();
        let start = Instant::now();
        send(&mut conversation, "one", start);
        complete(&mut conversation, &["ok"], start + Duration::from_millis(200));

        let early = conversation.begin("two", &direct_settings(), start + Duration::from_millis(500));
        assert_eq!(early, Err(SendRejection::RateLimited));
        assert_eq!(
            conversation.status().to_string(),
            "Please wait a moment before sending another message"
        );

        assert!(
            conversation
                .begin("two", &direct_settings(), start + MIN_SEND_INTERVAL)
                .is_ok()
        );
    }

    #[test]
    fn history_keeps_the_last_ten_non_system_messages() {
        let mut conversation = Conversation::default();
        let mut at = Instant::now();
        for turn in 0..7 {
            send(&mut conversation, &format!("question {turn}"), at);
            complete(&mut conversation, &["answer"], at);
            at += MIN_SEND_INTERVAL;
        }
        send(&mut conversation, "will fail", at);
        conversation.fail(&ChatError::Aborted);
        at += MIN_SEND_INTERVAL;

        let request = send(&mut conversation, "latest", at);

        assert_eq!(request.messages.len(), HISTORY_WINDOW + 2);
        assert_eq!(request.messages[0].role, MessageRole::System);
        assert!(
            request.messages[1..]
                .iter()
                .all(|message| message.role != MessageRole::System)
        );
        assert_eq!(request.messages[HISTORY_WINDOW].content, "will fail");
        assert_eq!(request.messages[HISTORY_WINDOW + 1].content, "latest");
    }

    #[test]
    fn finalize_commits_visible_text_and_reasoning() {
        let mut conversation = Conversation::default();
        let start = Instant::now();
        send(&mut conversation, "why?", start);

        for token in ["<think>", "because", "</think>", "Hello", " there"] {
            conversation.apply_token(token);
        }
        assert_eq!(
            conversation.placeholder().map(|p| p.split().visible.as_str()),
            Some("Hello there")
        );

        let outcome = StreamOutcome {
            usage: Some(UsageBreakdown::new(4, 10, 14)),
            finish_reason: Some("stop".into()),
            token_count: 5,
        };
        let metrics = MetricsSnapshot {
            requests_waiting: 2,
            ..MetricsSnapshot::default()
        };
        let mut reconciler = UsageReconciler::default();
        let message = conversation
            .finalize(&outcome, Some(metrics), &mut reconciler, start + Duration::from_secs(2))
            .cloned()
            .unwrap();

        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.content, "Hello there");
        assert_eq!(message.reasoning, vec!["because"]);
        assert_eq!(message.tokens_per_second, 5);
        assert_eq!(message.metrics, Some(metrics));
        assert_eq!(conversation.totals().total_tokens, 14);
        assert_eq!(conversation.state(), ConversationState::Idle);
        assert_eq!(conversation.status(), Status::Ready);
        assert!(conversation.placeholder().is_none());
    }

    #[test]
    fn finalize_falls_back_to_snapshot_delta_and_chunk_speed() {
        let mut conversation = Conversation::default();
        let start = Instant::now();
        send(&mut conversation, "hi", start);
        for token in ["a", "b", "c", "d"] {
            conversation.apply_token(token);
        }

        let mut reconciler = UsageReconciler::initialize(None);
        let current = MetricsSnapshot {
            total_input_tokens: 9,
            total_output_tokens: 0,
            total_tokens: 9,
            ..MetricsSnapshot::default()
        };
        let message = conversation
            .finalize(
                &StreamOutcome::default(),
                Some(current),
                &mut reconciler,
                start + Duration::from_secs(2),
            )
            .cloned()
            .unwrap();

        assert_eq!(message.usage, Some(UsageBreakdown::new(9, 0, 9)));
        assert_eq!(message.tokens_per_second, 2);
        assert_eq!(reconciler.baseline(), &current);
    }

    #[test]
    fn empty_stream_commits_placeholder_text() {
        let mut conversation = Conversation::default();
        let start = Instant::now();
        send(&mut conversation, "hi", start);

        let mut reconciler = UsageReconciler::default();
        let message = conversation
            .finalize(&StreamOutcome::default(), None, &mut reconciler, start)
            .cloned()
            .unwrap();

        assert_eq!(message.content, EMPTY_RESPONSE);
        assert_eq!(message.usage, None);
        assert_eq!(message.tokens_per_second, 0);
    }

    #[test]
    fn failure_discards_placeholder_and_logs_error() {
        let mut conversation = Conversation::default();
        send(&mut conversation, "hi", Instant::now());
        conversation.apply_token("partial");

        conversation.fail(&ChatError::Timeout { seconds: 120 });

        assert!(conversation.placeholder().is_none());
        assert_eq!(conversation.state(), ConversationState::Idle);
        assert_eq!(conversation.status(), Status::ErrorOccurred);
        let last = conversation.messages().last().unwrap();
        assert_eq!(last.role, MessageRole::System);
        assert_eq!(last.content, "Error: No response within 120 seconds");
        assert_eq!(conversation.totals(), &UsageTotals::default());
    }

    #[test]
    fn resend_keeps_both_copies() {
        let mut conversation = Conversation::default();
        let start = Instant::now();
        send(&mut conversation, "repeat me", start);
        complete(&mut conversation, &["done"], start);

        let original = conversation.user_message(1).unwrap().to_string();
        let request = send(&mut conversation, &original, start + MIN_SEND_INTERVAL);

        let copies = conversation
            .messages()
            .iter()
            .filter(|message| message.content == "repeat me")
            .count();
        assert_eq!(copies, 2);
        assert_eq!(request.messages.last().unwrap().content, "repeat me");
        assert_eq!(conversation.user_message(3), None);
        assert_eq!(conversation.user_message(0), None);
    }

    #[test]
    fn clear_resets_log_and_totals_but_not_while_loading() {
        let mut conversation = Conversation::default();
        let start = Instant::now();
        send(&mut conversation, "hi", start);

        assert_eq!(conversation.clear(), Err(SendRejection::AlreadyLoading));
        assert_eq!(conversation.messages().len(), 1);

        complete(&mut conversation, &["yo"], start);
        assert_eq!(conversation.totals().total_tokens, 5);

        conversation.clear().unwrap();
        assert!(conversation.messages().is_empty());
        assert_eq!(conversation.totals(), &UsageTotals::default());
        assert_eq!(conversation.status().to_string(), "Chat cleared");
    }

    #[test]
    fn proxy_mode_reports_server_config_status() {
        let settings = Settings {
            use_server_proxy: true,
            ..Settings::default()
        };
        assert_eq!(Status::ready_for(&settings).to_string(), "Ready (using server config)");
        assert_eq!(
            Status::ready_for(&Settings::default()).to_string(),
            "Please configure API key in settings"
        );
    }
}
