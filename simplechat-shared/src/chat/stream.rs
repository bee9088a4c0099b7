//! Demultiplexing of server-sent `data:` frames into content tokens.
//!
//! The demultiplexer is a plain state machine over text chunks; [`run_stream`]
//! drives it from an async byte stream under a deadline and a cancellation
//! token.

use crate::chat::errors::ChatError;
use crate::models::{ChatCompletionChunk, UsageBreakdown};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::{pin::pin, time::Duration};
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Prefix of the SSE lines that carry a payload.
pub const DATA_PREFIX: &str = "data:";
/// Payload that ends the stream.
pub const DONE_SENTINEL: &str = "[DONE]";
/// Upper bound on a whole streamed request, from send to last frame.
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(120);

/// Lifecycle of a [`StreamDemultiplexer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Waiting for the next chunk.
    Open,
    /// Splitting a chunk into lines.
    Receiving,
    /// Finished; the terminal event was emitted.
    Closed,
    /// Cancelled; nothing more is emitted.
    Aborted,
}

/// One callback delivery: a content token, or the terminal event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEvent {
    /// Content delta; empty on the terminal event.
    pub token: String,
    /// Set on the terminal event only.
    pub is_final: bool,
    /// Inline usage, carried by the terminal event.
    pub usage: Option<UsageBreakdown>,
}

impl TokenEvent {
    fn content(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            is_final: false,
            usage: None,
        }
    }

    fn terminal(usage: Option<UsageBreakdown>) -> Self {
        Self {
            token: String::new(),
            is_final: true,
            usage,
        }
    }
}

/// What a completed stream reported besides its content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamOutcome {
    /// Last inline usage seen.
    pub usage: Option<UsageBreakdown>,
    /// Last `finish_reason` seen.
    pub finish_reason: Option<String>,
    /// Number of non-empty content deltas received.
    pub token_count: u64,
}

/// Line-buffering SSE decoder.
#[derive(Debug)]
pub struct StreamDemultiplexer {
    state: StreamState,
    buffer: String,
    pending_bytes: Vec<u8>,
    outcome: StreamOutcome,
}

impl Default for StreamDemultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDemultiplexer {
    /// A decoder in the [`Open`](StreamState::Open) state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StreamState::Open,
            buffer: String::new(),
            pending_bytes: Vec::new(),
            outcome: StreamOutcome::default(),
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Usage, finish reason and token count seen so far.
    #[must_use]
    pub fn outcome(&self) -> StreamOutcome {
        self.outcome.clone()
    }

    /// Feeds a text chunk and returns the content events of every line it
    /// completed, in wire order.
    pub fn consume(&mut self, chunk: &str) -> Vec<TokenEvent> {
        if self.is_terminal() {
            warn!(state = ?self.state, "ignoring chunk received after stream end");
            return Vec::new();
        }

        self.state = StreamState::Receiving;
        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            if let Some(token) = self.process_line(&line) {
                events.push(TokenEvent::content(token));
            }
        }

        self.state = StreamState::Open;
        events
    }

    /// Byte-level variant of [`consume`](Self::consume); a UTF-8 sequence
    /// split across chunks is held back until it completes.
    pub fn consume_bytes(&mut self, chunk: &[u8]) -> Vec<TokenEvent> {
        if self.is_terminal() {
            return self.consume("");
        }

        self.pending_bytes.extend_from_slice(chunk);
        let text = self.decode_pending(false);
        self.consume(&text)
    }

    /// Flushes any unterminated last line, closes the stream and returns the
    /// remaining events, ending with the single terminal event.
    ///
    /// Returns nothing when the stream was already closed or aborted.
    pub fn finish(&mut self) -> Vec<TokenEvent> {
        if self.is_terminal() {
            return Vec::new();
        }

        let tail = self.decode_pending(true);
        let mut events = self.consume(&tail);
        let residual = std::mem::take(&mut self.buffer);
        if let Some(token) = self.process_line(&residual) {
            events.push(TokenEvent::content(token));
        }

        self.state = StreamState::Closed;
        events.push(TokenEvent::terminal(self.outcome.usage));
        debug!(
            tokens = self.outcome.token_count,
            has_usage = self.outcome.usage.is_some(),
            "stream closed"
        );
        events
    }

    /// Drops buffered input; later calls emit nothing.
    pub fn abort(&mut self) {
        if !self.is_terminal() {
            self.state = StreamState::Aborted;
            self.buffer.clear();
            self.pending_bytes.clear();
        }
    }

    const fn is_terminal(&self) -> bool {
        matches!(self.state, StreamState::Closed | StreamState::Aborted)
    }

    /// Decodes the longest valid prefix of the pending bytes. Invalid
    /// sequences become U+FFFD; an incomplete trailing sequence is kept
    /// unless `flush` is set.
    fn decode_pending(&mut self, flush: bool) -> String {
        let mut text = String::new();
        let mut rest: &[u8] = &self.pending_bytes;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(invalid) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[invalid..];
                        }
                        None if flush => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &[];
                            break;
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        self.pending_bytes = rest.to_vec();
        text
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            trace!(line, "skipping non-data line");
            return None;
        };
        let payload = payload.trim();
        if payload == DONE_SENTINEL {
            return None;
        }

        let chunk: ChatCompletionChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(error = %err, payload, "skipping malformed stream frame");
                return None;
            }
        };

        if let Some(reason) = chunk.finish_reason() {
            self.outcome.finish_reason = Some(reason.to_string());
        }
        if let Some(usage) = chunk.usage {
            self.outcome.usage = Some(usage);
        }

        let token = chunk.content().filter(|content| !content.is_empty())?;
        self.outcome.token_count += 1;
        Some(token.to_string())
    }
}

/// Drives a byte stream through a [`StreamDemultiplexer`].
///
/// `on_token` sees every content token in wire order and then exactly one
/// terminal event, but only when the stream ends normally. Cancellation,
/// the deadline and read failures end the run with an error instead.
///
/// # Errors
/// [`ChatError::Aborted`] when `cancel` fires, [`ChatError::Timeout`] when
/// `deadline` passes, or the transport's own error when a read fails.
pub async fn run_stream<S, F>(
    stream: S,
    deadline: Instant,
    cancel: &CancellationToken,
    mut on_token: F,
) -> Result<StreamOutcome, ChatError>
where
    S: Stream<Item = Result<Bytes, ChatError>>,
    F: FnMut(TokenEvent),
{
    let mut demux = StreamDemultiplexer::new();
    let mut stream = pin!(stream);

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                demux.abort();
                debug!("stream cancelled");
                return Err(ChatError::Aborted);
            }
            next = timeout_at(deadline, stream.next()) => next,
        };

        match next {
            Err(_) => {
                demux.abort();
                warn!(
                    timeout_secs = STREAM_TIMEOUT.as_secs(),
                    "stream deadline exceeded"
                );
                return Err(ChatError::Timeout {
                    seconds: STREAM_TIMEOUT.as_secs(),
                });
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                demux.abort();
                warn!(error = %err, "stream read failed");
                return Err(err);
            }
            Ok(Some(Ok(bytes))) => {
                for event in demux.consume_bytes(&bytes) {
                    on_token(event);
                }
            }
        }
    }

    for event in demux.finish() {
        on_token(event);
    }
    Ok(demux.outcome())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    const HI_FRAME: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n";

    fn frame(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({ "choices": [{ "index": 0, "delta": { "content": content } }] })
        )
    }

    fn far_deadline() -> Instant {
        Instant::now() + STREAM_TIMEOUT
    }

    #[test]
    fn single_token_then_done() {
        let mut demux = StreamDemultiplexer::new();
        let mut events = demux.consume(HI_FRAME);
        events.extend(demux.consume("data: [DONE]\n"));
        events.extend(demux.finish());

        assert_eq!(
            events,
            vec![TokenEvent::content("Hi"), TokenEvent::terminal(None)]
        );
        assert_eq!(demux.state(), StreamState::Closed);
    }

    #[test]
    fn lines_split_across_chunks_are_reassembled() {
        let mut demux = StreamDemultiplexer::new();
        let (head, tail) = HI_FRAME.split_at(17);

        assert!(demux.consume(head).is_empty());
        assert_eq!(demux.consume(tail), vec![TokenEvent::content("Hi")]);
    }

    #[test]
    fn malformed_and_foreign_lines_are_skipped() {
        let mut demux = StreamDemultiplexer::new();
        let input = format!(": keep-alive\nevent: ping\ndata: {{not json\n\n{}", frame("ok"));

        assert_eq!(demux.consume(&input), vec![TokenEvent::content("ok")]);
    }

    #[test]
    fn usage_is_captured_and_overwritten() {
        let mut demux = StreamDemultiplexer::new();
        demux.consume(
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":1,\"total_tokens\":2}}\n",
        );
        demux.consume(
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":7,\"total_tokens\":12}}\n",
        );

        let events = demux.finish();
        let usage = UsageBreakdown::new(5, 7, 12);
        assert_eq!(events, vec![TokenEvent::terminal(Some(usage))]);
        assert_eq!(demux.outcome().finish_reason.as_deref(), Some("stop"));
        assert_eq!(demux.outcome().token_count, 0);
    }

    #[test]
    fn residual_line_is_flushed_on_finish() {
        let mut demux = StreamDemultiplexer::new();
        assert!(demux.consume(HI_FRAME.trim_end()).is_empty());

        let events = demux.finish();
        assert_eq!(
            events,
            vec![TokenEvent::content("Hi"), TokenEvent::terminal(None)]
        );
    }

    #[test]
    fn terminal_event_fires_once() {
        let mut demux = StreamDemultiplexer::new();
        assert_eq!(demux.finish().len(), 1);
        assert!(demux.finish().is_empty());
        assert!(demux.consume(HI_FRAME).is_empty());
    }

    #[test]
    fn aborted_stream_emits_nothing() {
        let mut demux = StreamDemultiplexer::new();
        demux.consume("data: {\"choi");
        demux.abort();

        assert_eq!(demux.state(), StreamState::Aborted);
        assert!(demux.finish().is_empty());
    }

    #[test]
    fn multibyte_characters_survive_byte_splits() {
        let mut demux = StreamDemultiplexer::new();
        let bytes = frame("héllo ✓").into_bytes();
        let split_at = bytes
            .iter()
            .position(|byte| *byte == 0xC3)
            .map(|pos| pos + 1)
            .unwrap();

        assert!(demux.consume_bytes(&bytes[..split_at]).is_empty());
        assert_eq!(
            demux.consume_bytes(&bytes[split_at..]),
            vec![TokenEvent::content("héllo ✓")]
        );
    }

    #[tokio::test]
    async fn run_stream_delivers_tokens_in_order() {
        let chunks = vec![
            Ok(Bytes::from(frame("Hel"))),
            Ok(Bytes::from(frame("lo"))),
            Ok(Bytes::from_static(b"data: [DONE]\n")),
        ];
        let mut events = Vec::new();

        let outcome = run_stream(
            stream::iter(chunks),
            far_deadline(),
            &CancellationToken::new(),
            |event| events.push(event),
        )
        .await
        .unwrap();

        assert_eq!(outcome.token_count, 2);
        assert_eq!(
            events,
            vec![
                TokenEvent::content("Hel"),
                TokenEvent::content("lo"),
                TokenEvent::terminal(None),
            ]
        );
    }

    #[tokio::test]
    async fn run_stream_terminal_fires_without_content() {
        let mut events = Vec::new();
        let outcome = run_stream(
            stream::iter(Vec::<Result<Bytes, ChatError>>::new()),
            far_deadline(),
            &CancellationToken::new(),
            |event| events.push(event),
        )
        .await
        .unwrap();

        assert_eq!(outcome, StreamOutcome::default());
        assert_eq!(events, vec![TokenEvent::terminal(None)]);
    }

    #[tokio::test]
    async fn run_stream_times_out_at_deadline() {
        let mut events = Vec::new();
        let result = run_stream(
            stream::pending::<Result<Bytes, ChatError>>(),
            Instant::now() + Duration::from_millis(20),
            &CancellationToken::new(),
            |event| events.push(event),
        )
        .await;

        assert_eq!(result, Err(ChatError::Timeout { seconds: 120 }));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn run_stream_stops_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = run_stream(
            stream::pending::<Result<Bytes, ChatError>>(),
            far_deadline(),
            &cancel,
            |_| {},
        )
        .await;

        assert_eq!(result, Err(ChatError::Aborted));
    }

    #[tokio::test]
    async fn run_stream_surfaces_read_failures() {
        let chunks = vec![
            Ok(Bytes::from(frame("partial"))),
            Err(ChatError::Connectivity("connection reset".into())),
        ];
        let mut events = Vec::new();

        let result = run_stream(
            stream::iter(chunks),
            far_deadline(),
            &CancellationToken::new(),
            |event| events.push(event),
        )
        .await;

        assert!(matches!(result, Err(ChatError::Connectivity(_))));
        assert_eq!(events, vec![TokenEvent::content("partial")]);
    }
}
