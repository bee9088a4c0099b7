//! # Streaming chat pipeline
//!
//! Bytes from a completion stream enter the [`stream`] demultiplexer, tokens
//! are accumulated and split into reasoning and visible text by [`think`],
//! and once the stream ends [`usage`] reconciles inline usage with the
//! [`metrics`] snapshots. [`conversation`] owns the state machine that drives
//! a single request through these stages, and [`session`] wires it to the
//! [`transport`] and to a renderer.

pub mod conversation;
pub mod errors;
pub mod metrics;
pub mod session;
pub mod stream;
pub mod think;
pub mod transport;
pub mod usage;

pub use conversation::{
    Conversation, ConversationState, Message, SendRejection, Status, StreamingPlaceholder,
    UsageTotals,
};
pub use errors::ChatError;
pub use metrics::{MetricsSnapshot, parse_metrics};
pub use session::{ChatRenderer, ChatSession};
pub use stream::{StreamDemultiplexer, StreamOutcome, TokenEvent, run_stream};
pub use think::{ThinkSplit, ThinkTracker, split};
pub use transport::{ByteStream, ChatTransport, ConfigSource, HttpTransport, MetricsSource};
pub use usage::{UsageDelta, UsageReconciler, tokens_per_second};
