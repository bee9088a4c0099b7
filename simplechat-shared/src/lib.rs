#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)] // TODO(deps-001): remove once transitive dependencies converge.

//! Shared building blocks for `SimpleChat`.
//!
//! The [`chat`] module holds the streaming pipeline (stream demultiplexing,
//! think/response splitting, usage reconciliation, metric extraction) and the
//! conversation state machine that ties them together. [`models`] carries the
//! wire types spoken with OpenAI-compatible APIs and the proxy server, and
//! [`config`] resolves both the server configuration and the persisted client
//! settings.

pub mod chat;
pub mod config;
pub mod models;

pub use models::{ChatMessage, MessageRole, UsageBreakdown};
