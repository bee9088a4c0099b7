/// Chat completion relay.
pub mod chat;
/// Client configuration and defaults.
pub mod config;
/// Upstream metrics pass-through.
pub mod metrics;
