#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)] // TODO(deps-001): remove once transitive dependencies converge.

//! The `SimpleChat` proxy server.
//!
//! Serves the client configuration, relays chat completions to the upstream
//! OpenAI-compatible API with the server-held credential, and passes the
//! upstream Prometheus metrics through.

/// State shared by the request handlers.
pub mod app_state;
/// Handlers behind the `/api` routes.
pub mod handlers;
/// HTTP plumbing shared by the handlers.
pub mod http;
/// Router assembly.
pub mod routes;
/// Server startup, middleware and shutdown.
pub mod server;
mod tracer;
