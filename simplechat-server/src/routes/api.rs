//! Routes nested under `/api`.

use crate::{
    app_state::AppState,
    handlers::{
        chat::post_chat,
        config::{get_config, get_defaults},
        metrics::get_metrics,
    },
};
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

/// Config, defaults, chat and metrics endpoints.
#[must_use]
pub fn create_router_api() -> Router<Arc<AppState>> {
    Router::new()
        .route("/config", get(get_config))
        .route("/defaults", get(get_defaults))
        .route("/chat", post(post_chat))
        .route("/metrics", get(get_metrics))
}
