use crate::app_state::AppState;
use axum::{Json, extract::State};
use shared::models::{ClientConfigResponse, DefaultsResponse};
use std::sync::Arc;

/// `GET /api/config`: what the client needs to start, never the key itself.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<ClientConfigResponse> {
    metrics::counter!("proxy_requests_total", "endpoint" => "config").increment(1);
    Json(state.config.client_config())
}

/// `GET /api/defaults`: values the client restores on reset.
pub async fn get_defaults(State(state): State<Arc<AppState>>) -> Json<DefaultsResponse> {
    metrics::counter!("proxy_requests_total", "endpoint" => "defaults").increment(1);
    Json(state.config.defaults())
}
