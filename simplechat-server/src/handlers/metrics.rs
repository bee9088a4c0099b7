use crate::app_state::AppState;
use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use shared::config::endpoints::metrics_url;
use std::sync::Arc;
use tracing::{error, warn};

/// `GET /api/metrics`: the upstream Prometheus exposition, relayed as text.
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Response {
    let url = metrics_url(&state.config.upstream.api_url);

    let response = match state.client.get(&url).send().await {
        Ok(response) => response,
        Err(err) => {
            error!(%url, error = %err, "error fetching upstream metrics");
            return fetch_failed();
        }
    };

    let status = response.status();
    if !status.is_success() {
        warn!(%url, %status, "upstream metrics not available");
        metrics::counter!("proxy_requests_total", "endpoint" => "metrics", "outcome" => "unavailable")
            .increment(1);
        return (status, "Metrics not available").into_response();
    }

    match response.text().await {
        Ok(text) => {
            metrics::counter!("proxy_requests_total", "endpoint" => "metrics", "outcome" => "ok")
                .increment(1);
            ([(header::CONTENT_TYPE, "text/plain")], text).into_response()
        }
        Err(err) => {
            error!(%url, error = %err, "error reading upstream metrics");
            fetch_failed()
        }
    }
}

fn fetch_failed() -> Response {
    metrics::counter!("proxy_requests_total", "endpoint" => "metrics", "outcome" => "error")
        .increment(1);
    (StatusCode::INTERNAL_SERVER_ERROR, "Error fetching metrics").into_response()
}
