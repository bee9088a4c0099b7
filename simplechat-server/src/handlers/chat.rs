use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
};
use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::header,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use shared::{config::endpoints::chat_completions_url, models::ChatCompletionRequest};
use std::{convert::Infallible, sync::Arc};
use tokio_stream::StreamExt;
use tracing::{debug, instrument, warn};

/// `POST /api/chat`: forwards a completion request upstream with the
/// server-held key.
///
/// Missing fields take the configured defaults and `stream` defaults to
/// `true`. A streamed answer is piped through as it arrives.
///
/// # Errors
/// Returns `400` when no key is configured, the upstream status and body
/// when the upstream refuses, and `500` when the upstream is unreachable.
#[instrument(skip_all)]
pub async fn post_chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = payload?;
    let upstream = &state.config.upstream;
    let Some(api_key) = upstream.api_key.as_deref().filter(|key| !key.is_empty()) else {
        metrics::counter!("proxy_requests_total", "endpoint" => "chat", "outcome" => "no_key")
            .increment(1);
        return Err(ApiError::missing_api_key());
    };

    let stream = request.stream.unwrap_or(true);
    let body = ChatCompletionRequest {
        model: Some(
            request
                .model
                .filter(|model| !model.is_empty())
                .unwrap_or_else(|| upstream.model_name.clone()),
        ),
        messages: request.messages,
        max_tokens: Some(
            request
                .max_tokens
                .filter(|tokens| *tokens > 0)
                .unwrap_or(upstream.max_tokens),
        ),
        temperature: Some(request.temperature.unwrap_or(upstream.temperature)),
        stream: Some(stream),
    };
    debug!(
        model = body.model.as_deref().unwrap_or_default(),
        messages = body.messages.len(),
        stream,
        "forwarding chat request"
    );

    let response = state
        .client
        .post(chat_completions_url(&upstream.api_url))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        metrics::counter!("proxy_requests_total", "endpoint" => "chat", "outcome" => "upstream_error")
            .increment(1);
        let body = response.json::<Value>().await.unwrap_or_else(|_| json!({}));
        warn!(%status, "upstream rejected chat request");
        return Err(ApiError::upstream(status, body));
    }
    metrics::counter!("proxy_requests_total", "endpoint" => "chat", "outcome" => "ok").increment(1);

    if !stream {
        let body = response.json::<Value>().await?;
        return Ok(Json(body).into_response());
    }

    // A read failure ends the relayed body; the client sees a short stream.
    let chunks = response.bytes_stream().map_while(|chunk| match chunk {
        Ok(bytes) => Some(Ok::<_, Infallible>(bytes)),
        Err(err) => {
            warn!(error = %err, "upstream stream interrupted");
            None
        }
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(chunks),
    )
        .into_response())
}
