//! # Transport
//!
//! The boundaries the chat client talks through: the completion stream, the
//! Prometheus metrics endpoint, and the proxy's configuration endpoints.
//! [`HttpTransport`] implements all three over `reqwest`.

use crate::chat::{
    errors::ChatError,
    metrics::{MetricsSnapshot, parse_metrics},
};
use crate::config::{
    client::{CredentialMode, Settings},
    endpoints::{chat_completions_url, metrics_url},
};
use crate::models::{ChatCompletionRequest, ClientConfigResponse, DefaultsResponse, ErrorResponse};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, Response};
use std::{pin::Pin, time::Duration};
use tracing::{debug, instrument, warn};
use url::Url;

/// Body of a streaming completion response.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send + 'static>>;

/// Metrics scrapes are short-lived and must never hold up a request.
pub const METRICS_TIMEOUT: Duration = Duration::from_secs(5);

/// Where completion requests go.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends a completion request and returns the streamed response body.
    ///
    /// # Errors
    /// Returns a [`ChatError`] when the request cannot be sent or the API
    /// answers with a non-success status.
    async fn open_stream(
        &self,
        settings: &Settings,
        request: &ChatCompletionRequest,
    ) -> Result<ByteStream, ChatError>;
}

/// Where server metrics come from.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Scrapes the metrics endpoint; `None` means metrics are unavailable.
    async fn fetch_metrics(&self, settings: &Settings) -> Option<MetricsSnapshot>;
}

/// The proxy's configuration endpoints.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Reads `/api/config`; `None` when no proxy answers.
    async fn server_config(&self) -> Option<ClientConfigResponse>;

    /// Reads `/api/defaults`.
    ///
    /// # Errors
    /// Returns a [`ChatError`] when the proxy is unreachable or answers
    /// with a non-success status.
    async fn defaults(&self) -> Result<DefaultsResponse, ChatError>;
}

/// HTTP implementation of every client boundary.
///
/// `origin` is the proxy server the client was started against. Without it
/// proxy mode is unavailable and every call goes to the API directly.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    origin: Option<Url>,
}

impl HttpTransport {
    /// A transport with its own connection pool.
    ///
    /// # Errors
    /// Returns [`ChatError::InvalidRequest`] when the HTTP client cannot be
    /// constructed.
    pub fn new(origin: Option<Url>) -> Result<Self, ChatError> {
        let client = Client::builder()
            .user_agent(concat!("simplechat/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| ChatError::InvalidRequest(format!("failed to build HTTP client: {err}")))?;
        Ok(Self::with_client(client, origin))
    }

    /// A transport sharing an existing client.
    #[must_use]
    pub const fn with_client(client: Client, origin: Option<Url>) -> Self {
        Self { client, origin }
    }

    fn origin_path(&self, path: &str) -> Result<Url, ChatError> {
        let origin = self.origin.as_ref().ok_or_else(|| {
            ChatError::InvalidRequest("no proxy server is configured".to_string())
        })?;
        origin
            .join(path)
            .map_err(|err| ChatError::InvalidRequest(format!("invalid proxy URL: {err}")))
    }

    fn metrics_endpoint(&self, settings: &Settings) -> Result<String, ChatError> {
        if settings.use_server_proxy {
            Ok(self.origin_path("/api/metrics")?.to_string())
        } else {
            Ok(metrics_url(&settings.api_url))
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    #[instrument(skip_all, fields(model = request.model.as_deref().unwrap_or_default()))]
    async fn open_stream(
        &self,
        settings: &Settings,
        request: &ChatCompletionRequest,
    ) -> Result<ByteStream, ChatError> {
        let builder = match settings.credential_mode() {
            CredentialMode::ServerProxy => self.client.post(self.origin_path("/api/chat")?),
            CredentialMode::Direct => self
                .client
                .post(chat_completions_url(&settings.api_url))
                .bearer_auth(&settings.api_key),
            CredentialMode::Missing => {
                return Err(ChatError::InvalidCredential(Some(
                    "no API key configured".to_string(),
                )));
            }
        };

        let response = ensure_success(builder.json(request).send().await?).await?;
        debug!(status = %response.status(), "completion stream opened");

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(ChatError::from))
            .boxed())
    }
}

#[async_trait]
impl MetricsSource for HttpTransport {
    async fn fetch_metrics(&self, settings: &Settings) -> Option<MetricsSnapshot> {
        let url = match self.metrics_endpoint(settings) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "could not resolve metrics endpoint");
                return None;
            }
        };

        let response = match self.client.get(&url).timeout(METRICS_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(%url, status = %response.status(), "could not fetch metrics");
                return None;
            }
            Err(err) => {
                warn!(%url, error = %err, "error collecting metrics");
                return None;
            }
        };

        match response.text().await {
            Ok(text) => Some(parse_metrics(&text)),
            Err(err) => {
                warn!(%url, error = %err, "error reading metrics body");
                None
            }
        }
    }
}

#[async_trait]
impl ConfigSource for HttpTransport {
    async fn server_config(&self) -> Option<ClientConfigResponse> {
        let url = self.origin_path("/api/config").ok()?;
        let result = async {
            let response = ensure_success(self.client.get(url).send().await?).await?;
            Ok::<_, ChatError>(response.json::<ClientConfigResponse>().await?)
        }
        .await;

        match result {
            Ok(config) => Some(config),
            Err(err) => {
                warn!(error = %err, "could not load server config");
                None
            }
        }
    }

    async fn defaults(&self) -> Result<DefaultsResponse, ChatError> {
        let url = self.origin_path("/api/defaults")?;
        let response = ensure_success(self.client.get(url).send().await?).await?;
        Ok(response.json().await?)
    }
}

/// Turns a non-2xx response into the matching [`ChatError`], carrying the
/// upstream `error.message` when the body has one.
async fn ensure_success(response: Response) -> Result<Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| ErrorResponse::message_from_value(&body));
    warn!(status = status.as_u16(), message = message.as_deref(), "request rejected");
    Err(ChatError::from_status(status.as_u16(), message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxied() -> Settings {
        Settings {
            use_server_proxy: true,
            ..Settings::default()
        }
    }

    #[test]
    fn metrics_endpoint_follows_credential_mode() {
        let transport =
            HttpTransport::new(Some(Url::parse("http://127.0.0.1:3000").unwrap())).unwrap();

        assert_eq!(
            transport.metrics_endpoint(&proxied()).unwrap(),
            "http://127.0.0.1:3000/api/metrics"
        );

        let direct = Settings {
            api_url: "http://gpu:8000/v1".into(),
            ..Settings::default()
        };
        assert_eq!(
            transport.metrics_endpoint(&direct).unwrap(),
            "http://gpu:8000/metrics"
        );
    }

    #[test]
    fn proxy_mode_needs_an_origin() {
        let transport = HttpTransport::new(None).unwrap();
        assert!(matches!(
            transport.metrics_endpoint(&proxied()),
            Err(ChatError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn missing_credential_is_rejected_before_sending() {
        let transport = HttpTransport::new(None).unwrap();
        let request = ChatCompletionRequest {
            model: None,
            messages: Vec::new(),
            max_tokens: None,
            temperature: None,
            stream: Some(true),
        };

        let result = transport.open_stream(&Settings::default(), &request).await;
        assert!(matches!(result, Err(ChatError::InvalidCredential(_))));
    }

    #[tokio::test]
    async fn unreachable_metrics_degrade_to_none() {
        let transport = HttpTransport::new(None).unwrap();
        let settings = Settings {
            api_url: "http://127.0.0.1:9/v1".into(),
            ..Settings::default()
        };

        assert_eq!(transport.fetch_metrics(&settings).await, None);
    }

    #[tokio::test]
    async fn server_config_is_none_without_origin() {
        let transport = HttpTransport::new(None).unwrap();
        assert_eq!(transport.server_config().await, None);
        assert!(transport.defaults().await.is_err());
    }
}
