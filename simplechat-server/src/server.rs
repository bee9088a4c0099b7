use crate::{app_state::AppState, routes, tracer};
use anyhow::Context;
use axum::{
    Extension, Router,
    http::{HeaderValue, Method, StatusCode, header},
    response::IntoResponse,
    routing::get,
    serve,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use shared::config::server::{Config, LogFormat};
use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    services::ServeDir,
};
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Handle of the process-wide Prometheus recorder, installed on first use.
///
/// When another recorder already owns the global slot the handle still
/// renders, just without this crate's counters.
#[must_use]
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let recorder = PrometheusBuilder::new().build_recorder();
            let handle = recorder.handle();
            if let Err(err) = metrics::set_global_recorder(recorder) {
                warn!(error = %err, "Prometheus recorder not installed");
            }
            handle
        })
        .clone()
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
///
/// Returns the configured level. A subscriber installed earlier is kept.
#[must_use]
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        warn!("tracing subscriber already installed");
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates the shared state: the resolved configuration and one pooled
/// HTTP client for every upstream call.
///
/// # Errors
/// Returns an error if the HTTP client cannot be built.
pub fn create_app_state(config: Arc<Config>) -> anyhow::Result<Arc<AppState>> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("simplechat-server/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build upstream HTTP client")?;
    Ok(Arc::new(AppState::new(config, client)))
}

/// Creates the CORS layer for the application.
///
/// Every origin is allowed; the proxy never exposes its credential.
#[must_use]
pub fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(AllowMethods::list([Method::GET, Method::POST, Method::OPTIONS]))
        .allow_headers(AllowHeaders::any())
}

/// Serves the client assets, falling back to `spa_index` for unknown paths.
#[must_use]
pub fn create_static_service<S>(static_dir: PathBuf, spa_index: PathBuf) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    use axum::routing::get_service;
    use tower_http::services::ServeFile;

    Router::new().fallback_service(
        ServeDir::new(static_dir)
            .append_index_html_on_directories(true)
            .fallback(get_service(ServeFile::new(spa_index))),
    )
}

/// Creates the main application router with all middleware and routes.
#[must_use]
pub fn create_app_router(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let static_files_service = create_static_service(
        state.config().web.static_dir.clone(),
        state.config().web.spa_index.clone(),
    );

    Router::new()
        .nest("/api", routes::api::create_router_api())
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .merge(static_files_service)
        .layer(Extension(metrics_handle))
        .layer(create_cors_layer())
        .layer(tracer::create_trace_layer())
        .with_state(state)
}

/// Resolves when Ctrl+C is received.
pub async fn create_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler; shutdown only by kill");
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

/// Starts the proxy server and binds it to the configured port.
///
/// # Errors
/// Returns an error if the configuration is invalid, the port cannot be
/// bound, or the server stops with an I/O error.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let _ = initialize_tracing(&config);
    info!("Starting server...");

    if let Err(problems) = config.validate() {
        for problem in &problems {
            error!("{problem}");
        }
        anyhow::bail!("invalid configuration: {}", problems.join("; "));
    }
    if !config.web.static_dir.is_dir() {
        warn!(
            static_dir = %config.web.static_dir.display(),
            "static directory not found; only the API is served"
        );
    }
    if !config.has_api_key() {
        warn!("OPENAI_API_KEY is not set; /api/chat will answer 400 until one is configured");
    }

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);
    let state = create_app_state(config.clone())?;
    let app = create_app_router(state, metrics_handle);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        %addr,
        upstream = %config.upstream.api_url,
        model = %config.upstream.model_name,
        "Listening"
    );

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await
        .context("server stopped unexpectedly")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::Request,
        response::Response,
    };
    use serde_json::Value;
    use std::{
        fs,
        io::{self, Write},
        sync::Mutex,
    };
    use tempfile::TempDir;
    use tower::ServiceExt;
    use tracing::Subscriber;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferMakeWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    struct BufferWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl<'a> MakeWriter<'a> for BufferMakeWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            BufferWriter {
                buffer: Arc::clone(&self.buffer),
            }
        }
    }

    impl Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.buffer.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn subscriber_with_writer<W>(config: &Config, writer: W) -> Box<dyn Subscriber + Send + Sync>
    where
        W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
    {
        let builder = fmt::fmt()
            .with_env_filter(build_env_filter(config))
            .with_target(false)
            .with_level(true)
            .with_writer(writer);

        if matches!(config.logging.format, LogFormat::Json) {
            Box::new(builder.json().with_ansi(false).finish())
        } else {
            Box::new(builder.with_ansi(false).finish())
        }
    }

    fn first_log_line(config: &Config) -> String {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = subscriber_with_writer(
            config,
            BufferMakeWriter {
                buffer: buffer.clone(),
            },
        );
        let dispatch = tracing::dispatcher::Dispatch::new(subscriber);

        tracing::dispatcher::with_default(&dispatch, || {
            info!(event = "format_test", "log entry");
        });

        let contents = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        contents
            .lines()
            .find(|line| !line.trim().is_empty())
            .unwrap()
            .to_string()
    }

    fn test_state(static_dir: PathBuf) -> Arc<AppState> {
        let mut config = Config::with_defaults();
        config.web.spa_index = static_dir.join("index.html");
        config.web.static_dir = static_dir;
        create_app_state(Arc::new(config)).unwrap()
    }

    async fn fetch(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn initialize_tracing_returns_configured_level() {
        let mut config = Config::with_defaults();
        config.logging.level = "debug".into();
        assert_eq!(initialize_tracing(&config), "debug");
        // A second call keeps the first subscriber instead of panicking.
        assert_eq!(initialize_tracing(&config), "debug");
    }

    #[test]
    fn json_log_format_produces_json_output() {
        let mut config = Config::with_defaults();
        config.logging.format = LogFormat::Json;

        let value: Value = serde_json::from_str(&first_log_line(&config)).unwrap();
        assert_eq!(value["fields"]["message"], "log entry");
        assert_eq!(value["fields"]["event"], "format_test");
    }

    #[test]
    fn text_log_format_emits_plain_events() {
        let config = Config::with_defaults();

        let line = first_log_line(&config);
        assert!(serde_json::from_str::<Value>(&line).is_err(), "{line}");
        assert!(line.contains("log entry"));
    }

    #[tokio::test]
    async fn metrics_endpoint_returns_prometheus_payload() {
        let handle = metrics_handle();
        metrics::counter!("proxy_requests_total", "endpoint" => "test").increment(1);
        let dir = TempDir::new().unwrap();
        let app = create_app_router(test_state(dir.path().to_path_buf()), handle);

        let response = fetch(app, "/metrics").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; version=0.0.4"
        );
        assert!(body_text(response).await.contains("proxy_requests_total"));
    }

    #[tokio::test]
    async fn api_and_health_routes_are_mounted() {
        let dir = TempDir::new().unwrap();
        let app = create_app_router(test_state(dir.path().to_path_buf()), metrics_handle());

        let health = fetch(app.clone(), "/healthz").await;
        assert_eq!(health.status(), StatusCode::OK);

        let config = fetch(app, "/api/config").await;
        assert_eq!(config.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(config).await).unwrap();
        assert_eq!(body["hasApiKey"], false);
    }

    #[tokio::test]
    async fn static_assets_fall_back_to_index() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>chat</h1>").unwrap();
        fs::write(dir.path().join("app.js"), "console.log('hi')").unwrap();
        let app = create_app_router(test_state(dir.path().to_path_buf()), metrics_handle());

        let asset = fetch(app.clone(), "/app.js").await;
        assert_eq!(asset.status(), StatusCode::OK);
        assert_eq!(body_text(asset).await, "console.log('hi')");

        let unknown = fetch(app, "/some/client/route").await;
        assert_eq!(unknown.status(), StatusCode::OK);
        assert_eq!(body_text(unknown).await, "<h1>chat</h1>");
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let dir = TempDir::new().unwrap();
        let app = create_app_router(test_state(dir.path().to_path_buf()), metrics_handle());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/defaults")
                    .header(header::ORIGIN, "http://elsewhere.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn run_rejects_invalid_configuration() {
        let mut config = Config::with_defaults();
        config.upstream.api_url = "ftp://models.internal".into();
        config.upstream.max_tokens = 0;

        let err = run(config).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("http or https"), "{message}");
        assert!(message.contains("max_tokens"), "{message}");
    }
}
