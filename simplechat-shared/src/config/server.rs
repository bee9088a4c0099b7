//! Configuration of the proxy server: defaults, an optional YAML or JSON
//! file, then environment variables.

use crate::config::{DEFAULT_API_URL, DEFAULT_MODEL_NAME, DEFAULT_SYSTEM_PROMPT};
use crate::models::{ClientConfigResponse, DefaultsResponse};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, str::FromStr};
use thiserror::Error;
use url::Url;

/// Errors raised while resolving the server configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        /// File that was requested.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file has a YAML extension but does not parse.
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yml::Error),

    /// The file has a JSON extension but does not parse.
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// The file extension is neither YAML nor JSON.
    #[error("Unsupported configuration format. Use 'yaml' or 'json'.")]
    UnsupportedFormat,

    /// An environment variable holds a value that cannot be used.
    #[error("Invalid {var} value: {message}")]
    InvalidEnv {
        /// Name of the variable.
        var: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The resolved port is zero.
    #[error("Invalid server port. Must be greater than 0.")]
    InvalidPort,
}

/// Output format of the tracing subscriber.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected 'text' or 'json'")),
        }
    }
}

/// Listener settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Port for the HTTP server
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

/// The OpenAI-compatible API the proxy forwards to.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL, usually ending in `/v1`.
    pub api_url: String,
    /// Credential injected by `/api/chat`; never exposed to clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model filled in when a request names none.
    pub model_name: String,
    /// Offered to clients by `/api/defaults`.
    pub system_prompt: String,
    /// Filled in when a request omits `max_tokens` or sends zero.
    pub max_tokens: u32,
    /// Filled in when a request omits `temperature`.
    pub temperature: f32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            model_name: DEFAULT_MODEL_NAME.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: 1000,
            temperature: 0.7,
        }
    }
}

/// Where the bundled web client lives.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WebConfig {
    /// Directory of static client assets
    pub static_dir: PathBuf,
    /// File served for unknown paths
    pub spa_index: PathBuf,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("public"),
            spa_index: PathBuf::from("public/index.html"),
        }
    }
}

/// Tracing subscriber settings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// The main configuration structure for the `SimpleChat` proxy server
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Listener settings.
    pub server: ServerConfig,
    /// Upstream API and request defaults.
    pub upstream: UpstreamConfig,
    /// Static client assets.
    pub web: WebConfig,
    /// Log level and format.
    pub logging: LoggingConfig,
}

impl Config {
    /// Generates a default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// Precedence, lowest first: built-in defaults, the file at `config_path`,
    /// environment variables, then `port_override`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an environment
    /// variable holds an invalid value, or the resolved port is zero.
    pub fn load_config(
        config_path: Option<PathBuf>,
        port_override: Option<u16>,
    ) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, port_override, |name| env::var(name).ok())
    }

    /// [`load_config`](Self::load_config) with variables read through `lookup`
    /// instead of the process environment.
    ///
    /// # Errors
    /// Same as [`load_config`](Self::load_config).
    pub fn load_with_env(
        config_path: Option<PathBuf>,
        port_override: Option<u16>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::with_defaults(),
        };

        config.apply_env_overrides(lookup)?;

        if let Some(port) = port_override {
            config.server.port = port;
        }

        if config.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        Ok(config)
    }

    fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Ok(serde_yml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Err(ConfigError::UnsupportedFormat),
        }
    }

    /// Applies the variables recognised by the server. Blank values are
    /// ignored.
    ///
    /// # Errors
    /// Returns an error when `PORT` or `SIMPLECHAT_LOG_FORMAT` cannot be parsed.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(port) = var("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "PORT",
                message: "must be a valid number between 1 and 65535".to_string(),
            })?;
        }
        if let Some(api_url) = var("OPENAI_API_URL") {
            self.upstream.api_url = api_url;
        }
        if let Some(api_key) = var("OPENAI_API_KEY") {
            self.upstream.api_key = Some(api_key);
        }
        if let Some(model_name) = var("MODEL_NAME") {
            self.upstream.model_name = model_name;
        }
        if let Some(level) = var("SIMPLECHAT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("SIMPLECHAT_LOG_FORMAT") {
            self.logging.format = format
                .parse()
                .map_err(|message| ConfigError::InvalidEnv {
                    var: "SIMPLECHAT_LOG_FORMAT",
                    message,
                })?;
        }
        if let Some(static_dir) = var("SIMPLECHAT_STATIC_DIR") {
            let static_dir = PathBuf::from(static_dir);
            self.web.spa_index = static_dir.join("index.html");
            self.web.static_dir = static_dir;
        }
        Ok(())
    }

    /// Whether the proxy holds a credential for the upstream API.
    #[must_use]
    pub fn has_api_key(&self) -> bool {
        self.upstream
            .api_key
            .as_deref()
            .is_some_and(|key| !key.is_empty())
    }

    /// The public view served by `GET /api/config`.
    #[must_use]
    pub fn client_config(&self) -> ClientConfigResponse {
        ClientConfigResponse {
            api_url: self.upstream.api_url.clone(),
            model_name: self.upstream.model_name.clone(),
            has_api_key: self.has_api_key(),
        }
    }

    /// The reset values served by `GET /api/defaults`.
    #[must_use]
    pub fn defaults(&self) -> DefaultsResponse {
        DefaultsResponse {
            api_url: self.upstream.api_url.clone(),
            model_name: self.upstream.model_name.clone(),
            system_prompt: self.upstream.system_prompt.clone(),
            has_api_key: self.has_api_key(),
        }
    }

    /// Validate the complete configuration, collecting every problem found.
    ///
    /// A missing static directory is not an error here; the proxy still
    /// serves the API without a bundled client.
    ///
    /// # Errors
    /// Returns the list of validation messages when anything is invalid.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("Invalid server port. Must be greater than 0.".to_string());
        }

        match Url::parse(&self.upstream.api_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => errors.push(format!(
                "Upstream API URL must use http or https, got '{}'",
                url.scheme()
            )),
            Err(err) => errors.push(format!(
                "Invalid upstream API URL '{}': {err}",
                self.upstream.api_url
            )),
        }

        if self.upstream.max_tokens == 0 {
            errors.push("max_tokens must be greater than 0".to_string());
        }

        if !(0.0..=2.0).contains(&self.upstream.temperature) {
            errors.push(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.upstream.temperature
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
