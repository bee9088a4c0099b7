use shared::config::server::Config;
use std::sync::Arc;

/// State shared by every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub(crate) config: Arc<Config>,
    pub(crate) client: reqwest::Client,
}

impl AppState {
    /// Bundles the resolved configuration with the upstream HTTP client.
    #[must_use]
    pub fn new(config: Arc<Config>, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    /// The resolved server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }
}
