//! Client-side settings and their local key-value persistence.
//!
//! Settings are seeded from the proxy's `/api/config`, then overridden by the
//! values the user saved locally. The whole entity is stored as one JSON blob
//! under [`SETTINGS_KEY`].

use crate::config::{DEFAULT_API_URL, DEFAULT_MODEL_NAME, DEFAULT_SYSTEM_PROMPT};
use crate::models::{ClientConfigResponse, DefaultsResponse};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::PathBuf,
    sync::Mutex,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Storage key of the persisted settings blob.
pub const SETTINGS_KEY: &str = "chatui_settings";

/// Placeholder older clients stored instead of a key while in proxy mode.
const SERVER_CONFIGURED_PLACEHOLDER: &str = "server-configured";

/// Failures of the settings store.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read or written.
    #[error("settings storage I/O failed for {path}: {source}")]
    Io {
        /// The settings file.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The store file is not a JSON object of strings.
    #[error("settings storage is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// No home directory to put the settings in.
    #[error("no configuration directory is available on this platform")]
    NoConfigDir,
}

/// Local key-value storage holding string blobs.
pub trait SettingsStore: Send + Sync {
    /// Reads the blob stored under `key`.
    ///
    /// # Errors
    /// Returns an error when the backing storage cannot be read.
    fn load(&self, key: &str) -> Result<Option<String>, SettingsError>;

    /// Replaces the blob stored under `key`.
    ///
    /// # Errors
    /// Returns an error when the backing storage cannot be written.
    fn save(&self, key: &str, value: &str) -> Result<(), SettingsError>;
}

/// Stores every key in one JSON object on disk.
#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
}

impl FileSettingsStore {
    /// A store backed by the file at `path`, created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Opens the store in the platform configuration directory.
    ///
    /// # Errors
    /// Returns [`SettingsError::NoConfigDir`] when no home directory exists.
    pub fn in_config_dir() -> Result<Self, SettingsError> {
        let dirs =
            ProjectDirs::from("dev", "simplechat", "simplechat").ok_or(SettingsError::NoConfigDir)?;
        Ok(Self::new(dirs.config_dir().join("storage.json")))
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, SettingsError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(source) => Err(SettingsError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl SettingsStore for FileSettingsStore {
    fn load(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.read_all()?.remove(key))
    }

    fn save(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());

        let io_err = |source| SettingsError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&entries)?).map_err(io_err)
    }
}

/// In-memory store, used when no disk persistence is wanted.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self
            .entries
            .lock()
            .map(|entries| entries.get(key).cloned())
            .unwrap_or_default())
    }

    fn save(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }
}

/// The persisted blob as read back; every field may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredSettings {
    /// See [`Settings::api_url`].
    pub api_url: Option<String>,
    /// See [`Settings::api_key`].
    pub api_key: Option<String>,
    /// See [`Settings::model_name`].
    pub model_name: Option<String>,
    /// See [`Settings::system_prompt`].
    pub system_prompt: Option<String>,
    /// See [`Settings::use_server_proxy`].
    pub use_server_proxy: Option<bool>,
    /// See [`Settings::dark_mode`].
    pub dark_mode: Option<bool>,
}

impl StoredSettings {
    /// Fields set in `over` replace the ones in `self`.
    #[must_use]
    pub fn layered(self, over: Self) -> Self {
        Self {
            api_url: over.api_url.or(self.api_url),
            api_key: over.api_key.or(self.api_key),
            model_name: over.model_name.or(self.model_name),
            system_prompt: over.system_prompt.or(self.system_prompt),
            use_server_proxy: over.use_server_proxy.or(self.use_server_proxy),
            dark_mode: over.dark_mode.or(self.dark_mode),
        }
    }
}

/// Values entered in the settings form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    /// Blank restores the default URL.
    pub api_url: String,
    /// Blank keeps proxy mode, or clears a local key.
    pub api_key: String,
    /// Blank restores the default model.
    pub model_name: String,
    /// Blank restores the default prompt.
    pub system_prompt: String,
}

/// Whether requests can be sent, and how they are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    /// The proxy injects the credential server-side.
    ServerProxy,
    /// The client sends its own bearer credential.
    Direct,
    /// Sends are refused until a key is configured.
    Missing,
}

/// Process-wide client settings.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Base URL of the OpenAI-compatible API.
    pub api_url: String,
    /// Local bearer credential; empty in proxy mode.
    pub api_key: String,
    /// Model to request.
    pub model_name: String,
    /// Prepended to every request.
    pub system_prompt: String,
    /// Whether requests go through the proxy's `/api/chat`.
    pub use_server_proxy: bool,
    /// Terminal theme.
    pub dark_mode: bool,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("api_url", &self.api_url)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "***" })
            .field("model_name", &self.model_name)
            .field("system_prompt", &self.system_prompt)
            .field("use_server_proxy", &self.use_server_proxy)
            .field("dark_mode", &self.dark_mode)
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_key: String::new(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            use_server_proxy: false,
            dark_mode: false,
        }
    }
}

impl Settings {
    /// Builds the startup settings from the server view and the local blob.
    ///
    /// Local values that merely repeat the built-in defaults do not override
    /// what the server announced, and a locally saved key switches the client
    /// out of proxy mode.
    #[must_use]
    pub fn resolve(server: Option<&ClientConfigResponse>, local: Option<StoredSettings>) -> Self {
        let mut settings = Self::default();

        if let Some(server) = server {
            settings.api_url.clone_from(&server.api_url);
            settings.model_name.clone_from(&server.model_name);
            settings.use_server_proxy = server.has_api_key;
        }

        let Some(local) = local else {
            return settings;
        };

        if let Some(api_url) = local.api_url.filter(|url| !url.is_empty() && url != DEFAULT_API_URL)
        {
            settings.api_url = api_url;
        }
        if let Some(model_name) = local
            .model_name
            .filter(|model| !model.is_empty() && model != DEFAULT_MODEL_NAME)
        {
            settings.model_name = model_name;
        }
        if let Some(api_key) = local
            .api_key
            .filter(|key| !key.is_empty() && key != SERVER_CONFIGURED_PLACEHOLDER)
        {
            settings.api_key = api_key;
            settings.use_server_proxy = false;
        }
        if let Some(system_prompt) = local.system_prompt.filter(|prompt| !prompt.is_empty()) {
            settings.system_prompt = system_prompt;
        }
        if let Some(dark_mode) = local.dark_mode {
            settings.dark_mode = dark_mode;
        }

        settings
    }

    /// Reads the persisted blob, treating a corrupt one as absent.
    ///
    /// # Errors
    /// Returns an error only when the store itself cannot be read.
    pub fn load_stored(store: &dyn SettingsStore) -> Result<Option<StoredSettings>, SettingsError> {
        let Some(raw) = store.load(SETTINGS_KEY)? else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(stored) => Ok(Some(stored)),
            Err(err) => {
                warn!(error = %err, "ignoring unreadable persisted settings");
                Ok(None)
            }
        }
    }

    /// Writes the whole entity under [`SETTINGS_KEY`].
    ///
    /// # Errors
    /// Returns an error when the store rejects the write.
    pub fn persist(&self, store: &dyn SettingsStore) -> Result<(), SettingsError> {
        let blob = serde_json::to_string(self)?;
        store.save(SETTINGS_KEY, &blob)?;
        debug!("settings persisted");
        Ok(())
    }

    /// Applies a settings-form submission; blank fields fall back to defaults.
    pub fn apply_update(&mut self, update: SettingsUpdate) {
        self.api_url = non_blank_or(&update.api_url, DEFAULT_API_URL);
        self.model_name = non_blank_or(&update.model_name, DEFAULT_MODEL_NAME);
        self.system_prompt = non_blank_or(&update.system_prompt, DEFAULT_SYSTEM_PROMPT);

        let api_key = update.api_key.trim();
        if !api_key.is_empty() {
            self.api_key = api_key.to_string();
            self.use_server_proxy = false;
        } else if !self.use_server_proxy {
            self.api_key.clear();
        }
    }

    /// Restores the values served by `/api/defaults`, keeping the theme.
    pub fn reset_to(&mut self, defaults: &DefaultsResponse) {
        self.api_url.clone_from(&defaults.api_url);
        self.model_name.clone_from(&defaults.model_name);
        self.system_prompt.clone_from(&defaults.system_prompt);
        self.api_key.clear();
        self.use_server_proxy = defaults.has_api_key;
    }

    /// Flips dark mode and returns the new value.
    pub fn toggle_theme(&mut self) -> bool {
        self.dark_mode = !self.dark_mode;
        self.dark_mode
    }

    /// How the next request would be authenticated.
    #[must_use]
    pub fn credential_mode(&self) -> CredentialMode {
        if self.use_server_proxy {
            CredentialMode::ServerProxy
        } else if self.api_key.is_empty() {
            CredentialMode::Missing
        } else {
            CredentialMode::Direct
        }
    }
}

fn non_blank_or(value: &str, fallback: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
