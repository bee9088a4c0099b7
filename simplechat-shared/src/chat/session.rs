//! # Chat session
//!
//! [`ChatSession`] is the context object of a running client: it owns the
//! settings, the conversation, and the usage baseline, and it drives one
//! request at a time from validation to the committed reply. Rendering is
//! delegated to a [`ChatRenderer`].

use crate::chat::{
    conversation::{Conversation, Message, SendRejection, Status, StreamingPlaceholder, UsageTotals},
    errors::ChatError,
    stream::{STREAM_TIMEOUT, StreamOutcome, run_stream},
    transport::{ChatTransport, ConfigSource, HttpTransport, MetricsSource},
    usage::UsageReconciler,
};
use crate::config::client::{Settings, SettingsError, SettingsStore, SettingsUpdate, StoredSettings};
use crate::models::ChatCompletionRequest;
use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Instant,
};
use thiserror::Error;
use tokio::time::timeout_at;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Failures of session operations other than [`ChatSession::send`].
#[derive(Debug, Error)]
pub enum SessionError {
    /// The settings store failed.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// The proxy could not be reached.
    #[error(transparent)]
    Chat(#[from] ChatError),

    /// The conversation refused the operation.
    #[error(transparent)]
    Rejected(#[from] SendRejection),
}

/// Side effects of the state machine on whatever displays it.
///
/// Every method defaults to doing nothing.
pub trait ChatRenderer {
    /// Called whenever the status line changes.
    fn on_status(&mut self, _status: Status) {}

    /// Called with the user message a send just logged.
    fn on_user_message(&mut self, _message: &Message) {}

    /// Called once the placeholder for the reply is open.
    fn on_stream_start(&mut self, _placeholder: &StreamingPlaceholder) {}

    /// Called for every content token after the placeholder absorbed it.
    fn on_token(&mut self, _placeholder: &StreamingPlaceholder, _token: &str) {}

    /// Called with the committed assistant reply or error entry.
    fn on_message(&mut self, _message: &Message, _totals: &UsageTotals) {}
}

/// The remote collaborators of a session.
#[derive(Clone)]
pub struct SessionBackend {
    /// Completion requests.
    pub chat: Arc<dyn ChatTransport>,
    /// Metrics scrapes.
    pub metrics: Arc<dyn MetricsSource>,
    /// Proxy configuration.
    pub config: Arc<dyn ConfigSource>,
}

impl fmt::Debug for SessionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionBackend").finish_non_exhaustive()
    }
}

impl SessionBackend {
    /// Uses one HTTP transport for every boundary.
    #[must_use]
    pub fn http(transport: HttpTransport) -> Self {
        let transport = Arc::new(transport);
        Self {
            chat: transport.clone(),
            metrics: transport.clone(),
            config: transport,
        }
    }
}

/// Cancels whichever request is in flight when [`abort`](Self::abort) runs.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    current: Arc<Mutex<CancellationToken>>,
}

impl AbortHandle {
    /// Cancels the current request, if any.
    pub fn abort(&self) {
        if let Ok(token) = self.current.lock() {
            token.cancel();
        }
    }
}

/// A running chat client.
pub struct ChatSession {
    settings: Settings,
    conversation: Conversation,
    reconciler: UsageReconciler,
    backend: SessionBackend,
    store: Box<dyn SettingsStore>,
    lifetime: CancellationToken,
    in_flight: Arc<Mutex<CancellationToken>>,
}

impl fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSession")
            .field("settings", &self.settings)
            .field("conversation", &self.conversation)
            .field("reconciler", &self.reconciler)
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// Resolves settings from the proxy config, the persisted blob and
    /// `overrides`, then seeds the usage baseline with a first scrape.
    ///
    /// # Errors
    /// Returns an error when the settings store cannot be read.
    #[instrument(skip_all)]
    pub async fn bootstrap(
        backend: SessionBackend,
        store: Box<dyn SettingsStore>,
        overrides: Option<StoredSettings>,
    ) -> Result<Self, SettingsError> {
        let server = backend.config.server_config().await;
        let stored = Settings::load_stored(store.as_ref())?;
        let local = match (stored, overrides) {
            (Some(stored), Some(overrides)) => Some(stored.layered(overrides)),
            (stored, overrides) => stored.or(overrides),
        };
        let settings = Settings::resolve(server.as_ref(), local);

        let baseline = backend.metrics.fetch_metrics(&settings).await;
        let reconciler = UsageReconciler::initialize(baseline);
        let lifetime = CancellationToken::new();
        let in_flight = Arc::new(Mutex::new(lifetime.child_token()));

        info!(
            api_url = %settings.api_url,
            model = %settings.model_name,
            proxy = settings.use_server_proxy,
            "chat session ready"
        );

        Ok(Self {
            conversation: Conversation::new(Status::ready_for(&settings)),
            settings,
            reconciler,
            backend,
            store,
            lifetime,
            in_flight,
        })
    }

    /// Current settings.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The log and the request state.
    #[must_use]
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// A handle that can cancel requests from another task.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            current: Arc::clone(&self.in_flight),
        }
    }

    /// Sends `input` and streams the reply into `renderer`.
    ///
    /// Transport failures, timeouts and aborts do not surface as errors:
    /// they end up in the log as a system message. Dropping the returned
    /// future mid-stream logs the request as cancelled.
    ///
    /// # Errors
    /// Returns the [`SendRejection`] when the input fails validation.
    #[instrument(skip_all)]
    pub async fn send(
        &mut self,
        input: &str,
        renderer: &mut dyn ChatRenderer,
    ) -> Result<(), SendRejection> {
        let started = Instant::now();
        let request = match self.conversation.begin(input, &self.settings, started) {
            Ok(request) => request,
            Err(rejection) => {
                renderer.on_status(self.conversation.status());
                return Err(rejection);
            }
        };

        if let Some(message) = self.conversation.messages().last() {
            renderer.on_user_message(message);
        }
        renderer.on_status(self.conversation.status());
        if let Some(placeholder) = self.conversation.placeholder() {
            renderer.on_stream_start(placeholder);
        }

        let guard = InFlight { session: self };
        let session = &mut *guard.session;
        let cancel = session.arm_cancellation();
        let committed = match session.stream_reply(&request, &cancel, renderer).await {
            Ok(outcome) => {
                let finished = Instant::now();
                session.conversation.mark_finalizing();
                let metrics = session.backend.metrics.fetch_metrics(&session.settings).await;
                session
                    .conversation
                    .finalize(&outcome, metrics, &mut session.reconciler, finished)
                    .is_some()
            }
            Err(err) => {
                session.conversation.fail(&err);
                true
            }
        };

        if committed && let Some(message) = session.conversation.messages().last() {
            renderer.on_message(message, session.conversation.totals());
        }
        renderer.on_status(session.conversation.status());
        Ok(())
    }

    /// Sends the `nth` most recent user message again; the earlier copy
    /// stays in the log.
    ///
    /// # Errors
    /// Returns [`SendRejection::Empty`] when there is no such message, or
    /// any rejection of [`send`](Self::send).
    pub async fn resend(
        &mut self,
        nth: usize,
        renderer: &mut dyn ChatRenderer,
    ) -> Result<(), SendRejection> {
        let Some(content) = self.conversation.user_message(nth).map(str::to_owned) else {
            return Err(SendRejection::Empty);
        };
        debug!(nth, "resending user message");
        self.send(&content, renderer).await
    }

    /// Empties the log and the running totals.
    ///
    /// # Errors
    /// Returns [`SendRejection::AlreadyLoading`] while a reply is streaming.
    pub fn clear(&mut self) -> Result<(), SendRejection> {
        self.conversation.clear()
    }

    /// Applies a settings-form submission and persists it.
    ///
    /// # Errors
    /// Returns an error when the settings cannot be persisted.
    pub fn save_settings(&mut self, update: SettingsUpdate) -> Result<(), SettingsError> {
        self.settings.apply_update(update);
        self.settings.persist(self.store.as_ref())?;
        self.conversation.set_status(Status::SettingsSaved);
        Ok(())
    }

    /// Flips dark mode, persists it and returns the new value.
    ///
    /// # Errors
    /// Returns an error when the settings cannot be persisted.
    pub fn toggle_theme(&mut self) -> Result<bool, SettingsError> {
        let dark = self.settings.toggle_theme();
        self.settings.persist(self.store.as_ref())?;
        Ok(dark)
    }

    /// Restores the proxy's defaults and persists them.
    ///
    /// # Errors
    /// Returns an error when the defaults cannot be fetched or persisted.
    pub async fn reset_settings(&mut self) -> Result<(), SessionError> {
        let defaults = self.backend.config.defaults().await?;
        self.settings.reset_to(&defaults);
        self.settings.persist(self.store.as_ref())?;
        self.conversation.set_status(Status::ready_for(&self.settings));
        Ok(())
    }

    /// Cancels any in-flight request.
    ///
    /// Settings are only written by explicit saves, resets and theme
    /// toggles, so values passed in as overrides are never persisted here.
    pub fn shutdown(self) {
        self.lifetime.cancel();
        debug!("chat session closed");
    }

    /// Installs a fresh token for the next request so that an earlier
    /// abort does not cancel it.
    fn arm_cancellation(&self) -> CancellationToken {
        let token = self.lifetime.child_token();
        if let Ok(mut current) = self.in_flight.lock() {
            current.clone_from(&token);
        }
        token
    }

    async fn stream_reply(
        &mut self,
        request: &ChatCompletionRequest,
        cancel: &CancellationToken,
        renderer: &mut dyn ChatRenderer,
    ) -> Result<StreamOutcome, ChatError> {
        let deadline = tokio::time::Instant::now() + STREAM_TIMEOUT;
        let timed_out = || ChatError::Timeout {
            seconds: STREAM_TIMEOUT.as_secs(),
        };

        let stream = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ChatError::Aborted),
            opened = timeout_at(deadline, self.backend.chat.open_stream(&self.settings, request)) => {
                opened.map_err(|_| timed_out())??
            }
        };

        let conversation = &mut self.conversation;
        run_stream(stream, deadline, cancel, |event| {
            if event.is_final {
                return;
            }
            if let Some(placeholder) = conversation.apply_token(&event.token) {
                renderer.on_token(placeholder, &event.token);
            }
        })
        .await
    }
}

/// Logs the request in flight as cancelled when a `send` future is dropped
/// before it finished.
struct InFlight<'a> {
    session: &'a mut ChatSession,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let conversation = &mut self.session.conversation;
        if conversation.is_loading() {
            debug!("send dropped while a reply was in flight");
            conversation.fail(&ChatError::Aborted);
        }
    }
}
