//! Interactive terminal chat.
//!
//! Lines typed at the prompt are sent as user messages; lines starting with
//! `/` are REPL commands. Replies stream into a [`TerminalRenderer`], which
//! prints only the visible part of the answer and summarizes the reasoning.

use anyhow::{Context, Result};
use clap::Args;
use colored::{Color, Colorize};
use shared::{
    MessageRole,
    chat::{
        ChatRenderer, ChatSession, HttpTransport, Message, Status, StreamingPlaceholder,
        UsageTotals, session::SessionBackend, think::THINK_START,
    },
    config::client::{
        CredentialMode, FileSettingsStore, Settings, SettingsStore, SettingsUpdate, StoredSettings,
    },
};
use std::{
    fmt::Display,
    io::{self, Write},
    path::PathBuf,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinHandle,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// `SimpleChat` proxy server base URL
    #[arg(long, default_value = "http://localhost:3000")]
    pub server: String,

    /// OpenAI-compatible API base URL (e.g. <http://localhost:8000/v1>)
    #[arg(long)]
    pub api_url: Option<String>,

    /// API key sent as a bearer token; switches off proxy mode
    #[arg(long)]
    pub api_key: Option<String>,

    /// Model to request
    #[arg(long, short)]
    pub model: Option<String>,

    /// System prompt sent with every request
    #[arg(long, short)]
    pub system: Option<String>,

    /// Settings file to use instead of the platform configuration directory
    #[arg(long)]
    pub settings_file: Option<PathBuf>,
}

impl ChatArgs {
    fn overrides(&self) -> Option<StoredSettings> {
        let overrides = StoredSettings {
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            model_name: self.model.clone(),
            system_prompt: self.system.clone(),
            ..StoredSettings::default()
        };
        (overrides != StoredSettings::default()).then_some(overrides)
    }
}

/// Runs the chat REPL until `/quit`, end of input or Ctrl+C at the prompt.
///
/// # Errors
/// Returns an error if the server URL is invalid, the settings store cannot
/// be opened, or reading stdin fails.
pub async fn start_chat(args: ChatArgs) -> Result<()> {
    init_tracing();

    let origin = Url::parse(&args.server)
        .with_context(|| format!("invalid server URL '{}'", args.server))?;
    let transport = HttpTransport::new(Some(origin))?;
    let store: Box<dyn SettingsStore> = match &args.settings_file {
        Some(path) => Box::new(FileSettingsStore::new(path)),
        None => Box::new(FileSettingsStore::in_config_dir()?),
    };

    let mut session =
        ChatSession::bootstrap(SessionBackend::http(transport), store, args.overrides()).await?;
    let mut renderer = TerminalRenderer::new(io::stdout(), session.settings().dark_mode);
    renderer.banner(session.settings(), session.conversation().status());

    let outcome = run_repl(&mut session, &mut renderer).await;
    session.shutdown();
    outcome
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn run_repl<W: Write>(
    session: &mut ChatSession,
    renderer: &mut TerminalRenderer<W>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        renderer.prompt();
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read input")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match parse_command(&line) {
            Ok(ReplCommand::Quit) => break,
            Ok(command) => execute(session, renderer, command).await?,
            Err(message) => renderer.notice(&message, true),
        }
    }

    renderer.notice("Bye.", false);
    Ok(())
}

async fn execute<W: Write>(
    session: &mut ChatSession,
    renderer: &mut TerminalRenderer<W>,
    command: ReplCommand,
) -> Result<()> {
    match command {
        ReplCommand::Send(text) => {
            let _abort = CtrlCAbort::arm(session);
            if let Err(rejection) = session.send(&text, renderer).await {
                debug!(%rejection, "message not sent");
            }
        }
        ReplCommand::Resend(nth) => {
            let _abort = CtrlCAbort::arm(session);
            match session.resend(nth, renderer).await {
                Err(rejection) if session.conversation().user_message(nth).is_none() => {
                    debug!(%rejection, nth, "nothing to resend");
                    renderer.notice(&format!("No user message #{nth} to resend"), true);
                }
                Err(rejection) => debug!(%rejection, "message not resent"),
                Ok(()) => {}
            }
        }
        ReplCommand::Clear => match session.clear() {
            Ok(()) => renderer.on_status(session.conversation().status()),
            Err(rejection) => renderer.notice(&rejection.to_string(), true),
        },
        ReplCommand::Settings => renderer.show_settings(session.settings()),
        ReplCommand::Save(assignments) => {
            let update = build_update(session.settings(), &assignments);
            session.save_settings(update)?;
            renderer.on_status(session.conversation().status());
            renderer.show_settings(session.settings());
        }
        ReplCommand::Reset => match session.reset_settings().await {
            Ok(()) => {
                renderer.notice("Settings reset to server defaults", false);
                renderer.show_settings(session.settings());
            }
            Err(err) => renderer.notice(&format!("Could not reset settings: {err}"), true),
        },
        ReplCommand::Theme => {
            let dark = session.toggle_theme()?;
            renderer.set_dark(dark);
            renderer.notice(if dark { "Dark theme" } else { "Light theme" }, false);
        }
        ReplCommand::Help => renderer.help(),
        ReplCommand::Quit => {}
    }
    Ok(())
}

/// Turns Ctrl+C into an abort of the in-flight request while it lives.
#[derive(Debug)]
struct CtrlCAbort(JoinHandle<()>);

impl CtrlCAbort {
    fn arm(session: &ChatSession) -> Self {
        let handle = session.abort_handle();
        Self(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                handle.abort();
            }
        }))
    }
}

impl Drop for CtrlCAbort {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettingField {
    ApiUrl,
    ApiKey,
    Model,
    SystemPrompt,
}

impl SettingField {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "api_url" | "url" => Some(Self::ApiUrl),
            "api_key" | "key" => Some(Self::ApiKey),
            "model" | "model_name" => Some(Self::Model),
            "system" | "system_prompt" => Some(Self::SystemPrompt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Send(String),
    Clear,
    Resend(usize),
    Settings,
    Save(Vec<(SettingField, String)>),
    Reset,
    Theme,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let Some(rest) = line.trim().strip_prefix('/') else {
        return Ok(ReplCommand::Send(line.to_string()));
    };
    let (name, args) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(name, args)| (name, args.trim()));

    match name {
        "quit" | "exit" => Ok(ReplCommand::Quit),
        "clear" => Ok(ReplCommand::Clear),
        "resend" if args.is_empty() => Ok(ReplCommand::Resend(1)),
        "resend" => args
            .parse::<usize>()
            .ok()
            .filter(|nth| *nth > 0)
            .map(ReplCommand::Resend)
            .ok_or_else(|| format!("/resend expects a positive number, got '{args}'")),
        "settings" => Ok(ReplCommand::Settings),
        "save" => parse_assignments(args).map(ReplCommand::Save),
        "reset" => Ok(ReplCommand::Reset),
        "theme" => Ok(ReplCommand::Theme),
        "help" => Ok(ReplCommand::Help),
        other => Err(format!("Unknown command '/{other}'. Type /help for the list.")),
    }
}

/// Parses `key=value` pairs; words without a known `key=` continue the
/// previous value, so `system=Be brief.` needs no quoting.
fn parse_assignments(args: &str) -> Result<Vec<(SettingField, String)>, String> {
    let mut assignments: Vec<(SettingField, String)> = Vec::new();

    for word in args.split_whitespace() {
        let assignment = word
            .split_once('=')
            .and_then(|(name, value)| SettingField::parse(name).map(|field| (field, value)));
        match (assignment, assignments.last_mut()) {
            (Some((field, value)), _) => assignments.push((field, value.to_string())),
            (None, Some((_, value))) => {
                value.push(' ');
                value.push_str(word);
            }
            (None, None) => return Err(format!("Expected key=value, got '{word}'")),
        }
    }

    if assignments.is_empty() {
        return Err("Usage: /save api_url=URL api_key=KEY model=NAME system=PROMPT".to_string());
    }
    Ok(assignments)
}

/// The settings form as it would be submitted: current values with the
/// assigned fields replaced.
fn build_update(settings: &Settings, assignments: &[(SettingField, String)]) -> SettingsUpdate {
    let mut update = SettingsUpdate {
        api_url: settings.api_url.clone(),
        api_key: if settings.use_server_proxy {
            String::new()
        } else {
            settings.api_key.clone()
        },
        model_name: settings.model_name.clone(),
        system_prompt: settings.system_prompt.clone(),
    };

    for (field, value) in assignments {
        let target = match field {
            SettingField::ApiUrl => &mut update.api_url,
            SettingField::ApiKey => &mut update.api_key,
            SettingField::Model => &mut update.model_name,
            SettingField::SystemPrompt => &mut update.system_prompt,
        };
        target.clone_from(value);
    }
    update
}

/// Lines printed under a reply: its usage and speed, the server
/// performance, then the running total of the conversation.
fn format_stats(message: &Message, totals: &UsageTotals) -> Vec<String> {
    let mut lines = Vec::new();

    let speed = (message.tokens_per_second > 0)
        .then(|| format!("{} tok/s", message.tokens_per_second));
    match (&message.usage, speed) {
        (Some(usage), speed) => lines.push(format!(
            "Tokens: {} completion / {} prompt / {} total{}",
            usage.completion_tokens,
            usage.prompt_tokens,
            usage.total_tokens,
            speed.map(|speed| format!(" | {speed}")).unwrap_or_default()
        )),
        (None, Some(speed)) => lines.push(speed),
        (None, None) => {}
    }

    if let Some(metrics) = &message.metrics {
        lines.push(format!(
            "Performance: {}ms/token | Cache: {}% | Queue: {} waiting, {} running",
            metrics.time_per_output_token_ms,
            metrics.cache_usage_percent,
            metrics.requests_waiting,
            metrics.requests_running
        ));
    }

    if totals.total_tokens > 0 {
        lines.push(format!(
            "Total: {} tokens ({} completion + {} prompt)",
            totals.total_tokens, totals.completion_tokens, totals.prompt_tokens
        ));
    }
    lines
}

/// `visible` without a trailing fragment that may still grow into a
/// `<think>` marker.
fn settled_prefix(visible: &str) -> &str {
    for len in (1..THINK_START.len()).rev() {
        let Some(cut) = visible.len().checked_sub(len) else {
            continue;
        };
        if visible.is_char_boundary(cut)
            && visible.as_bytes()[cut..].eq_ignore_ascii_case(&THINK_START.as_bytes()[..len])
        {
            return visible[..cut].trim_end();
        }
    }
    visible
}

fn mode_label(settings: &Settings) -> &'static str {
    match settings.credential_mode() {
        CredentialMode::ServerProxy => "server proxy",
        CredentialMode::Direct => "direct API",
        CredentialMode::Missing => "no API key",
    }
}

/// Prints the conversation to a terminal-like writer.
#[derive(Debug)]
pub(crate) struct TerminalRenderer<W: Write> {
    out: W,
    dark: bool,
    /// Visible answer text already printed for the current stream.
    shown: String,
    reasoning_noted: bool,
}

impl<W: Write> TerminalRenderer<W> {
    pub(crate) const fn new(out: W, dark: bool) -> Self {
        Self {
            out,
            dark,
            shown: String::new(),
            reasoning_noted: false,
        }
    }

    pub(crate) const fn set_dark(&mut self, dark: bool) {
        self.dark = dark;
    }

    const fn accent(&self) -> Color {
        if self.dark {
            Color::BrightCyan
        } else {
            Color::Blue
        }
    }

    fn emit(&mut self, text: impl Display) {
        if let Err(err) = write!(self.out, "{text}").and_then(|()| self.out.flush()) {
            debug!(error = %err, "terminal write failed");
        }
    }

    fn prompt(&mut self) {
        self.emit(format!("{} ", ">".color(self.accent()).bold()));
    }

    fn banner(&mut self, settings: &Settings, status: Status) {
        let title = format!("SimpleChat | {} | {}", settings.model_name, mode_label(settings));
        self.emit(format!("{}\n", title.color(self.accent()).bold()));
        self.notice(&status.to_string(), status.is_error());
        self.emit(format!("{}\n", "Type /help for commands.".dimmed()));
    }

    fn notice(&mut self, text: &str, is_error: bool) {
        let line = if is_error {
            text.red().to_string()
        } else {
            text.dimmed().to_string()
        };
        self.emit(format!("{line}\n"));
    }

    fn show_settings(&mut self, settings: &Settings) {
        let key = if settings.api_key.is_empty() {
            "(none)"
        } else {
            "(set)"
        };
        let rows = [
            ("api_url", settings.api_url.as_str()),
            ("api_key", key),
            ("model", settings.model_name.as_str()),
            ("system", settings.system_prompt.as_str()),
            ("mode", mode_label(settings)),
            ("theme", if settings.dark_mode { "dark" } else { "light" }),
        ];
        for (name, value) in rows {
            self.emit(format!("  {:<8} {value}\n", name.bold()));
        }
    }

    fn help(&mut self) {
        const COMMANDS: [(&str, &str); 8] = [
            ("/clear", "start a new conversation"),
            ("/resend [n]", "send the n-th latest message again (default 1)"),
            ("/settings", "show the current settings"),
            ("/save key=value...", "update api_url, api_key, model or system"),
            ("/reset", "restore the server defaults"),
            ("/theme", "toggle dark mode"),
            ("/help", "show this list"),
            ("/quit", "leave"),
        ];
        for (command, description) in COMMANDS {
            self.emit(format!("  {:<20} {}\n", command.bold(), description.dimmed()));
        }
    }
}

impl<W: Write> ChatRenderer for TerminalRenderer<W> {
    fn on_status(&mut self, status: Status) {
        if status.is_error() || matches!(status, Status::Cleared | Status::SettingsSaved) {
            self.notice(&status.to_string(), status.is_error());
        }
    }

    fn on_stream_start(&mut self, _placeholder: &StreamingPlaceholder) {
        self.shown.clear();
        self.reasoning_noted = false;
        self.emit(format!("{} ", "assistant:".color(self.accent()).bold()));
    }

    fn on_token(&mut self, placeholder: &StreamingPlaceholder, _token: &str) {
        let split = placeholder.split();

        if !self.reasoning_noted
            && self.shown.is_empty()
            && (!split.segments.is_empty()
                || placeholder.raw().to_ascii_lowercase().contains(THINK_START))
        {
            self.reasoning_noted = true;
            self.emit(format!("{} ", "(thinking)".dimmed().italic()));
        }

        let Some(delta) = settled_prefix(&split.visible).strip_prefix(self.shown.as_str()) else {
            return;
        };
        if delta.is_empty() {
            return;
        }
        let delta = delta.to_string();
        self.shown.push_str(&delta);
        self.emit(delta);
    }

    fn on_message(&mut self, message: &Message, totals: &UsageTotals) {
        match message.role {
            MessageRole::Assistant => {
                match message.content.strip_prefix(self.shown.as_str()) {
                    Some(rest) => self.emit(format!("{rest}\n")),
                    None => self.emit(format!("\n{}\n", message.content)),
                }
                if !message.reasoning.is_empty() {
                    let chars: usize = message.reasoning.iter().map(|s| s.chars().count()).sum();
                    self.notice(
                        &format!(
                            "reasoning: {} segment(s), {chars} chars",
                            message.reasoning.len()
                        ),
                        false,
                    );
                }
                for line in format_stats(message, totals) {
                    self.notice(&line, false);
                }
            }
            MessageRole::System => {
                if !self.shown.is_empty() {
                    self.emit("\n");
                }
                self.notice(&message.content, true);
            }
            MessageRole::User => {}
        }
        self.shown.clear();
    }
}
