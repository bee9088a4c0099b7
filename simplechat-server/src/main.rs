#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(warnings, clippy::pedantic)]
#![allow(clippy::multiple_crate_versions)] // TODO(deps-001): remove once transitive dependencies converge.

//! Main entry point for the `SimpleChat` proxy server.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use server::server;
use shared::config::server::Config;
use std::path::PathBuf;

/// Command line of the `SimpleChat` proxy server
#[derive(Debug, Parser)]
#[command(name = "simplechat-server")]
#[command(about = "OpenAI-compatible proxy for the SimpleChat client", long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands of the proxy server.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the proxy server
    Serve {
        /// Port to bind; overrides `PORT` and the configuration file.
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to a YAML or JSON configuration file.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },
}

/// Loads `.env` and parses the command line.
#[must_use]
pub fn initialize_cli() -> Cli {
    dotenv().ok();
    Cli::parse()
}

/// Resolves the configuration and runs the server until shutdown.
///
/// # Errors
/// Returns an error if configuration loading or server startup fails.
pub async fn handle_serve_command(port: Option<u16>, config: Option<PathBuf>) -> anyhow::Result<()> {
    let resolved_config = Config::load_config(config, port)?;
    server::run(resolved_config).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = initialize_cli();

    match cli.command {
        Commands::Serve { port, config } => handle_serve_command(port, config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_accepts_optional_port_and_config() {
        let cli = Cli::try_parse_from(["simplechat-server", "serve"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Serve {
                port: None,
                config: None
            }
        ));

        let cli = Cli::try_parse_from([
            "simplechat-server",
            "serve",
            "--port",
            "8080",
            "--config",
            "server.yaml",
        ])
        .unwrap();
        let Commands::Serve { port, config } = cli.command;
        assert_eq!(port, Some(8080));
        assert_eq!(config, Some(PathBuf::from("server.yaml")));
    }

    #[test]
    fn zero_port_is_refused() {
        let result = Config::load_config(None, Some(0));
        assert!(result.is_err());
    }
}
