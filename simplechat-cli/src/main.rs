//! Main entry point for the `SimpleChat` command-line client.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use server::server;
use shared::config::server::Config;
use std::path::PathBuf;

mod commands;

/// `SimpleChat` CLI
#[derive(Parser)]
#[command(name = "simplechat")]
#[command(about = "Streaming chat client for OpenAI-compatible APIs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat(commands::chat::ChatArgs),

    /// Start the proxy server
    Serve {
        /// Port to bind; overrides `PORT` and the configuration file.
        #[arg(long, short)]
        port: Option<u16>,

        /// Path to a YAML or JSON configuration file.
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell to generate the script for (bash, zsh, fish, powershell, elvish)
        #[arg(long, short)]
        shell: String,
    },

    /// Generate a server configuration file with the defaults
    Config {
        /// Format of the file to generate (yaml or json). Defaults to yaml.
        #[arg(long, short)]
        format: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat(args) => commands::chat::start_chat(args).await?,
        Commands::Serve { port, config } => {
            let resolved_config = Config::load_config(config, port)?;
            server::run(resolved_config).await?;
        }
        Commands::Completion { shell } => {
            let shell = shell
                .parse::<clap_complete::Shell>()
                .map_err(|err| anyhow::anyhow!(err))
                .with_context(|| format!("unsupported shell '{shell}'"))?;
            commands::completion::generate_completion(shell);
        }
        Commands::Config { format } => {
            let format = format.unwrap_or_else(|| "yaml".to_string());
            commands::config::generate_config(&format)?;
        }
    }

    Ok(())
}
