//! Skein CLI, the process entry point.
//!
//! Commands:
//! - `jobs`    manage the persistent job backlog
//! - `replay`  run a turn against a recorded model stream
//! - `config`  show or initialize configuration

use anyhow::Context;
use clap::{Parser, Subcommand};
use skein_config::{AppConfig, LogFormat};
use std::path::PathBuf;

mod commands;
mod replay;

#[derive(Parser)]
#[command(name = "skein", about = "Skein agent execution core", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to load instead of ~/.skein/config.toml
    #[arg(long, global = true, env = "SKEIN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the job backlog
    Jobs {
        #[command(subcommand)]
        command: commands::jobs::JobsCommand,
    },

    /// Run one turn with a recorded model stream standing in for the model
    Replay(commands::replay::ReplayArgs),

    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: commands::config_cmd::ConfigCommand,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    match path {
        Some(path) => AppConfig::load_at(path).with_context(|| format!("loading {}", path.display())),
        None => AppConfig::load().context("loading configuration"),
    }
}

fn init_tracing(config: &AppConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.logging.level.as_str() };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    match config.logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_tracing(&config, cli.verbose);

    match cli.command {
        Commands::Jobs { command } => commands::jobs::run(&config, command).await,
        Commands::Replay(args) => commands::replay::run(&config, args).await,
        Commands::Config { command } => commands::config_cmd::run(&config, cli.config.as_deref(), command),
    }
}
