//! `skein config`: inspect and initialize configuration.

use anyhow::{Context, bail};
use clap::Subcommand;
use skein_config::AppConfig;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn run(config: &AppConfig, explicit: Option<&Path>, command: ConfigCommand) -> anyhow::Result<()> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));

    match command {
        ConfigCommand::Show => {
            println!("{}", toml::to_string_pretty(config).context("serializing config")?);
        }
        ConfigCommand::Path => println!("{}", path.display()),
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::write(&path, AppConfig::default_toml())
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
