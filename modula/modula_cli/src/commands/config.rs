//! Configuration validation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use modula_runtime::FrameworkConfig;

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate a configuration file and print it with defaults filled in
    Check {
        /// Framework configuration file
        path: PathBuf,
    },

    /// Print the default configuration
    Default,
}

/// Run a configuration subcommand.
pub fn execute(command: ConfigCommand) -> Result<()> {
    let config = match command {
        ConfigCommand::Check { path } => FrameworkConfig::load(&path)
            .with_context(|| format!("Invalid configuration {}", path.display()))?,
        ConfigCommand::Default => FrameworkConfig::default(),
    };
    let rendered = toml::to_string_pretty(&config).context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}
