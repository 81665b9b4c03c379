//! Inspection of the modules persisted by a framework.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use modula_runtime::{Framework, FrameworkConfig};

/// Module subcommands
#[derive(Subcommand)]
pub enum ModulesCommand {
    /// Restore the framework described by a configuration and list its
    /// modules
    List {
        /// Framework configuration file; must name a storage directory
        #[clap(long)]
        config: PathBuf,

        /// Print JSON instead of a table
        #[clap(long)]
        json: bool,
    },
}

/// Run a module subcommand.
pub fn execute(command: ModulesCommand) -> Result<()> {
    match command {
        ModulesCommand::List { config, json } => {
            let config = FrameworkConfig::load(&config)
                .with_context(|| format!("Failed to load configuration {}", config.display()))?;
            if config.storage_dir.is_none() {
                bail!("The configuration does not name a storage_dir");
            }
            let framework = Framework::restore(config).context("Failed to restore framework")?;
            let modules = framework.modules();

            if json {
                println!("{}", serde_json::to_string_pretty(&modules)?);
                return Ok(());
            }
            for module in modules {
                println!(
                    "{}  {} {}  {:?}  {}",
                    module.id,
                    module.symbolic_name,
                    module.version,
                    module.state,
                    module.region.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}
