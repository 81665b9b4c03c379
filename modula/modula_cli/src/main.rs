use anyhow::Result;
use clap::{Parser, Subcommand};
use modula_core::utils::init_logging;
use modula_core::{LogLevel, LoggingConfig};

mod commands;

use commands::config::ConfigCommand;
use commands::modules::ModulesCommand;
use commands::region::RegionCommand;
use commands::store::StoreCommand;

/// Modula Command Line Interface
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Level of the log lines written to stderr
    #[clap(long, global = true, default_value = "warn", value_parser = parse_level)]
    log_level: LogLevel,

    /// Emit JSON log lines
    #[clap(long, global = true)]
    json_logs: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read, write and repair reliable files
    #[clap(subcommand)]
    Store(StoreCommand),

    /// Query region visibility
    #[clap(subcommand)]
    Region(RegionCommand),

    /// Validate framework configuration
    #[clap(subcommand)]
    Config(ConfigCommand),

    /// Inspect persisted modules
    #[clap(subcommand)]
    Modules(ModulesCommand),
}

fn parse_level(value: &str) -> std::result::Result<LogLevel, String> {
    value
        .parse()
        .map_err(|_| format!("unknown log level '{}'", value))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: cli.log_level,
        structured: cli.json_logs,
        with_target: false,
    };
    init_logging(&logging)?;

    match cli.command {
        Commands::Store(command) => commands::store::execute(command),
        Commands::Region(command) => commands::region::execute(command),
        Commands::Config(command) => commands::config::execute(command),
        Commands::Modules(command) => commands::modules::execute(command),
    }
}
