//! Subcommands of the `modula` binary.

pub mod config;
pub mod modules;
pub mod region;
pub mod store;

use thiserror::Error;

/// Errors raised while interpreting command-line input.
#[derive(Debug, Error)]
pub enum CliError {
    /// An `--attr` value is not of the form `key=value`
    #[error("Invalid attribute '{0}', expected key=value")]
    InvalidAttribute(String),

    /// A region named on the command line does not exist
    #[error("Unknown region '{0}'")]
    UnknownRegion(String),
}
