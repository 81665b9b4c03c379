//! Reliable file commands.
//!
//! These operate on one logical file; the `.new`, `.bak` and `.tmp`
//! siblings are handled by the store.

use std::io::{self, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use modula_store::{GenerationStatus, Inspection, ReliableFileStore};
use serde::Serialize;

/// Reliable file subcommands
#[derive(Subcommand)]
pub enum StoreCommand {
    /// Print the newest complete generation to stdout
    Read {
        /// Logical file path
        path: PathBuf,
    },

    /// Commit new content, read from --data or stdin
    Write {
        /// Logical file path
        path: PathBuf,

        /// Content to write instead of reading stdin
        #[clap(long)]
        data: Option<String>,

        /// Append to the current content instead of replacing it
        #[clap(long)]
        append: bool,
    },

    /// Repair the generations left by an interrupted commit
    Recover {
        /// Logical file path
        path: PathBuf,
    },

    /// Report the status of every generation
    Info {
        /// Logical file path
        path: PathBuf,

        /// Print JSON instead of text
        #[clap(long)]
        json: bool,
    },
}

#[derive(Serialize)]
struct GenerationReport {
    status: &'static str,
    logical_len: Option<u64>,
}

impl From<GenerationStatus> for GenerationReport {
    fn from(status: GenerationStatus) -> Self {
        let name = match status {
            GenerationStatus::Valid { .. } => "valid",
            GenerationStatus::Unsigned { .. } => "unsigned",
            GenerationStatus::Corrupt => "corrupt",
            GenerationStatus::Missing => "missing",
        };
        Self {
            status: name,
            logical_len: status.logical_len(),
        }
    }
}

#[derive(Serialize)]
struct InfoReport {
    path: String,
    live: GenerationReport,
    new: GenerationReport,
    bak: GenerationReport,
    tmp_present: bool,
}

impl InfoReport {
    fn new(path: &std::path::Path, inspection: Inspection) -> Self {
        Self {
            path: path.display().to_string(),
            live: inspection.live.into(),
            new: inspection.new.into(),
            bak: inspection.bak.into(),
            tmp_present: inspection.tmp_present,
        }
    }
}

/// Run a store subcommand.
pub fn execute(command: StoreCommand) -> Result<()> {
    let store = ReliableFileStore::new();
    match command {
        StoreCommand::Read { path } => {
            let content = store
                .read_all(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            io::stdout()
                .write_all(&content)
                .context("Failed to write to stdout")?;
        }
        StoreCommand::Write { path, data, append } => {
            let content = match data {
                Some(data) => data.into_bytes(),
                None => {
                    let mut buffer = Vec::new();
                    io::stdin()
                        .read_to_end(&mut buffer)
                        .context("Failed to read stdin")?;
                    buffer
                }
            };
            let mut writer = store
                .open_for_write(&path, append)
                .with_context(|| format!("Failed to open {} for writing", path.display()))?;
            writer.write_content(&content)?;
            let written = writer.written();
            store
                .commit(writer)
                .with_context(|| format!("Failed to commit {}", path.display()))?;
            println!("Committed {} bytes to {}", written, path.display());
        }
        StoreCommand::Recover { path } => {
            store
                .recover(&path)
                .with_context(|| format!("Failed to recover {}", path.display()))?;
            let live = store.inspect(&path)?.live;
            match live.logical_len() {
                Some(len) => println!("Recovered {} ({} bytes)", path.display(), len),
                None => println!("Nothing to recover for {}", path.display()),
            }
        }
        StoreCommand::Info { path, json } => {
            let inspection = store
                .inspect(&path)
                .with_context(|| format!("Failed to inspect {}", path.display()))?;
            let report = InfoReport::new(&path, inspection);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.path);
                for (name, generation) in [("live", &report.live), ("new", &report.new), ("bak", &report.bak)] {
                    match generation.logical_len {
                        Some(len) => println!("  {:<5}{} ({} bytes)", name, generation.status, len),
                        None => println!("  {:<5}{}", name, generation.status),
                    }
                }
                println!("  {:<5}{}", "tmp", if report.tmp_present { "present" } else { "absent" });
            }
        }
    }
    Ok(())
}
