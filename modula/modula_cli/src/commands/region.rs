//! Region visibility queries against a framework configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use modula_core::Version;
use modula_region::filter::{MODULE_VERSION_ATTRIBUTE, PACKAGE_VERSION_ATTRIBUTE};
use modula_region::{AttrValue, Attributes, RegionDigraph};
use modula_runtime::FrameworkConfig;
use tracing::debug;

use super::CliError;

/// Region subcommands
#[derive(Subcommand)]
pub enum RegionCommand {
    /// List regions and their outgoing edges
    List {
        /// Framework configuration file
        #[clap(long)]
        config: PathBuf,
    },

    /// Show which regions an object is visible to from a region
    Check {
        /// Framework configuration file
        #[clap(long)]
        config: PathBuf,

        /// Region doing the lookup
        #[clap(long)]
        from: String,

        /// Namespace of the object (bundle, package, service)
        #[clap(long)]
        namespace: String,

        /// Object attribute as key=value; repeatable
        #[clap(long = "attr")]
        attrs: Vec<String>,

        /// Only report whether the object owned by this region is visible
        #[clap(long)]
        to: Option<String>,
    },
}

/// Parse `key=value`. Version attributes become versions, integers become
/// integers and everything else stays a string.
pub fn parse_attribute(text: &str) -> Result<(String, AttrValue), CliError> {
    let (key, value) = text
        .split_once('=')
        .filter(|(key, _)| !key.trim().is_empty())
        .ok_or_else(|| CliError::InvalidAttribute(text.to_string()))?;
    let key = key.trim();
    let value = value.trim();

    if key == PACKAGE_VERSION_ATTRIBUTE || key == MODULE_VERSION_ATTRIBUTE {
        let version = value
            .parse::<Version>()
            .map_err(|_| CliError::InvalidAttribute(text.to_string()))?;
        return Ok((key.to_string(), AttrValue::Version(version)));
    }
    if let Ok(number) = value.parse::<i64>() {
        return Ok((key.to_string(), AttrValue::Integer(number)));
    }
    Ok((key.to_string(), AttrValue::String(value.to_string())))
}

fn load_digraph(config: &Path) -> Result<RegionDigraph> {
    let config = FrameworkConfig::load(config)
        .with_context(|| format!("Failed to load configuration {}", config.display()))?;
    Ok(config.build_digraph()?)
}

/// Run a region subcommand.
pub fn execute(command: RegionCommand) -> Result<()> {
    match command {
        RegionCommand::List { config } => {
            let digraph = load_digraph(&config)?;
            for region in digraph.regions() {
                println!("{}", region.name());
                for edge in region.edges() {
                    println!("  -> {} [{}]", edge.head, edge.filter);
                }
            }
        }
        RegionCommand::Check {
            config,
            from,
            namespace,
            attrs,
            to,
        } => {
            let digraph = load_digraph(&config)?;
            let mut attributes = Attributes::new();
            for attr in &attrs {
                let (key, value) = parse_attribute(attr)?;
                attributes.insert(key, value);
            }
            debug!(%from, %namespace, attributes = attributes.len(), "checking visibility");

            match to {
                Some(to) => {
                    if digraph.get_region(&to).is_none() {
                        return Err(CliError::UnknownRegion(to).into());
                    }
                    let visible = digraph.is_visible(&from, &namespace, &attributes, &to);
                    println!("{}", if visible { "visible" } else { "not visible" });
                }
                None => {
                    let regions = digraph
                        .visible_regions(&from, &namespace, &attributes)
                        .with_context(|| format!("Cannot check visibility from '{}'", from))?;
                    for region in regions {
                        println!("{}", region);
                    }
                }
            }
        }
    }
    Ok(())
}
