//! Framework configuration.
//!
//! Configuration is read from TOML. Every field has a default, so an empty
//! file yields a working in-memory framework with a single region.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use modula_core::error::ConfigError;
use modula_core::types::validate_package_name;
use modula_core::LoggingConfig;
use modula_loader::HostLoaderKind;
use modula_region::{RegionDigraph, RegionFilter};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Framework configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Directory holding persisted framework metadata; `None` keeps
    /// everything in memory
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Host loader that boot-delegated packages are loaded from
    #[serde(default = "default_parent_loader")]
    pub parent_loader: HostLoaderKind,

    /// Packages always delegated to the parent loader (`a.b`, `a.b.*`, `*`)
    #[serde(default)]
    pub boot_delegation: Vec<String>,

    /// Region to install modules into when none is named
    #[serde(default = "default_region")]
    pub default_region: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Regions created at startup
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
}

/// A region created at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Region name
    pub name: String,

    /// Outgoing edges
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

/// A filtered edge from the enclosing region to `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Head region
    pub to: String,

    /// Namespaces allowed without restriction
    #[serde(default)]
    pub allow_all: Vec<String>,

    /// Allow-filters per namespace
    #[serde(default)]
    pub allow: BTreeMap<String, Vec<String>>,
}

fn default_parent_loader() -> HostLoaderKind {
    HostLoaderKind::Boot
}

fn default_region() -> String {
    "root".to_string()
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            storage_dir: None,
            parent_loader: default_parent_loader(),
            boot_delegation: Vec::new(),
            logging: LoggingConfig::default(),
            default_region: default_region(),
            regions: Vec::new(),
        }
    }
}

impl ConnectionConfig {
    /// Build the region filter of this edge.
    pub fn filter(&self) -> Result<RegionFilter, ConfigError> {
        let mut builder = RegionFilter::builder();
        for (namespace, filters) in &self.allow {
            for filter in filters {
                builder = builder.allow(namespace, filter).map_err(|e| {
                    ConfigError::Invalid(format!("edge to '{}': {}", self.to, e))
                })?;
            }
        }
        for namespace in &self.allow_all {
            builder = builder.allow_all(namespace);
        }
        Ok(builder.build())
    }
}

impl FrameworkConfig {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading configuration from {}", path.display());

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::LoadFailed(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_region.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "Default region cannot be empty".to_string(),
            ));
        }

        for pattern in &self.boot_delegation {
            validate_package_name(pattern, true).map_err(|reason| {
                ConfigError::Invalid(format!("boot delegation '{}': {}", pattern, reason))
            })?;
        }

        let mut names = BTreeSet::new();
        names.insert(self.default_region.as_str());
        let mut seen = BTreeSet::new();
        for region in &self.regions {
            names.insert(region.name.as_str());
            if !seen.insert(region.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Region '{}' is defined twice",
                    region.name
                )));
            }
        }

        for region in &self.regions {
            for connection in &region.connections {
                if !names.contains(connection.to.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "Region '{}' connects to undefined region '{}'",
                        region.name, connection.to
                    )));
                }
                if connection.to == region.name {
                    return Err(ConfigError::Invalid(format!(
                        "Region '{}' cannot connect to itself",
                        region.name
                    )));
                }
                connection.filter()?;
            }
        }

        Ok(())
    }

    /// Build the initial digraph: the default region plus every configured
    /// region and edge.
    pub fn build_digraph(&self) -> Result<RegionDigraph, ConfigError> {
        let digraph = RegionDigraph::new();
        let invalid = |e: modula_core::error::RegionError| ConfigError::Invalid(e.to_string());

        digraph.create_region(&self.default_region).map_err(invalid)?;
        for region in &self.regions {
            if digraph.get_region(&region.name).is_none() {
                digraph.create_region(&region.name).map_err(invalid)?;
            }
        }
        for region in &self.regions {
            for connection in &region.connections {
                digraph
                    .connect(&region.name, connection.filter()?, &connection.to)
                    .map_err(invalid)?;
                debug!(tail = %region.name, head = %connection.to, "configured region edge");
            }
        }
        Ok(digraph)
    }
}
