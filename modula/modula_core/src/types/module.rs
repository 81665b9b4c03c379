//! Module descriptors and lifecycle states.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use super::manifest::{parse_header, PackageExport, PackageImport};
use crate::error::ManifestError;
use crate::utils::Version;

/// Header declaring the module's symbolic name.
pub const SYMBOLIC_NAME_HEADER: &str = "Bundle-SymbolicName";
/// Header declaring the module's version.
pub const VERSION_HEADER: &str = "Bundle-Version";
/// Header declaring imported packages.
pub const IMPORT_PACKAGE_HEADER: &str = "Import-Package";
/// Header declaring exported packages.
pub const EXPORT_PACKAGE_HEADER: &str = "Export-Package";
/// Header declaring required modules.
pub const REQUIRE_BUNDLE_HEADER: &str = "Require-Bundle";
/// Header declaring dynamically imported packages.
pub const DYNAMIC_IMPORT_HEADER: &str = "DynamicImport-Package";
/// Header declaring the ordered buddy policy list.
pub const BUDDY_POLICY_HEADER: &str = "Eclipse-BuddyPolicy";
/// Header naming the modules this module registers as a buddy of.
pub const REGISTER_BUDDY_HEADER: &str = "Eclipse-RegisterBuddy";
/// Header naming the host of a fragment.
pub const FRAGMENT_HOST_HEADER: &str = "Fragment-Host";

/// Lifecycle state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleState {
    /// Installed but not resolved.
    Installed,

    /// Wired and ready to load classes.
    Resolved,

    /// Being started.
    Starting,

    /// Started.
    Active,

    /// Being stopped.
    Stopping,

    /// Removed from the framework.
    Uninstalled,
}

impl ModuleState {
    /// The mask bit corresponding to this state.
    pub fn mask(&self) -> StateMask {
        match self {
            Self::Installed => StateMask::INSTALLED,
            Self::Resolved => StateMask::RESOLVED,
            Self::Starting => StateMask::STARTING,
            Self::Active => StateMask::ACTIVE,
            Self::Stopping => StateMask::STOPPING,
            Self::Uninstalled => StateMask::UNINSTALLED,
        }
    }

    /// Whether the module has a wiring in this state.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::Starting | Self::Active | Self::Stopping
        )
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    /// A set of lifecycle states, used to select modules of interest
    pub struct StateMask: u8 {
        const INSTALLED = 0b0000_0001;
        const RESOLVED = 0b0000_0010;
        const STARTING = 0b0000_0100;
        const ACTIVE = 0b0000_1000;
        const STOPPING = 0b0001_0000;
        const UNINSTALLED = 0b0010_0000;
    }
}

impl StateMask {
    /// Check whether `state` is selected by this mask.
    pub fn matches(&self, state: ModuleState) -> bool {
        self.contains(state.mask())
    }
}

/// Package part of a class name (`a.b.C` is in `a.b`).
pub fn package_of_class(class_name: &str) -> &str {
    class_name
        .rfind('.')
        .map(|index| &class_name[..index])
        .unwrap_or("")
}

/// Package part of a resource path (`a/b/c.txt` is in `a.b`).
pub fn package_of_resource(resource: &str) -> String {
    let resource = resource.trim_start_matches('/');
    resource
        .rfind('/')
        .map(|index| resource[..index].replace('/', "."))
        .unwrap_or_default()
}

/// Static description of a module: its identity, declared capabilities and
/// requirements, and the content it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Symbolic name
    pub symbolic_name: String,

    /// Version
    pub version: Version,

    /// Statically imported packages
    #[serde(default)]
    pub imports: Vec<PackageImport>,

    /// Exported packages
    #[serde(default)]
    pub exports: Vec<PackageExport>,

    /// Symbolic names of required modules
    #[serde(default)]
    pub required_modules: Vec<String>,

    /// Dynamically imported packages
    #[serde(default)]
    pub dynamic_imports: Vec<PackageImport>,

    /// Raw buddy policy header, consulted when local lookups fail
    #[serde(default)]
    pub buddy_policy: Option<String>,

    /// Symbolic names of the modules this module is a registered buddy of
    #[serde(default)]
    pub registered_buddies: Vec<String>,

    /// Symbolic name of the host when this module is a fragment
    #[serde(default)]
    pub fragment_host: Option<String>,

    /// Class bytes keyed by fully-qualified class name
    #[serde(default)]
    pub classes: BTreeMap<String, Vec<u8>>,

    /// Resource paths carried by the module
    #[serde(default)]
    pub resources: BTreeSet<String>,
}

impl ModuleDescriptor {
    /// Create a descriptor with no requirements or content.
    pub fn new(symbolic_name: impl Into<String>, version: Version) -> Self {
        Self {
            symbolic_name: symbolic_name.into(),
            version,
            imports: Vec::new(),
            exports: Vec::new(),
            required_modules: Vec::new(),
            dynamic_imports: Vec::new(),
            buddy_policy: None,
            registered_buddies: Vec::new(),
            fragment_host: None,
            classes: BTreeMap::new(),
            resources: BTreeSet::new(),
        }
    }

    /// Build a descriptor from manifest headers.
    pub fn from_headers(headers: &HashMap<String, String>) -> Result<Self, ManifestError> {
        let name_header = headers
            .get(SYMBOLIC_NAME_HEADER)
            .ok_or_else(|| ManifestError::new("", "missing Bundle-SymbolicName"))?;
        let symbolic_name = parse_header(name_header)?
            .into_iter()
            .next()
            .and_then(|clause| clause.paths.into_iter().next())
            .ok_or_else(|| ManifestError::new(name_header.as_str(), "empty symbolic name"))?;

        let version = match headers.get(VERSION_HEADER) {
            Some(v) => v
                .parse()
                .map_err(|e: crate::utils::VersionParseError| {
                    ManifestError::new(v.as_str(), e.to_string())
                })?,
            None => Version::empty(),
        };

        let mut descriptor = Self::new(symbolic_name, version);

        if let Some(value) = headers.get(IMPORT_PACKAGE_HEADER) {
            descriptor.imports = PackageImport::parse_all(value, false)?;
        }
        if let Some(value) = headers.get(EXPORT_PACKAGE_HEADER) {
            descriptor.exports = PackageExport::parse_all(value)?;
        }
        if let Some(value) = headers.get(DYNAMIC_IMPORT_HEADER) {
            descriptor.dynamic_imports = PackageImport::parse_all(value, true)?;
        }
        if let Some(value) = headers.get(REQUIRE_BUNDLE_HEADER) {
            descriptor.required_modules = first_paths(value)?;
        }
        if let Some(value) = headers.get(REGISTER_BUDDY_HEADER) {
            descriptor.registered_buddies = first_paths(value)?;
        }
        if let Some(value) = headers.get(FRAGMENT_HOST_HEADER) {
            descriptor.fragment_host = first_paths(value)?.into_iter().next();
        }
        descriptor.buddy_policy = headers.get(BUDDY_POLICY_HEADER).cloned();

        Ok(descriptor)
    }

    /// Add a statically imported package.
    pub fn with_import(mut self, import: PackageImport) -> Self {
        self.imports.push(import);
        self
    }

    /// Add an exported package.
    pub fn with_export(mut self, name: impl Into<String>, version: Version) -> Self {
        self.exports.push(PackageExport::new(name, version));
        self
    }

    /// Add a required module.
    pub fn with_required(mut self, symbolic_name: impl Into<String>) -> Self {
        self.required_modules.push(symbolic_name.into());
        self
    }

    /// Set the buddy policy header.
    pub fn with_buddy_policy(mut self, header: impl Into<String>) -> Self {
        self.buddy_policy = Some(header.into());
        self
    }

    /// Register as a buddy of the named module.
    pub fn with_registered_buddy(mut self, symbolic_name: impl Into<String>) -> Self {
        self.registered_buddies.push(symbolic_name.into());
        self
    }

    /// Mark this module as a fragment of the named host.
    pub fn with_fragment_host(mut self, host: impl Into<String>) -> Self {
        self.fragment_host = Some(host.into());
        self
    }

    /// Add class bytes.
    pub fn with_class(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.classes.insert(name.into(), bytes.into());
        self
    }

    /// Add a resource path.
    pub fn with_resource(mut self, path: impl Into<String>) -> Self {
        self.resources.insert(path.into());
        self
    }

    /// Whether this module is a fragment.
    pub fn is_fragment(&self) -> bool {
        self.fragment_host.is_some()
    }

    /// Find the export of `package`, if any.
    pub fn export_of(&self, package: &str) -> Option<&PackageExport> {
        self.exports.iter().find(|export| export.name == package)
    }
}

fn first_paths(value: &str) -> Result<Vec<String>, ManifestError> {
    Ok(parse_header(value)?
        .into_iter()
        .flat_map(|clause| clause.paths)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_mask() {
        let mask = StateMask::RESOLVED | StateMask::ACTIVE;
        assert!(mask.matches(ModuleState::Active));
        assert!(!mask.matches(ModuleState::Installed));
        assert!(ModuleState::Stopping.is_resolved());
        assert!(!ModuleState::Uninstalled.is_resolved());
    }

    #[test]
    fn test_package_helpers() {
        assert_eq!(package_of_class("org.example.Foo"), "org.example");
        assert_eq!(package_of_class("Foo"), "");
        assert_eq!(package_of_resource("org/example/foo.txt"), "org.example");
        assert_eq!(package_of_resource("/foo.txt"), "");
    }

    #[test]
    fn test_from_headers() {
        let headers: HashMap<String, String> = [
            (SYMBOLIC_NAME_HEADER, "org.example.app;singleton:=true"),
            (VERSION_HEADER, "1.2.0"),
            (IMPORT_PACKAGE_HEADER, "org.example.api;version=\"[1.0,2.0)\""),
            (EXPORT_PACKAGE_HEADER, "org.example.app.spi;version=1.0"),
            (BUDDY_POLICY_HEADER, "registered, dependent"),
            (REGISTER_BUDDY_HEADER, "org.example.logging"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let descriptor = ModuleDescriptor::from_headers(&headers).unwrap();
        assert_eq!(descriptor.symbolic_name, "org.example.app");
        assert_eq!(descriptor.version, Version::new(1, 2, 0));
        assert_eq!(descriptor.imports[0].name, "org.example.api");
        assert!(descriptor.export_of("org.example.app.spi").is_some());
        assert_eq!(descriptor.buddy_policy.as_deref(), Some("registered, dependent"));
        assert_eq!(descriptor.registered_buddies, vec!["org.example.logging"]);
        assert!(!descriptor.is_fragment());
    }

    #[test]
    fn test_from_headers_requires_name() {
        let headers = HashMap::new();
        assert!(ModuleDescriptor::from_headers(&headers).is_err());
    }
}
