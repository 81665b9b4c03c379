//! Per-namespace filters carried by region edges.

use std::collections::BTreeMap;
use std::fmt;

use modula_core::error::FilterError;
use modula_core::{ModuleId, Version};
use serde::{Deserialize, Serialize};

use super::ldap::{Attributes, Filter};

/// Namespace of whole modules.
pub const VISIBLE_BUNDLE_NAMESPACE: &str = "bundle";
/// Namespace of exported packages.
pub const VISIBLE_PACKAGE_NAMESPACE: &str = "package";
/// Namespace of services.
pub const VISIBLE_SERVICE_NAMESPACE: &str = "service";
/// Catch-all namespace, evaluated for every namespace.
pub const VISIBLE_ALL_NAMESPACE: &str = "all";

/// Attribute naming the queried namespace when the catch-all filters run.
pub const NAMESPACE_ATTRIBUTE: &str = "namespace";
/// Attribute carrying a module's identifier.
pub const MODULE_ID_ATTRIBUTE: &str = "id";
/// Attribute carrying a module's symbolic name.
pub const SYMBOLIC_NAME_ATTRIBUTE: &str = "bundle-symbolic-name";
/// Attribute carrying a module's version.
pub const MODULE_VERSION_ATTRIBUTE: &str = "bundle-version";
/// Attribute carrying a package name.
pub const PACKAGE_ATTRIBUTE: &str = "package";
/// Attribute carrying a package version.
pub const PACKAGE_VERSION_ATTRIBUTE: &str = "version";

/// A filter that matches any attribute set.
pub const ALL_MATCHING_FILTER: &str = "(|(!(all=*))(all=*))";

/// Attributes describing a module in the bundle namespace.
pub fn module_attributes(id: ModuleId, symbolic_name: &str, version: &Version) -> Attributes {
    Attributes::new()
        .with(MODULE_ID_ATTRIBUTE, id.to_string())
        .with(SYMBOLIC_NAME_ATTRIBUTE, symbolic_name)
        .with(MODULE_VERSION_ATTRIBUTE, version.clone())
}

/// Attributes describing an exported package in the package namespace.
pub fn package_attributes(
    package: &str,
    version: &Version,
    exporter: &str,
    exporter_version: &Version,
) -> Attributes {
    Attributes::new()
        .with(PACKAGE_ATTRIBUTE, package)
        .with(PACKAGE_VERSION_ATTRIBUTE, version.clone())
        .with(SYMBOLIC_NAME_ATTRIBUTE, exporter)
        .with(MODULE_VERSION_ATTRIBUTE, exporter_version.clone())
}

/// The filter of one edge: a list of allow-filters per namespace.
///
/// An object is allowed through when any filter of its namespace matches
/// its attributes, or when any filter of the [`VISIBLE_ALL_NAMESPACE`]
/// matches its attributes extended with [`NAMESPACE_ATTRIBUTE`] set to the
/// queried namespace. Anything else is denied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionFilter {
    filters: BTreeMap<String, Vec<Filter>>,
}

impl RegionFilter {
    /// Start building a filter.
    pub fn builder() -> RegionFilterBuilder {
        RegionFilterBuilder::default()
    }

    /// A filter allowing everything in every namespace.
    pub fn allow_everything() -> Self {
        Self::builder().allow_all(VISIBLE_ALL_NAMESPACE).build()
    }

    /// Whether an object of `namespace` with `attributes` may pass.
    pub fn is_allowed(&self, namespace: &str, attributes: &Attributes) -> bool {
        if self
            .filters
            .get(namespace)
            .map_or(false, |list| list.iter().any(|f| f.matches(attributes)))
        {
            return true;
        }

        match self.filters.get(VISIBLE_ALL_NAMESPACE) {
            Some(list) if !list.is_empty() => {
                let mut extended = attributes.clone();
                extended.insert(NAMESPACE_ATTRIBUTE, namespace);
                list.iter().any(|f| f.matches(&extended))
            }
            _ => false,
        }
    }

    /// Whether a module may pass in the bundle namespace.
    pub fn is_module_allowed(&self, id: ModuleId, symbolic_name: &str, version: &Version) -> bool {
        self.is_allowed(
            VISIBLE_BUNDLE_NAMESPACE,
            &module_attributes(id, symbolic_name, version),
        )
    }

    /// Filters per namespace.
    pub fn sharing_policy(&self) -> &BTreeMap<String, Vec<Filter>> {
        &self.filters
    }
}

impl fmt::Display for RegionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (namespace, filters) in &self.filters {
            for filter in filters {
                if !first {
                    write!(f, " ")?;
                }
                write!(f, "{}:{}", namespace, filter)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Builder for [`RegionFilter`]; syntax errors surface here, before any
/// edge is installed.
#[derive(Debug, Clone, Default)]
pub struct RegionFilterBuilder {
    filters: BTreeMap<String, Vec<Filter>>,
}

impl RegionFilterBuilder {
    /// Allow objects of `namespace` matching `filter`.
    pub fn allow(mut self, namespace: &str, filter: &str) -> Result<Self, FilterError> {
        validate_namespace(namespace)?;
        let parsed = Filter::parse(filter)?;
        self.filters
            .entry(namespace.to_string())
            .or_default()
            .push(parsed);
        Ok(self)
    }

    /// Allow every object of `namespace`.
    pub fn allow_all(mut self, namespace: &str) -> Self {
        let filters = self.filters.entry(namespace.to_string()).or_default();
        if let Ok(filter) = Filter::parse(ALL_MATCHING_FILTER) {
            filters.push(filter);
        }
        self
    }

    /// Finish building.
    pub fn build(self) -> RegionFilter {
        RegionFilter {
            filters: self.filters,
        }
    }
}

fn validate_namespace(namespace: &str) -> Result<(), FilterError> {
    if namespace.trim().is_empty() || namespace.chars().any(char::is_whitespace) {
        return Err(FilterError::InvalidNamespace(namespace.to_string()));
    }
    Ok(())
}
