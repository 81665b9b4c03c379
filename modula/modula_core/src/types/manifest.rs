//! Manifest header parsing.
//!
//! Headers such as `Import-Package` share one grammar:
//!
//! ```text
//! header    := clause ( ',' clause )*
//! clause    := path ( ';' path )* ( ';' parameter )*
//! parameter := key '=' value | key ':=' value
//! ```
//!
//! Values may be double-quoted to protect `,` `;` and `=`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ManifestError;
use crate::utils::VersionRange;

/// One comma-separated clause of a manifest header.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeaderClause {
    /// The paths (package names, symbolic names) the clause applies to
    pub paths: Vec<String>,

    /// `key=value` attributes
    pub attributes: BTreeMap<String, String>,

    /// `key:=value` directives
    pub directives: BTreeMap<String, String>,
}

impl HeaderClause {
    /// Get an attribute value.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Get a directive value.
    pub fn directive(&self, key: &str) -> Option<&str> {
        self.directives.get(key).map(String::as_str)
    }
}

/// Split `value` on `separator`, ignoring separators inside double quotes.
fn split_unquoted(value: &str, separator: char) -> Result<Vec<&str>, ManifestError> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (index, c) in value.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c == separator && !in_quotes => {
                parts.push(&value[start..index]);
                start = index + c.len_utf8();
            }
            _ => {}
        }
    }

    if in_quotes {
        return Err(ManifestError::new(value, "unterminated quoted value"));
    }
    parts.push(&value[start..]);
    Ok(parts)
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

/// Parse a manifest header value into clauses.
///
/// # Examples
///
/// ```
/// use modula_core::types::parse_header;
///
/// let clauses = parse_header("org.a;org.b;version=\"[1.0,2.0)\",org.c;resolution:=optional").unwrap();
/// assert_eq!(clauses.len(), 2);
/// assert_eq!(clauses[0].paths, vec!["org.a", "org.b"]);
/// assert_eq!(clauses[0].attribute("version"), Some("[1.0,2.0)"));
/// assert_eq!(clauses[1].directive("resolution"), Some("optional"));
/// ```
pub fn parse_header(value: &str) -> Result<Vec<HeaderClause>, ManifestError> {
    if value.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut clauses = Vec::new();
    for raw_clause in split_unquoted(value, ',')? {
        let mut clause = HeaderClause::default();

        for raw_part in split_unquoted(raw_clause, ';')? {
            let part = raw_part.trim();
            if part.is_empty() {
                return Err(ManifestError::new(value, "empty clause element"));
            }

            if let Some((key, param)) = part.split_once(":=") {
                let key = key.trim();
                if key.is_empty() {
                    return Err(ManifestError::new(value, "directive without a name"));
                }
                clause
                    .directives
                    .insert(key.to_string(), unquote(param).to_string());
            } else if let Some((key, param)) = part.split_once('=') {
                let key = key.trim();
                if key.is_empty() {
                    return Err(ManifestError::new(value, "attribute without a name"));
                }
                clause
                    .attributes
                    .insert(key.to_string(), unquote(param).to_string());
            } else {
                if !clause.attributes.is_empty() || !clause.directives.is_empty() {
                    return Err(ManifestError::new(
                        value,
                        format!("path '{}' follows a parameter", part),
                    ));
                }
                if part.contains('"') {
                    return Err(ManifestError::new(value, "quoted path"));
                }
                clause.paths.push(part.to_string());
            }
        }

        if clause.paths.is_empty() {
            return Err(ManifestError::new(value, "clause has no path"));
        }
        clauses.push(clause);
    }

    Ok(clauses)
}

/// Check that `name` is a dotted package name, optionally ending with a
/// `*` wildcard when `allow_wildcard` is set.
pub fn validate_package_name(name: &str, allow_wildcard: bool) -> Result<(), String> {
    if allow_wildcard && name == "*" {
        return Ok(());
    }

    let (body, wildcard) = match name.strip_suffix(".*") {
        Some(body) if allow_wildcard => (body, true),
        _ => (name, false),
    };

    if body.is_empty() {
        return Err("empty package name".to_string());
    }

    for segment in body.split('.') {
        let mut chars = segment.chars();
        let valid_start = chars
            .next()
            .map(|c| c.is_alphabetic() || c == '_' || c == '$')
            .unwrap_or(false);
        if !valid_start || !chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$') {
            return Err(format!("'{}' is not a valid package segment", segment));
        }
    }

    if !wildcard && name.contains('*') {
        return Err("wildcards are not permitted here".to_string());
    }
    Ok(())
}

/// A declared package import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageImport {
    /// Package name; for dynamic imports it may end in `*`
    pub name: String,

    /// Acceptable exporter versions
    pub version_range: VersionRange,

    /// Whether `resolution:=optional` was declared
    pub optional: bool,

    /// Matching attributes other than `version`
    pub attributes: BTreeMap<String, String>,
}

impl PackageImport {
    /// Create an import of `name` accepting any version.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_range: VersionRange::any(),
            optional: false,
            attributes: BTreeMap::new(),
        }
    }

    /// Check whether the import (possibly a wildcard) covers `package`.
    pub fn matches_package(&self, package: &str) -> bool {
        if self.name == "*" {
            return true;
        }
        match self.name.strip_suffix('*') {
            Some(prefix) => package.starts_with(prefix),
            None => self.name == package,
        }
    }

    /// Parse an `Import-Package` (or, with `dynamic`, a
    /// `DynamicImport-Package`) header.
    pub fn parse_all(value: &str, dynamic: bool) -> Result<Vec<PackageImport>, ManifestError> {
        let mut imports = Vec::new();
        for clause in parse_header(value)? {
            let version_range = match clause.attribute("version") {
                Some(range) => range
                    .parse::<VersionRange>()
                    .map_err(|e| ManifestError::new(value, e.to_string()))?,
                None => VersionRange::any(),
            };
            let optional = clause.directive("resolution") == Some("optional");
            let mut attributes = clause.attributes.clone();
            attributes.remove("version");

            for path in &clause.paths {
                validate_package_name(path, dynamic)
                    .map_err(|reason| ManifestError::new(value, reason))?;
                imports.push(PackageImport {
                    name: path.clone(),
                    version_range: version_range.clone(),
                    optional,
                    attributes: attributes.clone(),
                });
            }
        }
        Ok(imports)
    }
}

/// A declared package export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageExport {
    /// Package name
    pub name: String,

    /// Exported version
    pub version: crate::utils::Version,

    /// Arbitrary matching attributes
    pub attributes: BTreeMap<String, String>,
}

impl PackageExport {
    /// Create an export of `name` at `version`.
    pub fn new(name: impl Into<String>, version: crate::utils::Version) -> Self {
        Self {
            name: name.into(),
            version,
            attributes: BTreeMap::new(),
        }
    }

    /// Parse an `Export-Package` header.
    pub fn parse_all(value: &str) -> Result<Vec<PackageExport>, ManifestError> {
        let mut exports = Vec::new();
        for clause in parse_header(value)? {
            let version = match clause.attribute("version") {
                Some(v) => v
                    .parse()
                    .map_err(|e: crate::utils::VersionParseError| {
                        ManifestError::new(value, e.to_string())
                    })?,
                None => crate::utils::Version::empty(),
            };
            let mut attributes = clause.attributes.clone();
            attributes.remove("version");

            for path in &clause.paths {
                validate_package_name(path, false)
                    .map_err(|reason| ManifestError::new(value, reason))?;
                exports.push(PackageExport {
                    name: path.clone(),
                    version: version.clone(),
                    attributes: attributes.clone(),
                });
            }
        }
        Ok(exports)
    }
}
