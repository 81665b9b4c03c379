//! Version utilities.
//!
//! Module and package versions have the form
//! `major[.minor[.micro[.qualifier]]]`. Missing numeric components are zero
//! and the qualifier compares lexically after the numeric components.
//! Version ranges use interval notation (`[1.0,2.0)`); a bare version is
//! an "at least" range.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Error parsing a version or version range string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionParseError {
    /// The invalid version string.
    pub version: String,

    /// The reason for the error.
    pub reason: String,
}

impl VersionParseError {
    fn new(version: &str, reason: impl Into<String>) -> Self {
        Self {
            version: version.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for VersionParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid version '{}': {}", self.version, self.reason)
    }
}

impl std::error::Error for VersionParseError {}

/// A module or package version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    /// Major version number.
    pub major: u32,

    /// Minor version number.
    pub minor: u32,

    /// Micro version number.
    pub micro: u32,

    /// Qualifier, empty when absent.
    pub qualifier: String,
}

impl Version {
    /// Create a new version without a qualifier.
    pub fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    /// The empty version `0.0.0`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a qualifier to this version.
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.major
            .cmp(&other.major)
            .then(self.minor.cmp(&other.minor))
            .then(self.micro.cmp(&other.micro))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Version::empty());
        }

        let mut parts = trimmed.splitn(4, '.');
        let mut numbers = [0u32; 3];
        for (index, slot) in numbers.iter_mut().enumerate() {
            match parts.next() {
                Some(part) => {
                    *slot = part.parse().map_err(|_| {
                        VersionParseError::new(s, format!("component {} is not a number", index))
                    })?;
                }
                None if index == 0 => return Err(VersionParseError::new(s, "missing major")),
                None => break,
            }
        }

        let qualifier = parts.next().unwrap_or_default().to_string();
        if !qualifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(VersionParseError::new(s, "invalid qualifier"));
        }

        Ok(Version {
            major: numbers[0],
            minor: numbers[1],
            micro: numbers[2],
            qualifier,
        })
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

/// A range of versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    /// Lower bound.
    pub floor: Version,

    /// Whether the lower bound is inclusive.
    pub floor_inclusive: bool,

    /// Upper bound, `None` for unbounded.
    pub ceiling: Option<Version>,

    /// Whether the upper bound is inclusive.
    pub ceiling_inclusive: bool,
}

impl VersionRange {
    /// The range accepting every version.
    pub fn any() -> Self {
        Self::at_least(Version::empty())
    }

    /// The range `[floor, ∞)`.
    pub fn at_least(floor: Version) -> Self {
        Self {
            floor,
            floor_inclusive: true,
            ceiling: None,
            ceiling_inclusive: false,
        }
    }

    /// Check whether the version falls within this range.
    pub fn includes(&self, version: &Version) -> bool {
        let above_floor = if self.floor_inclusive {
            version >= &self.floor
        } else {
            version > &self.floor
        };
        let below_ceiling = match &self.ceiling {
            None => true,
            Some(ceiling) if self.ceiling_inclusive => version <= ceiling,
            Some(ceiling) => version < ceiling,
        };
        above_floor && below_ceiling
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ceiling {
            None => write!(f, "{}", self.floor),
            Some(ceiling) => write!(
                f,
                "{}{},{}{}",
                if self.floor_inclusive { '[' } else { '(' },
                self.floor,
                ceiling,
                if self.ceiling_inclusive { ']' } else { ')' }
            ),
        }
    }
}

impl FromStr for VersionRange {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let first = trimmed.chars().next();
        if !matches!(first, Some('[') | Some('(')) {
            return Ok(VersionRange::at_least(trimmed.parse()?));
        }

        let last = trimmed.chars().last();
        if !matches!(last, Some(']') | Some(')')) || trimmed.len() < 2 {
            return Err(VersionParseError::new(s, "unterminated range"));
        }

        let inner = &trimmed[1..trimmed.len() - 1];
        let (floor, ceiling) = inner
            .split_once(',')
            .ok_or_else(|| VersionParseError::new(s, "range requires two bounds"))?;
        let floor: Version = floor.parse()?;
        let ceiling: Version = ceiling.parse()?;
        if ceiling < floor {
            return Err(VersionParseError::new(s, "ceiling is below floor"));
        }

        Ok(VersionRange {
            floor,
            floor_inclusive: first == Some('['),
            ceiling: Some(ceiling),
            ceiling_inclusive: last == Some(']'),
        })
    }
}

impl TryFrom<String> for VersionRange {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionRange> for String {
    fn from(value: VersionRange) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse() {
        assert_eq!("1".parse::<Version>().unwrap(), Version::new(1, 0, 0));
        assert_eq!("1.2".parse::<Version>().unwrap(), Version::new(1, 2, 0));
        assert_eq!(
            "1.2.3.v2024".parse::<Version>().unwrap(),
            Version::new(1, 2, 3).with_qualifier("v2024")
        );
        assert_eq!("".parse::<Version>().unwrap(), Version::empty());
        assert!("1.x".parse::<Version>().is_err());
        assert!("1.2.3.bad qualifier".parse::<Version>().is_err());
    }

    #[test]
    fn test_version_ordering() {
        let v1 = Version::new(1, 0, 0);
        let v1_q = Version::new(1, 0, 0).with_qualifier("a");
        let v2 = Version::new(1, 10, 0);
        assert!(v1 < v1_q);
        assert!(v1_q < v2);
        assert_eq!(v2.to_string(), "1.10.0");
        assert_eq!(v1_q.to_string(), "1.0.0.a");
    }

    #[test]
    fn test_range_includes() {
        let range: VersionRange = "[1.0,2.0)".parse().unwrap();
        assert!(range.includes(&Version::new(1, 0, 0)));
        assert!(range.includes(&Version::new(1, 9, 9)));
        assert!(!range.includes(&Version::new(2, 0, 0)));
        assert!(!range.includes(&Version::new(0, 9, 0)));

        let open: VersionRange = "(1.0,1.5]".parse().unwrap();
        assert!(!open.includes(&Version::new(1, 0, 0)));
        assert!(open.includes(&Version::new(1, 5, 0)));

        let at_least: VersionRange = "1.2".parse().unwrap();
        assert!(at_least.includes(&Version::new(7, 0, 0)));
        assert!(!at_least.includes(&Version::new(1, 1, 0)));
    }

    #[test]
    fn test_range_rejects_malformed() {
        assert!("[1.0,2.0".parse::<VersionRange>().is_err());
        assert!("[2.0,1.0]".parse::<VersionRange>().is_err());
        assert!("[1.0]".parse::<VersionRange>().is_err());
    }

    #[test]
    fn test_version_serde_as_string() {
        let version = Version::new(3, 1, 4);
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"3.1.4\"");
        let range: VersionRange = serde_json::from_str("\"[1.0.0,2.0.0)\"").unwrap();
        assert_eq!(range.to_string(), "[1.0.0,2.0.0)");
    }
}
