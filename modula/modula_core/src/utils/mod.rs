//! Utility functions and types.
//!
//! Versions and version ranges used by module descriptors, and the
//! logging setup shared by binaries and tests.

pub mod logging;
pub mod version;

pub use logging::{init_logging, LogLevel, LoggingConfig};
pub use version::{Version, VersionParseError, VersionRange};
