//! Error types for the Modula module platform.
//!
//! Errors are organized by subsystem, with each subsystem having its own
//! error type. The root error type, `Error`, can wrap any of the
//! subsystem-specific errors so callers can handle failures uniformly at
//! the top level.
//!
//! Lookups that commonly miss (a class that is not in a module, a region
//! that is not connected) return `Option` rather than an error.

use std::path::PathBuf;

use crate::id::{HookId, ModuleId};
use crate::types::ModuleState;
use thiserror::Error;

/// Root error type for the Modula platform.
#[derive(Debug, Error)]
pub enum Error {
    /// Reliable file store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Region digraph errors
    #[error("Region error: {0}")]
    Region(#[from] RegionError),

    /// Filter syntax errors
    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    /// Manifest header errors
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Module lifecycle errors
    #[error("Module error: {0}")]
    Module(#[from] ModuleError),

    /// Class and resource loading errors
    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    /// Weaving pipeline errors
    #[error("Weaving error: {0}")]
    Weaving(#[from] WeavingError),

    /// Module tracker errors
    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General runtime errors
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Errors raised by the reliable file store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No generation of the file exists
    #[error("Reliable file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Every existing generation failed its checksum
    #[error("No valid generation of {} could be recovered", .0.display())]
    Corrupt(PathBuf),

    /// The file is already open for writing
    #[error("Reliable file is locked for writing: {}", .0.display())]
    Locked(PathBuf),

    /// The stream has already been committed or aborted
    #[error("Reliable stream for {} is closed", .0.display())]
    Closed(PathBuf),

    /// Underlying I/O failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path of the file being accessed
        path: PathBuf,

        /// The underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while parsing a filter expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    /// The filter string is malformed
    #[error("Invalid filter '{filter}' at position {position}: {reason}")]
    Syntax {
        /// The offending filter string
        filter: String,

        /// Byte offset where parsing failed
        position: usize,

        /// Human readable reason
        reason: String,
    },

    /// The namespace is empty or otherwise unusable
    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),
}

/// Errors raised by the region digraph.
#[derive(Debug, Error)]
pub enum RegionError {
    /// A region with the name already exists
    #[error("Region already exists: {0}")]
    AlreadyExists(String),

    /// No region with the name exists
    #[error("Region not found: {0}")]
    NotFound(String),

    /// The region name is not acceptable
    #[error("Invalid region name: '{0}'")]
    InvalidName(String),

    /// Regions cannot be connected to themselves
    #[error("Region {0} cannot be connected to itself")]
    SelfConnection(String),

    /// The module already belongs to another region
    #[error("Module {module} already belongs to region {region}")]
    ModuleAlreadyAssigned {
        /// The module being added
        module: ModuleId,

        /// The region currently owning the module
        region: String,
    },

    /// A filter could not be built
    #[error("Invalid region filter: {0}")]
    Filter(#[from] FilterError),
}

/// Errors raised while parsing manifest headers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid header '{header}': {reason}")]
pub struct ManifestError {
    /// The header value that failed to parse
    pub header: String,

    /// Human readable reason
    pub reason: String,
}

impl ManifestError {
    /// Create a new manifest error.
    pub fn new(header: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            reason: reason.into(),
        }
    }
}

/// Errors related to module lifecycle operations.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Module with the given ID was not found
    #[error("Module not found: {0}")]
    NotFound(ModuleId),

    /// A module with the same symbolic name and version is installed
    #[error("Module {name} {version} is already installed")]
    Duplicate {
        /// Symbolic name
        name: String,

        /// Version string
        version: String,
    },

    /// Module is in an invalid state for the requested operation
    #[error("Module {module} is in invalid state {state:?}")]
    InvalidState {
        /// The module
        module: ModuleId,

        /// Its current state
        state: ModuleState,
    },

    /// The module could not be resolved
    #[error("Module {module} could not be resolved: {reason}")]
    ResolutionFailed {
        /// The module
        module: ModuleId,

        /// Why resolution failed
        reason: String,
    },
}

/// Errors related to class and resource loading.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// No module supplies the class
    #[error("Class {class} not found from module {module}")]
    ClassNotFound {
        /// The requested class name
        class: String,

        /// The module that requested it
        module: String,
    },

    /// The class was found but could not be defined
    #[error("Failed to define class {class}: {source}")]
    DefinitionFailed {
        /// The class being defined
        class: String,

        /// The weaving failure that aborted the definition
        #[source]
        source: WeavingError,
    },

    /// The module has no class loader because it is not resolved
    #[error("Module {0} is not resolved")]
    NotResolved(ModuleId),
}

/// Errors raised by the weaving pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WeavingError {
    /// A hook rejected the class; the hook stays registered
    #[error("Weaving hook {hook} rejected class {class}: {reason}")]
    Rejected {
        /// The rejecting hook
        hook: HookId,

        /// The class being woven
        class: String,

        /// Reason supplied by the hook
        reason: String,
    },

    /// A hook failed unexpectedly and has been black-listed
    #[error("Weaving hook {hook} failed on class {class}: {reason}")]
    HookFailed {
        /// The failing hook
        hook: HookId,

        /// The class being woven
        class: String,

        /// Failure description
        reason: String,
    },

    /// The woven class can no longer be modified
    #[error("Woven class {0} is no longer mutable")]
    Immutable(String),

    /// A dynamic import added by a hook is malformed
    #[error("Invalid dynamic import '{import}': {reason}")]
    InvalidDynamicImport {
        /// The declaration as supplied
        import: String,

        /// Why it was rejected
        reason: String,
    },

    /// A hook triggered weaving of the class it is weaving
    #[error("Class {0} is already being woven on this thread")]
    Circularity(String),
}

/// Errors related to module tracking.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    /// The tracker is not open
    #[error("Tracker is not open")]
    NotOpen,

    /// The tracker was already opened
    #[error("Tracker is already open")]
    AlreadyOpen,
}

/// Errors that can occur in configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    /// The configuration file could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// The configuration is semantically invalid
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type used throughout the Modula platform.
pub type Result<T> = std::result::Result<T, Error>;
