//! Core data types for the Modula platform.
//!
//! Module descriptors, lifecycle states and manifest headers.

pub mod manifest;
pub mod module;

pub use manifest::{parse_header, validate_package_name, HeaderClause, PackageExport, PackageImport};
pub use module::{
    package_of_class, package_of_resource, ModuleDescriptor, ModuleState, StateMask,
};
