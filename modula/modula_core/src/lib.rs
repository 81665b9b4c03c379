//! # Modula Core
//!
//! `modula_core` provides the building blocks shared by every crate of the
//! Modula module platform: error types, identifiers, versions, manifest
//! header parsing, module descriptors and lifecycle events.
//!
//! ## Core Concepts
//!
//! 1. **Modules**: versioned units of code declaring the packages they
//!    import and export, optional buddy policies and an optional fragment
//!    host. A module moves through the lifecycle states `Installed`,
//!    `Resolved`, `Starting`, `Active`, `Stopping` and `Uninstalled`.
//!
//! 2. **Regions**: isolation boundaries grouping modules. Visibility across
//!    regions is gated by filtered edges (see `modula_region`).
//!
//! 3. **Events**: lifecycle transitions are published as [`ModuleEvent`]s to
//!    synchronous listeners, while failures worth surfacing to diagnostics
//!    flow through the non-blocking [`EventChannel`].
//!
//! ## Crate Structure
//!
//! - **error**: Error taxonomy for all Modula components
//! - **id**: Strongly-typed identifier types
//! - **event**: Module and framework events, error-event channel
//! - **types**: Module descriptors, manifest headers, lifecycle states
//! - **utils**: Versions and logging setup

pub mod error;
pub mod event;
pub mod id;
pub mod types;
pub mod utils;

pub use error::{Error, Result};
pub use event::{EventChannel, FrameworkEvent, ModuleEvent, ModuleEventKind};
pub use id::{HookId, ListenerId, ModuleId};
pub use types::{
    HeaderClause, ModuleDescriptor, ModuleState, PackageExport, PackageImport, StateMask,
};
pub use utils::{LogLevel, LoggingConfig, Version, VersionRange};
