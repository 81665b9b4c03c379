//! # Modula Loader
//!
//! Class and resource loading for Modula modules.
//!
//! Each resolved module owns a [`ModuleClassLoader`]. Lookups the loader
//! cannot satisfy from its wiring or its own content fall through to the
//! module's [`BuddyPolicyChain`], and every class the loader defines passes
//! through the shared [`WeavingPipeline`] first.
//!
//! Loaders never hold strong references to each other: they reach other
//! modules through a [`ModuleEnvironment`] implemented by the framework.
//! Re-entrant delegation is cut short by the [`LookupContext`] threaded
//! through every delegated call.

pub mod buddy;
pub mod class;
pub mod context;
pub mod environment;
pub mod loader;
pub mod weaving;

pub use buddy::{BuddyPolicy, BuddyPolicyChain, PolicyHandler, POLICY_NAMES};
pub use class::{ClassSource, HostLoader, HostLoaderKind, LoadedClass, Origin, ResourceRef};
pub use context::{InFlight, LookupContext};
pub use environment::ModuleEnvironment;
pub use loader::{is_boot_delegated, ModuleClassLoader, ModuleWiring};
pub use weaving::{HookError, WeavingHook, WeavingPipeline, WovenClass, WovenClassState};
