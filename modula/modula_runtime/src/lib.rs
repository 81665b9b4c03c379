//! # Modula Runtime
//!
//! The framework context of the Modula module platform.
//!
//! A [`Framework`] installs modules into regions, wires them with a
//! best-effort resolver that picks the highest visible version satisfying
//! each requirement, gives every resolved module a class loader, and
//! persists its metadata through the reliable store so that a restart
//! finds the same modules and regions.
//!
//! ```no_run
//! use modula_core::{ModuleDescriptor, Version};
//! use modula_runtime::{Framework, FrameworkConfig};
//!
//! # fn main() -> modula_core::Result<()> {
//! let framework = Framework::new(FrameworkConfig::default())?;
//! let id = framework.install(
//!     ModuleDescriptor::new("org.example", Version::new(1, 0, 0))
//!         .with_class("org.example.Main", vec![0xCA, 0xFE]),
//! )?;
//! framework.start(id)?;
//! let class = framework.load_class(id, "org.example.Main")?;
//! assert_eq!(class.name(), "org.example.Main");
//! # Ok(())
//! # }
//! ```

pub mod config;
mod environment;
pub mod framework;
pub mod persistence;
mod resolver;

pub use config::{ConnectionConfig, FrameworkConfig, RegionConfig};
pub use framework::{Framework, ModuleInfo};
pub use persistence::{DIGRAPH_KEY, MODULES_KEY};
