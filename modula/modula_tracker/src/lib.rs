//! # Modula Tracker
//!
//! Synchronous lifecycle event dispatch and module tracking.
//!
//! The [`HookRegistry`] delivers every [`ModuleEvent`](modula_core::ModuleEvent)
//! to the registered listeners on the thread that raised it, after giving
//! event hooks the chance to hide the event from some listeners. A
//! [`ModuleTracker`] is one such listener: it maintains the modules whose
//! state matches a mask together with an object chosen by its
//! [`TrackerCustomizer`].

pub mod registry;
pub mod tracker;

pub use registry::{EventHook, HookRegistry, ListenerSet, ModuleListener};
pub use tracker::{ModuleSource, ModuleTracker, TrackModules, TrackedModule, TrackerCustomizer};
