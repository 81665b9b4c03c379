//! Class weaving.
//!
//! Every class a module loader defines first passes through the
//! [`WeavingPipeline`]. Hooks receive a mutable [`WovenClass`], may replace
//! its bytes and add dynamic imports, and may reject or fail the class.

mod pipeline;
mod woven;

pub use pipeline::{HookError, WeavingHook, WeavingPipeline};
pub use woven::{WovenClass, WovenClassState};
