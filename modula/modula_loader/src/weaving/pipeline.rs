//! The ordered weaving hook chain.

use std::cell::RefCell;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use modula_core::error::WeavingError;
use modula_core::{EventChannel, FrameworkEvent, HookId, ModuleId};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use thiserror::Error;
use thread_local::ThreadLocal;
use tracing::{debug, warn};

use super::woven::WovenClass;

/// Classes being woven on each thread, innermost last.
static WEAVING: Lazy<ThreadLocal<RefCell<Vec<String>>>> = Lazy::new(ThreadLocal::new);

/// Outcome of a hook that did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HookError {
    /// The hook refuses to let the class be defined. The hook stays
    /// registered.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The hook failed unexpectedly and will be black-listed.
    #[error("failed: {0}")]
    Failed(String),
}

impl From<WeavingError> for HookError {
    fn from(e: WeavingError) -> Self {
        HookError::Failed(e.to_string())
    }
}

/// A transformer invoked for every class defined by a module loader.
pub trait WeavingHook: Send + Sync {
    /// Inspect or modify the class.
    fn weave(&self, class: &mut WovenClass) -> Result<(), HookError>;
}

impl<F> WeavingHook for F
where
    F: Fn(&mut WovenClass) -> Result<(), HookError> + Send + Sync,
{
    fn weave(&self, class: &mut WovenClass) -> Result<(), HookError> {
        self(class)
    }
}

#[derive(Clone)]
struct Registration {
    id: HookId,
    name: String,
    hook: Arc<dyn WeavingHook>,
}

/// Runs registered weaving hooks over classes about to be defined.
///
/// Hooks run in registration order and each sees the bytes produced by
/// the previous one. A hook returning [`HookError::Failed`] or panicking
/// is black-listed for the lifetime of the pipeline.
pub struct WeavingPipeline {
    hooks: RwLock<Vec<Registration>>,
    blacklist: RwLock<HashSet<HookId>>,
    events: EventChannel,
}

struct StackEntry {
    key: String,
}

impl StackEntry {
    fn push(key: String) -> Option<Self> {
        let stack = WEAVING.get_or_default();
        let mut stack = stack.borrow_mut();
        if stack.contains(&key) {
            return None;
        }
        stack.push(key.clone());
        Some(Self { key })
    }
}

impl Drop for StackEntry {
    fn drop(&mut self) {
        let mut stack = WEAVING.get_or_default().borrow_mut();
        if let Some(index) = stack.iter().rposition(|key| *key == self.key) {
            stack.remove(index);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "hook panicked".to_string()
    }
}

impl WeavingPipeline {
    /// Create a pipeline with its own event channel.
    pub fn new() -> Self {
        Self::with_events(EventChannel::new())
    }

    /// Create a pipeline publishing failures on `events`.
    pub fn with_events(events: EventChannel) -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
            blacklist: RwLock::new(HashSet::new()),
            events,
        }
    }

    /// Channel on which hook failures are published.
    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    /// Append a hook to the chain.
    pub fn register(&self, name: impl Into<String>, hook: impl WeavingHook + 'static) -> HookId {
        let id = HookId::new();
        let name = name.into();
        debug!(hook = %id, %name, "registered weaving hook");
        self.hooks.write().push(Registration {
            id,
            name,
            hook: Arc::new(hook),
        });
        id
    }

    /// Remove a hook and forget whether it was black-listed. Returns
    /// whether it was registered.
    pub fn unregister(&self, id: HookId) -> bool {
        // blacklist before hooks, the order `weave` takes them in
        let mut blacklist = self.blacklist.write();
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|registration| registration.id != id);
        blacklist.remove(&id);
        hooks.len() != before
    }

    /// Number of registered hooks, black-listed ones included.
    pub fn hook_count(&self) -> usize {
        self.hooks.read().len()
    }

    /// Whether the hook has been black-listed.
    pub fn is_blacklisted(&self, id: HookId) -> bool {
        self.blacklist.read().contains(&id)
    }

    /// Run every active hook over a class.
    ///
    /// On success the returned class is in the `Transformed` state and its
    /// bytes are final.
    pub fn weave(
        &self,
        module: ModuleId,
        class_name: &str,
        bytes: Vec<u8>,
    ) -> Result<WovenClass, WeavingError> {
        let Some(_entry) = StackEntry::push(format!("{}/{}", module, class_name)) else {
            return Err(WeavingError::Circularity(class_name.to_string()));
        };

        let mut woven = WovenClass::new(module, class_name, bytes);
        let hooks: Vec<Registration> = {
            let blacklist = self.blacklist.read();
            self.hooks
                .read()
                .iter()
                .filter(|registration| !blacklist.contains(&registration.id))
                .cloned()
                .collect()
        };

        for registration in hooks {
            let outcome = catch_unwind(AssertUnwindSafe(|| registration.hook.weave(&mut woven)));
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(HookError::Rejected(reason))) => {
                    debug!(hook = %registration.name, class = class_name, %reason, "weaving hook rejected class");
                    woven.fail();
                    return Err(WeavingError::Rejected {
                        hook: registration.id,
                        class: class_name.to_string(),
                        reason,
                    });
                }
                Ok(Err(HookError::Failed(reason))) => reason,
                Err(payload) => panic_message(payload.as_ref()),
            };

            woven.fail();
            {
                let mut blacklist = self.blacklist.write();
                // the hook may have been unregistered while it ran
                if self.hooks.read().iter().any(|r| r.id == registration.id) {
                    blacklist.insert(registration.id);
                }
            }
            warn!(
                hook = %registration.name,
                class = class_name,
                %reason,
                "weaving hook failed and has been black-listed"
            );
            self.events.publish(FrameworkEvent::error(
                "weaving",
                Some(module),
                format!(
                    "weaving hook {} failed on {}: {}",
                    registration.name, class_name, reason
                ),
            ));
            return Err(WeavingError::HookFailed {
                hook: registration.id,
                class: class_name.to_string(),
                reason,
            });
        }

        woven.complete();
        Ok(woven)
    }
}

impl Default for WeavingPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WeavingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .hooks
            .read()
            .iter()
            .map(|registration| registration.name.clone())
            .collect();
        f.debug_struct("WeavingPipeline")
            .field("hooks", &names)
            .field("blacklisted", &self.blacklist.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weaving::WovenClassState;

    #[test]
    fn test_no_hooks_passes_bytes_through() {
        let pipeline = WeavingPipeline::new();
        let woven = pipeline.weave(ModuleId::new(), "org.a.B", vec![9]).unwrap();
        assert_eq!(woven.bytes(), &[9]);
        assert_eq!(woven.state(), WovenClassState::Transformed);
    }

    #[test]
    fn test_unregister() {
        let pipeline = WeavingPipeline::new();
        let id = pipeline.register("noop", |_: &mut WovenClass| -> Result<(), HookError> { Ok(()) });
        assert_eq!(pipeline.hook_count(), 1);
        assert!(pipeline.unregister(id));
        assert!(!pipeline.unregister(id));
        assert_eq!(pipeline.hook_count(), 0);
    }

    #[test]
    fn test_panicking_hook_is_blacklisted() {
        let pipeline = WeavingPipeline::new();
        let errors = pipeline.events().subscribe();
        let id = pipeline.register("panics", |_: &mut WovenClass| -> Result<(), HookError> {
            panic!("instrumentation bug")
        });

        let err = pipeline.weave(ModuleId::new(), "org.a.B", vec![]).unwrap_err();
        assert!(matches!(err, WeavingError::HookFailed { ref reason, .. } if reason == "instrumentation bug"));
        assert!(pipeline.is_blacklisted(id));
        assert!(matches!(errors.try_recv().unwrap(), FrameworkEvent::Error { .. }));
    }

    #[test]
    fn test_unregister_clears_blacklist_entry() {
        let pipeline = WeavingPipeline::new();
        let failing = pipeline.register("fails", |_: &mut WovenClass| -> Result<(), HookError> {
            Err(HookError::Failed("broken".to_string()))
        });
        assert!(pipeline.weave(ModuleId::new(), "org.a.B", vec![]).is_err());
        assert!(pipeline.is_blacklisted(failing));

        assert!(pipeline.unregister(failing));
        assert!(!pipeline.is_blacklisted(failing));
        assert!(format!("{:?}", pipeline).contains("blacklisted: 0"));
        assert!(pipeline.weave(ModuleId::new(), "org.a.B", vec![1]).is_ok());
    }
}
