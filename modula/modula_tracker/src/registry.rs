//! Synchronous lifecycle event dispatch.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use modula_core::{HookId, ListenerId, ModuleEvent};
use parking_lot::RwLock;
use tracing::{trace, warn};

/// Receives module lifecycle events on the thread that raised them.
pub trait ModuleListener: Send + Sync {
    /// Called once per event.
    fn module_changed(&self, event: &ModuleEvent);
}

impl<F> ModuleListener for F
where
    F: Fn(&ModuleEvent) + Send + Sync,
{
    fn module_changed(&self, event: &ModuleEvent) {
        self(event)
    }
}

/// The listeners an event is about to be delivered to. Event hooks may
/// remove entries but never add them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSet {
    ids: Vec<ListenerId>,
}

impl ListenerSet {
    /// Listener ids still selected.
    pub fn ids(&self) -> &[ListenerId] {
        &self.ids
    }

    /// Whether a listener is still selected.
    pub fn contains(&self, id: ListenerId) -> bool {
        self.ids.contains(&id)
    }

    /// Drop a listener from this delivery.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.ids.len();
        self.ids.retain(|existing| *existing != id);
        self.ids.len() != before
    }

    /// Keep only the listeners matching `keep`.
    pub fn retain(&mut self, keep: impl FnMut(&ListenerId) -> bool) {
        self.ids.retain(keep);
    }

    /// Number of selected listeners.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no listener is selected.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Inspects an event before delivery and may hide it from listeners.
pub trait EventHook: Send + Sync {
    /// Shrink `listeners` to hide `event` from some of them.
    fn event(&self, event: &ModuleEvent, listeners: &mut ListenerSet);
}

/// Registry of module listeners and event hooks.
///
/// Listener and hook lists are snapshotted before each dispatch, so
/// listeners added or removed during a dispatch take effect for the next
/// event.
#[derive(Default)]
pub struct HookRegistry {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn ModuleListener>)>>,
    event_hooks: RwLock<Vec<(HookId, Arc<dyn EventHook>)>>,
}

impl HookRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn add_listener(&self, listener: Arc<dyn ModuleListener>) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.write().push((id, listener));
        id
    }

    /// Unregister a listener. Returns whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Register an event hook.
    pub fn add_event_hook(&self, hook: Arc<dyn EventHook>) -> HookId {
        let id = HookId::new();
        self.event_hooks.write().push((id, hook));
        id
    }

    /// Unregister an event hook.
    pub fn remove_event_hook(&self, id: HookId) -> bool {
        let mut hooks = self.event_hooks.write();
        let before = hooks.len();
        hooks.retain(|(existing, _)| *existing != id);
        hooks.len() != before
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Deliver an event to every listener the event hooks left selected.
    ///
    /// No registry lock is held while hooks or listeners run. A panicking
    /// listener is logged and does not prevent delivery to the others.
    pub fn dispatch(&self, event: &ModuleEvent) {
        let listeners = self.listeners.read().clone();
        if listeners.is_empty() {
            return;
        }
        let hooks = self.event_hooks.read().clone();

        let mut selected = ListenerSet {
            ids: listeners.iter().map(|(id, _)| *id).collect(),
        };
        for (hook_id, hook) in &hooks {
            let outcome = catch_unwind(AssertUnwindSafe(|| hook.event(event, &mut selected)));
            if outcome.is_err() {
                warn!(hook = %hook_id, module = %event.module, "event hook panicked");
            }
        }

        for (id, listener) in listeners {
            if !selected.contains(id) {
                trace!(listener = %id, kind = ?event.kind, "event hidden by hook");
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.module_changed(event)));
            if outcome.is_err() {
                warn!(listener = %id, module = %event.module, kind = ?event.kind, "module listener panicked");
            }
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("listeners", &self.listeners.read().len())
            .field("event_hooks", &self.event_hooks.read().len())
            .finish()
    }
}
