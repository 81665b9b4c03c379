//! Tracking the set of modules in a state of interest.
//!
//! A [`ModuleTracker`] listens to lifecycle events and keeps, for every
//! module whose state matches its [`StateMask`], the object its
//! [`TrackerCustomizer`] returned from `adding`. Customizer callbacks never
//! run while the tracker's lock is held.
//!
//! A module being added is marked "in flight" for the duration of the
//! `adding` call. An untrack arriving in that window only clears the mark;
//! once `adding` returns the tracker notices the mark is gone and hands
//! the fresh object straight to `removed`, so customizers always see
//! balanced `adding`/`removed` pairs.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

use modula_core::error::TrackerError;
use modula_core::{ListenerId, ModuleEvent, ModuleId, ModuleState, StateMask, Version};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::registry::{HookRegistry, ModuleListener};

/// Identity and state of a module, as seen by a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedModule {
    /// Module id
    pub id: ModuleId,

    /// Symbolic name
    pub symbolic_name: String,

    /// Version
    pub version: Version,

    /// State at the time of the snapshot or event
    pub state: ModuleState,
}

impl From<&ModuleEvent> for TrackedModule {
    fn from(event: &ModuleEvent) -> Self {
        Self {
            id: event.module,
            symbolic_name: event.symbolic_name.clone(),
            version: event.version.clone(),
            state: event.state,
        }
    }
}

/// Supplies the installed modules when a tracker opens.
pub trait ModuleSource: Send + Sync {
    /// Every installed module.
    fn modules(&self) -> Vec<TrackedModule>;
}

/// Callbacks customizing what a tracker stores.
pub trait TrackerCustomizer<T>: Send + Sync {
    /// A module started matching. Return the object to track, or `None`
    /// to ignore the module.
    fn adding(&self, module: &TrackedModule, event: Option<&ModuleEvent>) -> Option<T>;

    /// A tracked module changed state but still matches.
    fn modified(&self, _module: &TrackedModule, _event: Option<&ModuleEvent>, _object: &T) {}

    /// A tracked module stopped matching or the tracker closed.
    fn removed(&self, _module: &TrackedModule, _event: Option<&ModuleEvent>, _object: T) {}
}

/// Tracks the modules themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackModules;

impl TrackerCustomizer<TrackedModule> for TrackModules {
    fn adding(&self, module: &TrackedModule, _event: Option<&ModuleEvent>) -> Option<TrackedModule> {
        Some(module.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Idle,
    Open,
    Closed,
}

struct Tracked<T> {
    status: Status,
    tracked: HashMap<ModuleId, (TrackedModule, T)>,
    adding: HashSet<ModuleId>,
    initial: Vec<TrackedModule>,
    tracking_count: i64,
    listener: Option<ListenerId>,
}

impl<T> Tracked<T> {
    fn new() -> Self {
        Self {
            status: Status::Idle,
            tracked: HashMap::new(),
            adding: HashSet::new(),
            initial: Vec::new(),
            tracking_count: 0,
            listener: None,
        }
    }
}

struct Inner<T> {
    mask: StateMask,
    customizer: Arc<dyn TrackerCustomizer<T>>,
    state: Mutex<Tracked<T>>,
}

enum Step<T> {
    Modified(T),
    Adding,
    Skip,
}

impl<T: Clone + Send + 'static> Inner<T> {
    fn changed(&self, event: &ModuleEvent) {
        let module = TrackedModule::from(event);
        {
            let mut state = self.state.lock();
            if state.status != Status::Open {
                return;
            }
            state.initial.retain(|m| m.id != module.id);
        }
        if self.mask.matches(event.state) {
            self.track(module, Some(event));
        } else {
            self.untrack(&module, Some(event));
        }
    }

    fn track(&self, module: TrackedModule, event: Option<&ModuleEvent>) {
        let step = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.status != Status::Open {
                Step::Skip
            } else if let Some((snapshot, object)) = state.tracked.get_mut(&module.id) {
                *snapshot = module.clone();
                let object = object.clone();
                state.tracking_count += 1;
                Step::Modified(object)
            } else if !state.adding.insert(module.id) {
                Step::Skip
            } else {
                Step::Adding
            }
        };

        match step {
            Step::Skip => {}
            Step::Modified(object) => self.customizer.modified(&module, event, &object),
            Step::Adding => self.add(module, event),
        }
    }

    fn add(&self, module: TrackedModule, event: Option<&ModuleEvent>) {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.customizer.adding(&module, event)));
        let object = match outcome {
            Ok(object) => object,
            Err(panic) => {
                self.state.lock().adding.remove(&module.id);
                resume_unwind(panic);
            }
        };

        let orphan = {
            let mut state = self.state.lock();
            let still_wanted = state.adding.remove(&module.id) && state.status == Status::Open;
            match object {
                Some(object) if still_wanted => {
                    trace!(module = %module.id, "tracking module");
                    state.tracked.insert(module.id, (module.clone(), object));
                    state.tracking_count += 1;
                    None
                }
                Some(object) => Some(object),
                None => None,
            }
        };

        if let Some(object) = orphan {
            debug!(module = %module.id, "module untracked while being added");
            self.customizer.removed(&module, event, object);
        }
    }

    fn untrack(&self, module: &TrackedModule, event: Option<&ModuleEvent>) {
        let removed = {
            let mut state = self.state.lock();
            let initial_before = state.initial.len();
            state.initial.retain(|m| m.id != module.id);
            if state.initial.len() != initial_before {
                return;
            }
            if state.adding.remove(&module.id) {
                return;
            }
            let removed = state.tracked.remove(&module.id);
            if removed.is_some() {
                state.tracking_count += 1;
            }
            removed
        };

        if let Some((_, object)) = removed {
            trace!(module = %module.id, "untracking module");
            self.customizer.removed(module, event, object);
        }
    }
}

struct TrackerListener<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + 'static> ModuleListener for TrackerListener<T> {
    fn module_changed(&self, event: &ModuleEvent) {
        self.inner.changed(event);
    }
}

/// Maintains the modules matching a state mask and their customized
/// objects.
pub struct ModuleTracker<T> {
    registry: Arc<HookRegistry>,
    source: Arc<dyn ModuleSource>,
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + Sync + 'static> ModuleTracker<T> {
    /// Create a closed tracker.
    pub fn new(
        registry: Arc<HookRegistry>,
        source: Arc<dyn ModuleSource>,
        mask: StateMask,
        customizer: Arc<dyn TrackerCustomizer<T>>,
    ) -> Self {
        Self {
            registry,
            source,
            inner: Arc::new(Inner {
                mask,
                customizer,
                state: Mutex::new(Tracked::new()),
            }),
        }
    }

    /// States selecting tracked modules.
    pub fn mask(&self) -> StateMask {
        self.inner.mask
    }

    /// Start tracking: register for events, then track every installed
    /// module whose state matches.
    pub fn open(&self) -> Result<(), TrackerError> {
        {
            let mut state = self.inner.state.lock();
            if state.status == Status::Open {
                return Err(TrackerError::AlreadyOpen);
            }
            *state = Tracked::new();
            state.status = Status::Open;
        }

        let listener = self.registry.add_listener(Arc::new(TrackerListener {
            inner: self.inner.clone(),
        }));
        let initial: Vec<TrackedModule> = self
            .source
            .modules()
            .into_iter()
            .filter(|module| self.inner.mask.matches(module.state))
            .collect();
        {
            let mut state = self.inner.state.lock();
            state.listener = Some(listener);
            state.initial = initial;
        }
        debug!(mask = ?self.inner.mask, "opened module tracker");

        loop {
            let next = {
                let mut state = self.inner.state.lock();
                if state.status != Status::Open || state.initial.is_empty() {
                    break;
                }
                let module = state.initial.remove(0);
                if state.tracked.contains_key(&module.id) || state.adding.contains(&module.id) {
                    continue;
                }
                state.adding.insert(module.id);
                module
            };
            self.inner.add(next, None);
        }
        Ok(())
    }

    /// Stop tracking. Every tracked module is passed to `removed` once.
    pub fn close(&self) {
        let (listener, modules) = {
            let mut state = self.inner.state.lock();
            if state.status != Status::Open {
                return;
            }
            state.status = Status::Closed;
            state.initial.clear();
            let modules: Vec<TrackedModule> = state
                .tracked
                .values()
                .map(|(module, _)| module.clone())
                .collect();
            (state.listener.take(), modules)
        };

        if let Some(listener) = listener {
            self.registry.remove_listener(listener);
        }
        for module in &modules {
            self.inner.untrack(module, None);
        }
        debug!(removed = modules.len(), "closed module tracker");
    }

    /// Whether the tracker is open.
    pub fn is_open(&self) -> bool {
        self.inner.state.lock().status == Status::Open
    }

    /// Track a module outside of event delivery, as if its state had just
    /// changed to `module.state`.
    pub fn track(&self, module: TrackedModule) {
        if self.inner.mask.matches(module.state) {
            self.inner.track(module, None);
        } else {
            self.inner.untrack(&module, None);
        }
    }

    /// Stop tracking a module.
    pub fn untrack(&self, module: &TrackedModule) {
        self.inner.untrack(module, None);
    }

    /// Stop tracking the module with the id.
    pub fn remove(&self, id: ModuleId) {
        let module = self
            .inner
            .state
            .lock()
            .tracked
            .get(&id)
            .map(|(module, _)| module.clone());
        if let Some(module) = module {
            self.inner.untrack(&module, None);
        }
    }

    /// Tracked modules.
    pub fn modules(&self) -> Vec<TrackedModule> {
        self.inner
            .state
            .lock()
            .tracked
            .values()
            .map(|(module, _)| module.clone())
            .collect()
    }

    /// The customized object of a tracked module.
    pub fn object(&self, id: ModuleId) -> Option<T> {
        self.inner
            .state
            .lock()
            .tracked
            .get(&id)
            .map(|(_, object)| object.clone())
    }

    /// Number of tracked modules.
    pub fn size(&self) -> usize {
        self.inner.state.lock().tracked.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Counter bumped by every change to the tracked set, or `-1` when the
    /// tracker is not open.
    pub fn tracking_count(&self) -> i64 {
        let state = self.inner.state.lock();
        match state.status {
            Status::Open => state.tracking_count,
            Status::Idle | Status::Closed => -1,
        }
    }
}

impl<T> Drop for ModuleTracker<T> {
    fn drop(&mut self) {
        let listener = self.inner.state.lock().listener.take();
        if let Some(listener) = listener {
            self.registry.remove_listener(listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modula_core::ModuleEventKind;

    struct Installed(Mutex<Vec<TrackedModule>>);

    impl ModuleSource for Installed {
        fn modules(&self) -> Vec<TrackedModule> {
            self.0.lock().clone()
        }
    }

    fn module(name: &str, state: ModuleState) -> TrackedModule {
        TrackedModule {
            id: ModuleId::new(),
            symbolic_name: name.to_string(),
            version: Version::new(1, 0, 0),
            state,
        }
    }

    fn event_for(module: &TrackedModule, kind: ModuleEventKind, state: ModuleState) -> ModuleEvent {
        ModuleEvent::new(kind, module.id, module.symbolic_name.clone(), module.version.clone(), state)
    }

    #[test]
    fn test_open_tracks_matching_modules() {
        let active = module("a", ModuleState::Active);
        let installed = module("b", ModuleState::Installed);
        let source = Arc::new(Installed(Mutex::new(vec![active.clone(), installed])));
        let registry = Arc::new(HookRegistry::new());
        let tracker: ModuleTracker<TrackedModule> = ModuleTracker::new(
            registry.clone(),
            source,
            StateMask::ACTIVE | StateMask::STARTING,
            Arc::new(TrackModules),
        );

        assert_eq!(tracker.tracking_count(), -1);
        tracker.open().unwrap();
        assert_eq!(tracker.open(), Err(TrackerError::AlreadyOpen));
        assert_eq!(tracker.size(), 1);
        assert_eq!(tracker.object(active.id).unwrap().symbolic_name, "a");
        assert_eq!(registry.listener_count(), 1);

        tracker.close();
        assert_eq!(tracker.size(), 0);
        assert_eq!(tracker.tracking_count(), -1);
        assert_eq!(registry.listener_count(), 0);
    }

    #[test]
    fn test_events_add_modify_and_remove() {
        let registry = Arc::new(HookRegistry::new());
        let source = Arc::new(Installed(Mutex::new(Vec::new())));
        let tracker: ModuleTracker<TrackedModule> = ModuleTracker::new(
            registry.clone(),
            source,
            StateMask::RESOLVED | StateMask::ACTIVE,
            Arc::new(TrackModules),
        );
        tracker.open().unwrap();

        let m = module("m", ModuleState::Installed);
        registry.dispatch(&event_for(&m, ModuleEventKind::Installed, ModuleState::Installed));
        assert_eq!(tracker.size(), 0);
        assert_eq!(tracker.tracking_count(), 0);

        registry.dispatch(&event_for(&m, ModuleEventKind::Resolved, ModuleState::Resolved));
        assert_eq!(tracker.size(), 1);
        assert_eq!(tracker.tracking_count(), 1);

        registry.dispatch(&event_for(&m, ModuleEventKind::Started, ModuleState::Active));
        assert_eq!(tracker.modules()[0].state, ModuleState::Active);
        assert_eq!(tracker.tracking_count(), 2);

        registry.dispatch(&event_for(&m, ModuleEventKind::Unresolved, ModuleState::Installed));
        assert!(tracker.is_empty());
        assert_eq!(tracker.tracking_count(), 3);
    }

    #[test]
    fn test_remove_by_id() {
        let active = module("a", ModuleState::Active);
        let source = Arc::new(Installed(Mutex::new(vec![active.clone()])));
        let tracker: ModuleTracker<TrackedModule> = ModuleTracker::new(
            Arc::new(HookRegistry::new()),
            source,
            StateMask::ACTIVE,
            Arc::new(TrackModules),
        );
        tracker.open().unwrap();
        tracker.remove(active.id);
        assert!(tracker.is_empty());
        assert!(tracker.is_open());
    }
}
