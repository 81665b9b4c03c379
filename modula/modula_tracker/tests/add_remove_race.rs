//! Integration tests for balanced customizer callbacks when modules are
//! untracked while being added.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use modula_core::{ModuleEvent, ModuleEventKind, ModuleId, ModuleState, StateMask, Version};
use modula_tracker::{HookRegistry, ModuleSource, ModuleTracker, TrackedModule, TrackerCustomizer};
use parking_lot::Mutex;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

// Initialize tracing for tests
fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

struct NoModules;

impl ModuleSource for NoModules {
    fn modules(&self) -> Vec<TrackedModule> {
        Vec::new()
    }
}

/// Records every callback; `adding` blocks until released when gated.
struct Recorder {
    calls: Mutex<Vec<String>>,
    gate: Option<(Sender<()>, Receiver<()>)>,
}

impl Recorder {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    fn gated(entered: Sender<()>, release: Receiver<()>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            gate: Some((entered, release)),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl TrackerCustomizer<String> for Recorder {
    fn adding(&self, module: &TrackedModule, _event: Option<&ModuleEvent>) -> Option<String> {
        self.calls.lock().push(format!("adding {}", module.symbolic_name));
        if let Some((entered, release)) = &self.gate {
            entered.send(()).unwrap();
            release.recv().unwrap();
        }
        Some(format!("object-{}", module.symbolic_name))
    }

    fn modified(&self, module: &TrackedModule, _event: Option<&ModuleEvent>, _object: &String) {
        self.calls.lock().push(format!("modified {}", module.symbolic_name));
    }

    fn removed(&self, module: &TrackedModule, _event: Option<&ModuleEvent>, object: String) {
        self.calls
            .lock()
            .push(format!("removed {} {}", module.symbolic_name, object));
    }
}

fn active(name: &str) -> TrackedModule {
    TrackedModule {
        id: ModuleId::new(),
        symbolic_name: name.to_string(),
        version: Version::new(1, 0, 0),
        state: ModuleState::Active,
    }
}

#[test]
fn test_untrack_during_adding_is_balanced() {
    init_tracing();
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let recorder = Arc::new(Recorder::gated(entered_tx, release_rx));
    let tracker = Arc::new(ModuleTracker::new(
        Arc::new(HookRegistry::new()),
        Arc::new(NoModules),
        StateMask::ACTIVE,
        recorder.clone() as Arc<dyn TrackerCustomizer<String>>,
    ));
    tracker.open().unwrap();

    let module = active("slow");
    let adder = {
        let tracker = tracker.clone();
        let module = module.clone();
        thread::spawn(move || tracker.track(module))
    };

    entered_rx.recv().unwrap();
    tracker.untrack(&module);
    assert_eq!(recorder.calls(), vec!["adding slow".to_string()]);

    release_tx.send(()).unwrap();
    adder.join().unwrap();

    assert_eq!(
        recorder.calls(),
        vec![
            "adding slow".to_string(),
            "removed slow object-slow".to_string()
        ]
    );
    assert!(tracker.is_empty());
    assert_eq!(tracker.tracking_count(), 0);
}

#[test]
fn test_close_during_adding_is_balanced() {
    let (entered_tx, entered_rx) = bounded(1);
    let (release_tx, release_rx) = bounded(1);
    let recorder = Arc::new(Recorder::gated(entered_tx, release_rx));
    let tracker = Arc::new(ModuleTracker::new(
        Arc::new(HookRegistry::new()),
        Arc::new(NoModules),
        StateMask::ACTIVE,
        recorder.clone() as Arc<dyn TrackerCustomizer<String>>,
    ));
    tracker.open().unwrap();

    let adder = {
        let tracker = tracker.clone();
        thread::spawn(move || tracker.track(active("late")))
    };
    entered_rx.recv().unwrap();
    tracker.close();
    release_tx.send(()).unwrap();
    adder.join().unwrap();

    assert_eq!(
        recorder.calls(),
        vec![
            "adding late".to_string(),
            "removed late object-late".to_string()
        ]
    );
    assert!(tracker.is_empty());
}

#[test]
fn test_repeated_events_never_modify_after_remove() {
    let registry = Arc::new(HookRegistry::new());
    let recorder = Arc::new(Recorder::new());
    let tracker = ModuleTracker::new(
        registry.clone(),
        Arc::new(NoModules),
        StateMask::RESOLVED | StateMask::ACTIVE,
        recorder.clone() as Arc<dyn TrackerCustomizer<String>>,
    );
    tracker.open().unwrap();

    let module = active("m");
    let event = |kind, state| {
        ModuleEvent::new(kind, module.id, "m", Version::new(1, 0, 0), state)
    };
    registry.dispatch(&event(ModuleEventKind::Resolved, ModuleState::Resolved));
    registry.dispatch(&event(ModuleEventKind::Started, ModuleState::Active));
    registry.dispatch(&event(ModuleEventKind::Stopped, ModuleState::Resolved));
    registry.dispatch(&event(ModuleEventKind::Uninstalled, ModuleState::Uninstalled));
    registry.dispatch(&event(ModuleEventKind::Uninstalled, ModuleState::Uninstalled));
    assert_eq!(tracker.tracking_count(), 4);

    tracker.close();
    registry.dispatch(&event(ModuleEventKind::Resolved, ModuleState::Resolved));

    assert_eq!(
        recorder.calls(),
        vec![
            "adding m".to_string(),
            "modified m".to_string(),
            "modified m".to_string(),
            "removed m object-m".to_string(),
        ]
    );
}

#[test]
fn test_concurrent_track_untrack_pairs() {
    let recorder = Arc::new(Recorder::new());
    let tracker = Arc::new(ModuleTracker::new(
        Arc::new(HookRegistry::new()),
        Arc::new(NoModules),
        StateMask::ACTIVE,
        recorder.clone() as Arc<dyn TrackerCustomizer<String>>,
    ));
    tracker.open().unwrap();
    let modules: Vec<TrackedModule> = (0..16).map(|i| active(&format!("m{}", i))).collect();

    thread::scope(|scope| {
        for module in &modules {
            let adder = tracker.clone();
            let remover = tracker.clone();
            scope.spawn(move || adder.track(module.clone()));
            scope.spawn(move || remover.untrack(module));
        }
    });
    tracker.close();

    let calls = recorder.calls();
    for module in &modules {
        let adds = calls
            .iter()
            .filter(|c| **c == format!("adding {}", module.symbolic_name))
            .count();
        let removes = calls
            .iter()
            .filter(|c| c.starts_with(&format!("removed {} ", module.symbolic_name)))
            .count();
        assert_eq!(adds, removes, "unbalanced callbacks for {}", module.symbolic_name);
        assert!(adds <= 1);
    }
}
