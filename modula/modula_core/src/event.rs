//! Module and framework events.
//!
//! Lifecycle transitions are described by [`ModuleEvent`] and delivered
//! synchronously to listeners by the lifecycle dispatcher. Everything the
//! framework wants to surface for diagnostics (black-listed weaving hooks,
//! unrecoverable files) is a [`FrameworkEvent`] published on an
//! [`EventChannel`]; publishing never blocks the caller.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::id::ModuleId;
use crate::types::ModuleState;
use crate::utils::Version;

/// The lifecycle transition a module event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleEventKind {
    /// The module was installed.
    Installed,

    /// The module was wired.
    Resolved,

    /// The module is starting.
    Starting,

    /// The module started.
    Started,

    /// The module is stopping.
    Stopping,

    /// The module stopped.
    Stopped,

    /// The module's wiring was discarded.
    Unresolved,

    /// The module content was updated.
    Updated,

    /// The module was uninstalled.
    Uninstalled,
}

/// A lifecycle event for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleEvent {
    /// What happened
    pub kind: ModuleEventKind,

    /// The module the event is about
    pub module: ModuleId,

    /// Symbolic name of the module
    pub symbolic_name: String,

    /// Version of the module
    pub version: Version,

    /// State of the module after the transition
    pub state: ModuleState,
}

impl ModuleEvent {
    /// Create a new module event.
    pub fn new(
        kind: ModuleEventKind,
        module: ModuleId,
        symbolic_name: impl Into<String>,
        version: Version,
        state: ModuleState,
    ) -> Self {
        Self {
            kind,
            module,
            symbolic_name: symbolic_name.into(),
            version,
            state,
        }
    }
}

/// An event published on the framework event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameworkEvent {
    /// A module lifecycle transition
    Module(ModuleEvent),

    /// A failure worth surfacing to diagnostics
    Error {
        /// Component reporting the failure
        source: String,

        /// Module involved, if any
        module: Option<ModuleId>,

        /// Failure description
        message: String,
    },

    /// A recoverable anomaly
    Warning {
        /// Component reporting the anomaly
        source: String,

        /// Description
        message: String,
    },

    /// A refresh of module wirings completed
    Refreshed,
}

impl FrameworkEvent {
    /// Build an error event.
    pub fn error(
        source: impl Into<String>,
        module: Option<ModuleId>,
        message: impl Into<String>,
    ) -> Self {
        Self::Error {
            source: source.into(),
            module,
            message: message.into(),
        }
    }
}

/// Fan-out channel for framework events.
///
/// Every subscriber receives every event published after it subscribed.
/// Subscribers that dropped their receiver are pruned on the next publish.
#[derive(Clone, Default)]
pub struct EventChannel {
    subscribers: Arc<Mutex<Vec<Sender<FrameworkEvent>>>>,
}

impl EventChannel {
    /// Create a channel with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> Receiver<FrameworkEvent> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    /// Publish an event without blocking.
    pub fn publish(&self, event: FrameworkEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
