//! Re-entrancy tracking for delegated lookups.
//!
//! A [`LookupContext`] records the names currently being looked up along
//! one delegation chain. Delegation code passes the context explicitly;
//! top-level entry points that have no caller context use the per-thread
//! one from [`LookupContext::with_current`].

use std::cell::RefCell;
use std::collections::HashSet;

use once_cell::sync::Lazy;
use thread_local::ThreadLocal;

/// Per-thread fallback contexts
static THREAD_CONTEXT: Lazy<ThreadLocal<LookupContext>> = Lazy::new(ThreadLocal::new);

/// Names in flight along one delegation chain.
#[derive(Debug, Default)]
pub struct LookupContext {
    in_flight: RefCell<HashSet<String>>,
}

impl LookupContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with the calling thread's context.
    pub fn with_current<R>(f: impl FnOnce(&LookupContext) -> R) -> R {
        f(THREAD_CONTEXT.get_or_default())
    }

    /// Mark `key` as in flight.
    ///
    /// Returns `None` when `key` is already in flight, meaning the caller is
    /// re-entering its own lookup and should report "not found". The mark
    /// is cleared when the guard drops.
    pub fn enter(&self, key: impl Into<String>) -> Option<InFlight<'_>> {
        let key = key.into();
        if !self.in_flight.borrow_mut().insert(key.clone()) {
            return None;
        }
        Some(InFlight { context: self, key })
    }

    /// Whether `key` is in flight.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.borrow().contains(key)
    }

    /// Number of names in flight.
    pub fn depth(&self) -> usize {
        self.in_flight.borrow().len()
    }
}

/// Guard clearing an in-flight mark on drop.
#[derive(Debug)]
pub struct InFlight<'a> {
    context: &'a LookupContext,
    key: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.context.in_flight.borrow_mut().remove(&self.key);
    }
}
