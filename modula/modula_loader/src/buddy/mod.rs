//! Buddy class loading.
//!
//! A module declaring `Eclipse-BuddyPolicy` gets a [`BuddyPolicyChain`]:
//! an ordered list of named policies consulted when its own loader cannot
//! satisfy a lookup. Policy instances are created lazily, one slot at a
//! time, and the first policy returning a hit wins. Resource list queries
//! instead collect from every policy.
//!
//! | name         | delegates to                                   |
//! |--------------|------------------------------------------------|
//! | `registered` | modules registered as buddies of the owner     |
//! | `global`     | visible exporters of the requested package     |
//! | `dependent`  | modules depending on the owner, transitively   |
//! | `app`        | the application host loader                    |
//! | `ext`        | the extension host loader                      |
//! | `boot`       | the bootstrap host loader                      |
//! | `parent`     | the configured parent host loader              |

mod policies;

use std::sync::{Arc, Weak};

use modula_core::types::parse_header;
use modula_core::{ModuleEvent, ModuleEventKind, ModuleId};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::class::{extend_unique, HostLoaderKind, LoadedClass, ResourceRef};
use crate::context::LookupContext;
use crate::environment::ModuleEnvironment;

/// Names understood by [`BuddyPolicyChain`].
pub const POLICY_NAMES: [&str; 7] = [
    "registered",
    "global",
    "dependent",
    "app",
    "ext",
    "boot",
    "parent",
];

/// A strategy for satisfying lookups the owning loader could not.
pub trait BuddyPolicy: Send + Sync {
    /// Policy name as written in the manifest.
    fn name(&self) -> &str;

    /// Find a class.
    fn load_class(&self, name: &str, ctx: &LookupContext) -> Option<Arc<LoadedClass>>;

    /// Find a resource.
    fn get_resource(&self, name: &str, ctx: &LookupContext) -> Option<ResourceRef>;

    /// Find every resource with the name.
    fn get_resources(&self, name: &str, ctx: &LookupContext) -> Vec<ResourceRef>;
}

struct Slot {
    name: String,
    policy: OnceCell<Option<Arc<dyn BuddyPolicy>>>,
}

/// The ordered, lazily-instantiated policy list of one module.
pub struct BuddyPolicyChain {
    owner: ModuleId,
    env: Weak<dyn ModuleEnvironment>,
    slots: Vec<Slot>,
}

impl BuddyPolicyChain {
    /// Build a chain from an `Eclipse-BuddyPolicy` header value.
    ///
    /// Each comma-separated clause is parsed on its own; a malformed or
    /// empty clause is logged and skipped without dropping the others.
    pub fn parse(owner: ModuleId, header: &str, env: Weak<dyn ModuleEnvironment>) -> Self {
        let mut names = Vec::new();
        for clause in header.split(',') {
            if clause.trim().is_empty() {
                if !header.trim().is_empty() {
                    warn!(module = %owner, header, "skipping empty buddy policy clause");
                }
                continue;
            }
            match parse_header(clause) {
                Ok(parsed) => names.extend(parsed.into_iter().flat_map(|clause| clause.paths)),
                Err(e) => {
                    warn!(module = %owner, clause = clause.trim(), error = %e, "skipping malformed buddy policy clause")
                }
            }
        }
        Self::with_names(owner, names, env)
    }

    /// Build a chain from policy names.
    pub fn with_names(
        owner: ModuleId,
        names: impl IntoIterator<Item = impl Into<String>>,
        env: Weak<dyn ModuleEnvironment>,
    ) -> Self {
        let slots = names
            .into_iter()
            .map(|name| Slot {
                name: name.into(),
                policy: OnceCell::new(),
            })
            .collect();
        Self { owner, env, slots }
    }

    /// A chain that never finds anything.
    pub fn empty(owner: ModuleId, env: Weak<dyn ModuleEnvironment>) -> Self {
        Self::with_names(owner, Vec::<String>::new(), env)
    }

    /// Owning module.
    pub fn owner(&self) -> ModuleId {
        self.owner
    }

    /// Declared policy names, in order.
    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.name.as_str()).collect()
    }

    /// Number of declared policies.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no policy is declared.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots whose policy has been instantiated (or found unknown).
    pub fn resolved_slots(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.policy.get().is_some())
            .count()
    }

    fn policy(&self, slot: &Slot) -> Option<Arc<dyn BuddyPolicy>> {
        slot.policy
            .get_or_init(|| self.instantiate(&slot.name))
            .clone()
    }

    fn instantiate(&self, name: &str) -> Option<Arc<dyn BuddyPolicy>> {
        let env = self.env.clone();
        let policy: Arc<dyn BuddyPolicy> = match name.to_ascii_lowercase().as_str() {
            "registered" => policies::registered(self.owner, env),
            "dependent" => policies::dependent(self.owner, env),
            "global" => Arc::new(policies::GlobalPolicy::new(self.owner, env)),
            "app" => Arc::new(policies::HostPolicy::fixed("app", HostLoaderKind::App, env)),
            "ext" => Arc::new(policies::HostPolicy::fixed("ext", HostLoaderKind::Ext, env)),
            "boot" => Arc::new(policies::HostPolicy::fixed("boot", HostLoaderKind::Boot, env)),
            "parent" => Arc::new(policies::HostPolicy::parent(env)),
            _ => {
                warn!(module = %self.owner, policy = name, "unknown buddy policy");
                return None;
            }
        };
        debug!(module = %self.owner, policy = name, "instantiated buddy policy");
        Some(policy)
    }

    fn guard_key(&self, kind: &str, name: &str) -> String {
        format!("buddy:{}:{}:{}", self.owner, kind, name)
    }

    fn policies(&self) -> impl Iterator<Item = Arc<dyn BuddyPolicy>> + '_ {
        self.slots.iter().filter_map(|slot| self.policy(slot))
    }

    /// Consult each policy in order, returning the first class found.
    ///
    /// A lookup of a name already in flight through this chain returns
    /// `None`.
    pub fn load_class(&self, name: &str, ctx: &LookupContext) -> Option<Arc<LoadedClass>> {
        if self.slots.is_empty() {
            return None;
        }
        let _guard = ctx.enter(self.guard_key("class", name))?;
        self.policies().find_map(|policy| policy.load_class(name, ctx))
    }

    /// Consult each policy in order, returning the first resource found.
    pub fn get_resource(&self, name: &str, ctx: &LookupContext) -> Option<ResourceRef> {
        if self.slots.is_empty() {
            return None;
        }
        let _guard = ctx.enter(self.guard_key("resource", name))?;
        self.policies().find_map(|policy| policy.get_resource(name, ctx))
    }

    /// Collect the resources found by every policy, without duplicates.
    pub fn get_resources(&self, name: &str, ctx: &LookupContext) -> Vec<ResourceRef> {
        let mut found = Vec::new();
        if self.slots.is_empty() {
            return found;
        }
        let Some(_guard) = ctx.enter(self.guard_key("resources", name)) else {
            return found;
        };
        for policy in self.policies() {
            extend_unique(&mut found, policy.get_resources(name, ctx));
        }
        found
    }
}

impl std::fmt::Debug for BuddyPolicyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuddyPolicyChain")
            .field("owner", &self.owner)
            .field("policies", &self.names())
            .finish()
    }
}

/// Holds the current chain of a module and rebuilds it when the module's
/// wiring changes.
pub struct PolicyHandler {
    owner: ModuleId,
    env: Weak<dyn ModuleEnvironment>,
    chain: RwLock<Arc<BuddyPolicyChain>>,
}

impl PolicyHandler {
    /// Create a handler for `owner` with its current header.
    pub fn new(owner: ModuleId, header: Option<&str>, env: Weak<dyn ModuleEnvironment>) -> Self {
        let chain = Self::build(owner, header, env.clone());
        Self {
            owner,
            env,
            chain: RwLock::new(Arc::new(chain)),
        }
    }

    fn build(owner: ModuleId, header: Option<&str>, env: Weak<dyn ModuleEnvironment>) -> BuddyPolicyChain {
        match header {
            Some(header) => BuddyPolicyChain::parse(owner, header, env),
            None => BuddyPolicyChain::empty(owner, env),
        }
    }

    /// The current chain.
    pub fn chain(&self) -> Arc<BuddyPolicyChain> {
        self.chain.read().clone()
    }

    /// Discard the current chain and build a new one from `header`.
    pub fn rebuild(&self, header: Option<&str>) {
        let chain = Self::build(self.owner, header, self.env.clone());
        debug!(module = %self.owner, policies = ?chain.names(), "rebuilt buddy policy chain");
        *self.chain.write() = Arc::new(chain);
    }

    /// React to a lifecycle event: the chain is rebuilt from the owner's
    /// current descriptor when the owner is resolved or unresolved.
    pub fn handle_event(&self, event: &ModuleEvent) {
        if event.module != self.owner {
            return;
        }
        if !matches!(event.kind, ModuleEventKind::Resolved | ModuleEventKind::Unresolved) {
            return;
        }
        let header = self
            .env
            .upgrade()
            .and_then(|env| env.descriptor(self.owner))
            .and_then(|descriptor| descriptor.buddy_policy.clone());
        self.rebuild(header.as_deref());
    }

    /// See [`BuddyPolicyChain::load_class`].
    pub fn load_class(&self, name: &str, ctx: &LookupContext) -> Option<Arc<LoadedClass>> {
        self.chain().load_class(name, ctx)
    }

    /// See [`BuddyPolicyChain::get_resource`].
    pub fn get_resource(&self, name: &str, ctx: &LookupContext) -> Option<ResourceRef> {
        self.chain().get_resource(name, ctx)
    }

    /// See [`BuddyPolicyChain::get_resources`].
    pub fn get_resources(&self, name: &str, ctx: &LookupContext) -> Vec<ResourceRef> {
        self.chain().get_resources(name, ctx)
    }
}

impl std::fmt::Debug for PolicyHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyHandler")
            .field("owner", &self.owner)
            .field("chain", &*self.chain.read())
            .finish()
    }
}
