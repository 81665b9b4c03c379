//! The built-in buddy policies.

use std::sync::{Arc, Weak};

use modula_core::types::{package_of_class, package_of_resource};
use modula_core::ModuleId;
use tracing::debug;

use super::BuddyPolicy;
use crate::class::{extend_unique, HostLoaderKind, LoadedClass, ResourceRef};
use crate::context::LookupContext;
use crate::environment::ModuleEnvironment;

fn load_from(
    env: &dyn ModuleEnvironment,
    module: ModuleId,
    name: &str,
    ctx: &LookupContext,
) -> Option<Arc<LoadedClass>> {
    match env.load_class_from(module, name, ctx) {
        Ok(found) => found,
        Err(e) => {
            debug!(%module, class = name, error = %e, "buddy delegate failed");
            None
        }
    }
}

/// Delegates to a fixed list of modules computed per query.
struct ModuleListPolicy<F> {
    name: &'static str,
    env: Weak<dyn ModuleEnvironment>,
    modules: F,
}

impl<F> ModuleListPolicy<F>
where
    F: Fn(&dyn ModuleEnvironment) -> Vec<ModuleId> + Send + Sync,
{
    fn candidates(&self) -> Option<(Arc<dyn ModuleEnvironment>, Vec<ModuleId>)> {
        let env = self.env.upgrade()?;
        let modules = (self.modules)(env.as_ref());
        Some((env, modules))
    }
}

impl<F> BuddyPolicy for ModuleListPolicy<F>
where
    F: Fn(&dyn ModuleEnvironment) -> Vec<ModuleId> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn load_class(&self, name: &str, ctx: &LookupContext) -> Option<Arc<LoadedClass>> {
        let (env, modules) = self.candidates()?;
        modules
            .into_iter()
            .find_map(|module| load_from(env.as_ref(), module, name, ctx))
    }

    fn get_resource(&self, name: &str, ctx: &LookupContext) -> Option<ResourceRef> {
        let (env, modules) = self.candidates()?;
        modules
            .into_iter()
            .find_map(|module| env.resource_from(module, name, ctx))
    }

    fn get_resources(&self, name: &str, ctx: &LookupContext) -> Vec<ResourceRef> {
        let mut found = Vec::new();
        if let Some((env, modules)) = self.candidates() {
            for module in modules {
                extend_unique(&mut found, env.resources_from(module, name, ctx));
            }
        }
        found
    }
}

/// `registered`: modules that registered as buddies of the owner.
pub(crate) fn registered(owner: ModuleId, env: Weak<dyn ModuleEnvironment>) -> Arc<dyn BuddyPolicy> {
    Arc::new(ModuleListPolicy {
        name: "registered",
        env,
        modules: move |env: &dyn ModuleEnvironment| env.registered_buddies(owner),
    })
}

/// `dependent`: every module depending on the owner.
pub(crate) fn dependent(owner: ModuleId, env: Weak<dyn ModuleEnvironment>) -> Arc<dyn BuddyPolicy> {
    Arc::new(ModuleListPolicy {
        name: "dependent",
        env,
        modules: move |env: &dyn ModuleEnvironment| env.dependents(owner),
    })
}

/// `global`: the exporters of the requested package.
pub(crate) struct GlobalPolicy {
    owner: ModuleId,
    env: Weak<dyn ModuleEnvironment>,
}

impl GlobalPolicy {
    pub(crate) fn new(owner: ModuleId, env: Weak<dyn ModuleEnvironment>) -> Self {
        Self { owner, env }
    }
}

impl BuddyPolicy for GlobalPolicy {
    fn name(&self) -> &str {
        "global"
    }

    fn load_class(&self, name: &str, ctx: &LookupContext) -> Option<Arc<LoadedClass>> {
        let env = self.env.upgrade()?;
        env.exporters_of(self.owner, package_of_class(name))
            .into_iter()
            .find_map(|module| load_from(env.as_ref(), module, name, ctx))
    }

    fn get_resource(&self, name: &str, ctx: &LookupContext) -> Option<ResourceRef> {
        let env = self.env.upgrade()?;
        env.exporters_of(self.owner, &package_of_resource(name))
            .into_iter()
            .find_map(|module| env.resource_from(module, name, ctx))
    }

    fn get_resources(&self, name: &str, ctx: &LookupContext) -> Vec<ResourceRef> {
        let mut found = Vec::new();
        if let Some(env) = self.env.upgrade() {
            for module in env.exporters_of(self.owner, &package_of_resource(name)) {
                extend_unique(&mut found, env.resources_from(module, name, ctx));
            }
        }
        found
    }
}

/// `app`, `ext`, `boot` and `parent`: a host loader.
pub(crate) struct HostPolicy {
    name: &'static str,
    kind: Option<HostLoaderKind>,
    env: Weak<dyn ModuleEnvironment>,
}

impl HostPolicy {
    /// A policy for a fixed host loader.
    pub(crate) fn fixed(name: &'static str, kind: HostLoaderKind, env: Weak<dyn ModuleEnvironment>) -> Self {
        Self {
            name,
            kind: Some(kind),
            env,
        }
    }

    /// A policy for whichever host loader is configured as parent.
    pub(crate) fn parent(env: Weak<dyn ModuleEnvironment>) -> Self {
        Self {
            name: "parent",
            kind: None,
            env,
        }
    }

    fn source(&self) -> Option<Arc<dyn crate::class::ClassSource>> {
        let env = self.env.upgrade()?;
        let kind = self.kind.unwrap_or_else(|| env.parent_loader_kind());
        env.host_loader(kind)
    }
}

impl BuddyPolicy for HostPolicy {
    fn name(&self) -> &str {
        self.name
    }

    fn load_class(&self, name: &str, _ctx: &LookupContext) -> Option<Arc<LoadedClass>> {
        self.source()?.find_class(name)
    }

    fn get_resource(&self, name: &str, _ctx: &LookupContext) -> Option<ResourceRef> {
        self.source()?.find_resource(name)
    }

    fn get_resources(&self, name: &str, _ctx: &LookupContext) -> Vec<ResourceRef> {
        self.source()
            .map(|source| source.find_resources(name))
            .unwrap_or_default()
    }
}
