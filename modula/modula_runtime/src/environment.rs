//! The view of the framework handed to class loaders and trackers.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use modula_core::error::LoaderError;
use modula_core::{ModuleDescriptor, ModuleId};
use modula_loader::{
    ClassSource, HostLoaderKind, LoadedClass, LookupContext, ModuleEnvironment, ResourceRef,
};
use modula_region::filter::package_attributes;
use modula_region::Candidate;
use modula_tracker::{ModuleSource, TrackedModule};

use crate::framework::FrameworkInner;

impl ModuleEnvironment for FrameworkInner {
    fn descriptor(&self, module: ModuleId) -> Option<Arc<ModuleDescriptor>> {
        self.modules.get(&module).map(|entry| entry.descriptor.clone())
    }

    /// Resolved modules that register as buddies of `module` and are wired
    /// to it, in installation order.
    fn registered_buddies(&self, module: ModuleId) -> Vec<ModuleId> {
        let Some(owner) = self.descriptor(module) else {
            return Vec::new();
        };
        self.entries()
            .into_iter()
            .filter(|(id, entry)| {
                *id != module
                    && entry.state.is_resolved()
                    && entry
                        .descriptor
                        .registered_buddies
                        .iter()
                        .any(|name| *name == owner.symbolic_name)
                    && entry.depends_on(module)
            })
            .map(|(id, _)| id)
            .collect()
    }

    /// Modules wired to `module` directly or transitively, nearest first.
    fn dependents(&self, module: ModuleId) -> Vec<ModuleId> {
        let entries = self.entries();
        let mut seen = BTreeSet::from([module]);
        let mut queue = VecDeque::from([module]);
        let mut dependents = Vec::new();

        while let Some(current) = queue.pop_front() {
            for (id, entry) in &entries {
                if entry.state.is_resolved() && entry.depends_on(current) && seen.insert(*id) {
                    dependents.push(*id);
                    queue.push_back(*id);
                }
            }
        }
        dependents
    }

    /// Resolved exporters of `package` visible to `requester`, highest
    /// version first.
    fn exporters_of(&self, requester: ModuleId, package: &str) -> Vec<ModuleId> {
        let offers: Vec<_> = self
            .entries()
            .into_iter()
            .filter(|(id, entry)| *id != requester && entry.loader.is_some())
            .filter_map(|(id, entry)| {
                let export = entry.descriptor.export_of(package)?.clone();
                let attributes = package_attributes(
                    &export.name,
                    &export.version,
                    &entry.descriptor.symbolic_name,
                    &entry.descriptor.version,
                );
                Some(Candidate::new(id, attributes, (export.version, entry.order, id)))
            })
            .collect();
        let mut exporters: Vec<_> = self
            .hooks
            .filter_providers(requester, offers)
            .into_iter()
            .map(|offer| offer.item)
            .collect();
        exporters.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        exporters.into_iter().map(|(_, _, id)| id).collect()
    }

    fn load_class_from(
        &self,
        module: ModuleId,
        name: &str,
        ctx: &LookupContext,
    ) -> Result<Option<Arc<LoadedClass>>, LoaderError> {
        let loader = self
            .modules
            .get(&module)
            .and_then(|entry| entry.loader.clone())
            .ok_or(LoaderError::NotResolved(module))?;
        loader.find_class(name, ctx)
    }

    fn local_class_from(&self, module: ModuleId, name: &str) -> Result<Option<Arc<LoadedClass>>, LoaderError> {
        let loader = self
            .modules
            .get(&module)
            .and_then(|entry| entry.loader.clone())
            .ok_or(LoaderError::NotResolved(module))?;
        loader.find_local_class(name)
    }

    fn local_resources_from(&self, module: ModuleId, name: &str) -> Vec<ResourceRef> {
        self.modules
            .get(&module)
            .and_then(|entry| entry.loader.clone())
            .map(|loader| loader.find_local_resources(name))
            .unwrap_or_default()
    }

    fn resource_from(&self, module: ModuleId, name: &str, ctx: &LookupContext) -> Option<ResourceRef> {
        let loader = self.modules.get(&module).and_then(|entry| entry.loader.clone())?;
        loader.find_resource(name, ctx)
    }

    fn resources_from(&self, module: ModuleId, name: &str, ctx: &LookupContext) -> Vec<ResourceRef> {
        self.modules
            .get(&module)
            .and_then(|entry| entry.loader.clone())
            .map(|loader| loader.find_resources(name, ctx))
            .unwrap_or_default()
    }

    fn host_loader(&self, kind: HostLoaderKind) -> Option<Arc<dyn ClassSource>> {
        self.hosts
            .get(&kind)
            .map(|host| host.clone() as Arc<dyn ClassSource>)
    }

    fn parent_loader_kind(&self) -> HostLoaderKind {
        self.config.parent_loader
    }
}

impl ModuleSource for FrameworkInner {
    fn modules(&self) -> Vec<TrackedModule> {
        self.entries()
            .into_iter()
            .map(|(id, entry)| TrackedModule {
                id,
                symbolic_name: entry.descriptor.symbolic_name.clone(),
                version: entry.descriptor.version.clone(),
                state: entry.state,
            })
            .collect()
    }
}
