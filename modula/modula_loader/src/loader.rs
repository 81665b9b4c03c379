//! The per-module class loader.
//!
//! Lookup order for a class or resource in package `p`:
//!
//! 1. boot delegation: `java.*` and the configured boot delegation
//!    packages go to the host loaders
//! 2. classes already defined by this loader
//! 3. an imported `p`: the wired exporter, exclusively
//! 4. required modules exporting `p`
//! 5. local content, including attached fragments; classes are woven
//!    and defined here
//! 6. dynamic imports matching `p`
//! 7. the buddy policy chain
//!
//! Package wires (steps 3, 4 and 6) only see the exporter's own content:
//! an exporter that imports or borrows a class cannot pass it on.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use modula_core::error::LoaderError;
use modula_core::types::{package_of_class, package_of_resource};
use modula_core::{ModuleDescriptor, ModuleEvent, ModuleId, PackageImport};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::buddy::PolicyHandler;
use crate::class::{extend_unique, ClassSource, HostLoaderKind, LoadedClass, Origin, ResourceRef};
use crate::context::LookupContext;
use crate::environment::ModuleEnvironment;
use crate::weaving::WeavingPipeline;

/// The resolved wiring of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleWiring {
    /// Imported package to exporting module
    pub imports: BTreeMap<String, ModuleId>,

    /// Required modules, in declaration order
    pub required: Vec<ModuleId>,
}

/// Whether `package` is covered by a boot delegation entry (`*`, `a.b.*`
/// or an exact package name).
pub fn is_boot_delegated(patterns: &[String], package: &str) -> bool {
    patterns.iter().any(|pattern| {
        if pattern == "*" {
            return true;
        }
        match pattern.strip_suffix(".*") {
            Some(prefix) => package == prefix || package.starts_with(&format!("{}.", prefix)),
            None => pattern == package,
        }
    })
}

/// Class loader of one resolved module.
pub struct ModuleClassLoader {
    module: ModuleId,
    descriptor: Arc<ModuleDescriptor>,
    fragments: RwLock<Vec<(ModuleId, Arc<ModuleDescriptor>)>>,
    wiring: ModuleWiring,
    dynamic_imports: RwLock<Vec<PackageImport>>,
    defined: DashMap<String, Arc<LoadedClass>>,
    policies: PolicyHandler,
    pipeline: Arc<WeavingPipeline>,
    env: Weak<dyn ModuleEnvironment>,
    boot_delegation: Vec<String>,
}

impl ModuleClassLoader {
    /// Create the loader of a resolved module.
    pub fn new(
        module: ModuleId,
        descriptor: Arc<ModuleDescriptor>,
        wiring: ModuleWiring,
        pipeline: Arc<WeavingPipeline>,
        env: Weak<dyn ModuleEnvironment>,
        boot_delegation: Vec<String>,
    ) -> Self {
        let policies = PolicyHandler::new(module, descriptor.buddy_policy.as_deref(), env.clone());
        let dynamic_imports = descriptor.dynamic_imports.clone();
        Self {
            module,
            descriptor,
            fragments: RwLock::new(Vec::new()),
            wiring,
            dynamic_imports: RwLock::new(dynamic_imports),
            defined: DashMap::new(),
            policies,
            pipeline,
            env,
            boot_delegation,
        }
    }

    /// Owning module.
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Descriptor of the owning module.
    pub fn descriptor(&self) -> &Arc<ModuleDescriptor> {
        &self.descriptor
    }

    /// The module's wiring.
    pub fn wiring(&self) -> &ModuleWiring {
        &self.wiring
    }

    /// Buddy policy handler of the module.
    pub fn policies(&self) -> &PolicyHandler {
        &self.policies
    }

    /// Current dynamic imports, including those added by weaving hooks.
    pub fn dynamic_imports(&self) -> Vec<PackageImport> {
        self.dynamic_imports.read().clone()
    }

    /// Number of classes this loader has defined.
    pub fn defined_count(&self) -> usize {
        self.defined.len()
    }

    /// Attach a fragment's content to this loader.
    pub fn attach_fragment(&self, fragment: ModuleId, descriptor: Arc<ModuleDescriptor>) {
        let mut fragments = self.fragments.write();
        if fragments.iter().all(|(id, _)| *id != fragment) {
            debug!(host = %self.module, %fragment, "attached fragment");
            fragments.push((fragment, descriptor));
        }
    }

    /// Ids of the attached fragments.
    pub fn fragments(&self) -> Vec<ModuleId> {
        self.fragments.read().iter().map(|(id, _)| *id).collect()
    }

    /// Forward a lifecycle event to the buddy policy handler.
    pub fn handle_event(&self, event: &ModuleEvent) {
        self.policies.handle_event(event);
    }

    fn boot_source(&self, env: &dyn ModuleEnvironment, package: &str) -> Option<Arc<dyn ClassSource>> {
        if package == "java" || package.starts_with("java.") {
            return env.host_loader(HostLoaderKind::Boot);
        }
        if is_boot_delegated(&self.boot_delegation, package) {
            return env.host_loader(env.parent_loader_kind());
        }
        None
    }

    fn exports_package(env: &dyn ModuleEnvironment, module: ModuleId, package: &str) -> bool {
        env.descriptor(module)
            .map(|descriptor| descriptor.export_of(package).is_some())
            .unwrap_or(false)
    }

    /// Visible exporters of `package` admitted by a matching dynamic import.
    fn dynamic_exporters(&self, env: &dyn ModuleEnvironment, package: &str) -> Vec<ModuleId> {
        let imports: Vec<PackageImport> = self
            .dynamic_imports
            .read()
            .iter()
            .filter(|import| import.matches_package(package))
            .cloned()
            .collect();
        if imports.is_empty() {
            return Vec::new();
        }
        env.exporters_of(self.module, package)
            .into_iter()
            .filter(|exporter| *exporter != self.module)
            .filter(|exporter| {
                let version = env
                    .descriptor(*exporter)
                    .and_then(|descriptor| descriptor.export_of(package).map(|e| e.version.clone()));
                match version {
                    Some(version) => imports
                        .iter()
                        .any(|import| import.version_range.includes(&version)),
                    None => false,
                }
            })
            .collect()
    }

    fn local_class_bytes(&self, name: &str) -> Option<Vec<u8>> {
        if let Some(bytes) = self.descriptor.classes.get(name) {
            return Some(bytes.clone());
        }
        self.fragments
            .read()
            .iter()
            .find_map(|(_, fragment)| fragment.classes.get(name).cloned())
    }

    fn local_resources(&self, name: &str) -> Vec<ResourceRef> {
        let mut found = Vec::new();
        if self.descriptor.resources.contains(name) {
            found.push(ResourceRef::new(Origin::Module(self.module), name));
        }
        for (id, fragment) in self.fragments.read().iter() {
            if fragment.resources.contains(name) {
                found.push(ResourceRef::new(Origin::Module(*id), name));
            }
        }
        found
    }

    /// Weave and define a local class.
    fn define(&self, name: &str, bytes: Vec<u8>) -> Result<Arc<LoadedClass>, LoaderError> {
        let mut woven = self
            .pipeline
            .weave(self.module, name, bytes)
            .map_err(|source| LoaderError::DefinitionFailed {
                class: name.to_string(),
                source,
            })?;

        let class = Arc::new(LoadedClass::new(
            name,
            woven.bytes().to_vec(),
            Origin::Module(self.module),
        ));
        match self.defined.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                woven.mark_define_failed();
                return Ok(existing.get().clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(class.clone());
            }
        }

        let added = woven.mark_defined(class.clone());
        if !added.is_empty() {
            let mut imports = self.dynamic_imports.write();
            for import in added {
                if !imports.contains(&import) {
                    debug!(module = %self.module, package = %import.name, "added dynamic import from weaving");
                    imports.push(import);
                }
            }
        }
        trace!(module = %self.module, class = name, "defined class");
        Ok(class)
    }

    /// Find a class defined by, or definable from, this module's own
    /// content and its fragments.
    pub fn find_local_class(&self, name: &str) -> Result<Option<Arc<LoadedClass>>, LoaderError> {
        if let Some(class) = self.defined.get(name) {
            return Ok(Some(class.clone()));
        }
        match self.local_class_bytes(name) {
            Some(bytes) => self.define(name, bytes).map(Some),
            None => Ok(None),
        }
    }

    /// First local resource with the name.
    pub fn find_local_resource(&self, name: &str) -> Option<ResourceRef> {
        self.local_resources(name).into_iter().next()
    }

    /// Every local resource with the name, host first.
    pub fn find_local_resources(&self, name: &str) -> Vec<ResourceRef> {
        self.local_resources(name)
    }

    /// Find a class visible to this module.
    ///
    /// `Ok(None)` means no source supplies the class; errors are reserved
    /// for classes that were found but could not be defined.
    pub fn find_class(
        &self,
        name: &str,
        ctx: &LookupContext,
    ) -> Result<Option<Arc<LoadedClass>>, LoaderError> {
        let Some(_guard) = ctx.enter(format!("{}#class:{}", self.module, name)) else {
            return Ok(None);
        };
        let package = package_of_class(name);
        let env = self.env.upgrade();

        if let Some(env) = env.as_deref() {
            if let Some(source) = self.boot_source(env, package) {
                if let Some(class) = source.find_class(name) {
                    return Ok(Some(class));
                }
            }
        }

        if let Some(class) = self.defined.get(name) {
            return Ok(Some(class.clone()));
        }

        if let Some(exporter) = self.wiring.imports.get(package) {
            return match env.as_deref() {
                Some(env) => env.local_class_from(*exporter, name),
                None => Ok(None),
            };
        }

        if let Some(env) = env.as_deref() {
            for required in &self.wiring.required {
                if Self::exports_package(env, *required, package) {
                    if let Some(class) = env.local_class_from(*required, name)? {
                        return Ok(Some(class));
                    }
                }
            }
        }

        if let Some(bytes) = self.local_class_bytes(name) {
            return self.define(name, bytes).map(Some);
        }

        if let Some(env) = env.as_deref() {
            for exporter in self.dynamic_exporters(env, package) {
                if let Some(class) = env.local_class_from(exporter, name)? {
                    return Ok(Some(class));
                }
            }
        }

        Ok(self.policies.load_class(name, ctx))
    }

    /// Find a resource visible to this module.
    pub fn find_resource(&self, name: &str, ctx: &LookupContext) -> Option<ResourceRef> {
        let _guard = ctx.enter(format!("{}#resource:{}", self.module, name))?;
        let package = package_of_resource(name);
        let env = self.env.upgrade();

        if let Some(env) = env.as_deref() {
            if let Some(found) = self
                .boot_source(env, &package)
                .and_then(|source| source.find_resource(name))
            {
                return Some(found);
            }
        }

        if let Some(exporter) = self.wiring.imports.get(&package) {
            return env?.local_resource_from(*exporter, name);
        }

        if let Some(env) = env.as_deref() {
            for required in &self.wiring.required {
                if Self::exports_package(env, *required, &package) {
                    if let Some(found) = env.local_resource_from(*required, name) {
                        return Some(found);
                    }
                }
            }
        }

        if let Some(found) = self.local_resources(name).into_iter().next() {
            return Some(found);
        }

        if let Some(env) = env.as_deref() {
            for exporter in self.dynamic_exporters(env, &package) {
                if let Some(found) = env.local_resource_from(exporter, name) {
                    return Some(found);
                }
            }
        }

        self.policies.get_resource(name, ctx)
    }

    /// Find every resource with the name visible to this module, without
    /// duplicates.
    pub fn find_resources(&self, name: &str, ctx: &LookupContext) -> Vec<ResourceRef> {
        let mut found = Vec::new();
        let Some(_guard) = ctx.enter(format!("{}#resources:{}", self.module, name)) else {
            return found;
        };
        let package = package_of_resource(name);
        let env = self.env.upgrade();

        if let Some(env) = env.as_deref() {
            if let Some(source) = self.boot_source(env, &package) {
                extend_unique(&mut found, source.find_resources(name));
                if !found.is_empty() {
                    return found;
                }
            }
        }

        if let Some(exporter) = self.wiring.imports.get(&package) {
            if let Some(env) = env.as_deref() {
                extend_unique(&mut found, env.local_resources_from(*exporter, name));
            }
            return found;
        }

        if let Some(env) = env.as_deref() {
            for required in &self.wiring.required {
                if Self::exports_package(env, *required, &package) {
                    extend_unique(&mut found, env.local_resources_from(*required, name));
                }
            }
        }

        extend_unique(&mut found, self.local_resources(name));

        if let Some(env) = env.as_deref() {
            for exporter in self.dynamic_exporters(env, &package) {
                extend_unique(&mut found, env.local_resources_from(exporter, name));
            }
        }

        extend_unique(&mut found, self.policies.get_resources(name, ctx));
        found
    }

    /// Load a class for a caller outside any delegation chain.
    pub fn load_class(&self, name: &str) -> Result<Arc<LoadedClass>, LoaderError> {
        LookupContext::with_current(|ctx| self.find_class(name, ctx))?.ok_or_else(|| {
            LoaderError::ClassNotFound {
                class: name.to_string(),
                module: self.descriptor.symbolic_name.clone(),
            }
        })
    }

    /// Find a resource for a caller outside any delegation chain.
    pub fn get_resource(&self, name: &str) -> Option<ResourceRef> {
        LookupContext::with_current(|ctx| self.find_resource(name, ctx))
    }

    /// Find every resource with the name for a caller outside any
    /// delegation chain.
    pub fn get_resources(&self, name: &str) -> Vec<ResourceRef> {
        LookupContext::with_current(|ctx| self.find_resources(name, ctx))
    }
}

impl std::fmt::Debug for ModuleClassLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleClassLoader")
            .field("module", &self.module)
            .field("symbolic_name", &self.descriptor.symbolic_name)
            .field("wiring", &self.wiring)
            .field("defined", &self.defined.len())
            .finish()
    }
}
