//! The view of the module system that loaders and buddy policies delegate
//! through.

use std::sync::Arc;

use modula_core::error::LoaderError;
use modula_core::{ModuleDescriptor, ModuleId};

use crate::class::{ClassSource, HostLoaderKind, LoadedClass, ResourceRef};
use crate::context::LookupContext;

/// Services the framework provides to class loaders.
///
/// Every query is answered from the point of view of a requesting module,
/// so implementations apply region visibility before returning candidates.
pub trait ModuleEnvironment: Send + Sync {
    /// Descriptor of an installed module.
    fn descriptor(&self, module: ModuleId) -> Option<Arc<ModuleDescriptor>>;

    /// Resolved modules declaring `Eclipse-RegisterBuddy` for `module` and
    /// depending on it, in install order.
    fn registered_buddies(&self, module: ModuleId) -> Vec<ModuleId>;

    /// Resolved modules depending on `module`, directly or transitively,
    /// nearest first.
    fn dependents(&self, module: ModuleId) -> Vec<ModuleId>;

    /// Resolved modules exporting `package` that `requester` can see,
    /// preferred exporter first.
    fn exporters_of(&self, requester: ModuleId, package: &str) -> Vec<ModuleId>;

    /// Load a class through another module's loader, with that module's
    /// full delegation. Buddy policies delegate this way.
    fn load_class_from(
        &self,
        module: ModuleId,
        name: &str,
        ctx: &LookupContext,
    ) -> Result<Option<Arc<LoadedClass>>, LoaderError>;

    /// Find a resource through another module's loader.
    fn resource_from(&self, module: ModuleId, name: &str, ctx: &LookupContext) -> Option<ResourceRef>;

    /// Find every resource with the name through another module's loader.
    fn resources_from(&self, module: ModuleId, name: &str, ctx: &LookupContext) -> Vec<ResourceRef>;

    /// Load a class from another module's own content and fragments only.
    /// Package wires delegate this way.
    fn local_class_from(&self, module: ModuleId, name: &str) -> Result<Option<Arc<LoadedClass>>, LoaderError>;

    /// First resource with the name in another module's own content.
    fn local_resource_from(&self, module: ModuleId, name: &str) -> Option<ResourceRef> {
        self.local_resources_from(module, name).into_iter().next()
    }

    /// Every resource with the name in another module's own content.
    fn local_resources_from(&self, module: ModuleId, name: &str) -> Vec<ResourceRef>;

    /// A host loader.
    fn host_loader(&self, kind: HostLoaderKind) -> Option<Arc<dyn ClassSource>>;

    /// Which host loader acts as the parent of module loaders.
    fn parent_loader_kind(&self) -> HostLoaderKind;
}
