//! Read-only management projection of a digraph.
//!
//! [`ManageableRegionDigraph`] registers one managed object for the
//! digraph and one per region with a [`ManagementRegistry`], and keeps the
//! registrations in step with the digraph through a lifecycle listener. The
//! digraph never depends on this module.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use modula_core::{ListenerId, ModuleId};
use parking_lot::Mutex;
use tracing::debug;

use crate::digraph::{Region, RegionDigraph, RegionLifecycleListener};

/// Domain used in managed object names.
pub const MANAGEMENT_DOMAIN: &str = "modula.region";

/// Name under which the digraph itself is registered.
pub fn digraph_object_name() -> String {
    format!("{}:type=RegionDigraph", MANAGEMENT_DOMAIN)
}

/// Name under which a region is registered.
pub fn region_object_name(region: &str) -> String {
    format!("{}:type=Region,name={}", MANAGEMENT_DOMAIN, region)
}

/// Read-only view of the whole digraph.
#[derive(Debug, Clone)]
pub struct ManagedDigraph {
    digraph: RegionDigraph,
}

impl ManagedDigraph {
    /// Names of all regions.
    pub fn regions(&self) -> Vec<String> {
        self.digraph
            .regions()
            .iter()
            .map(|region| region.name().to_string())
            .collect()
    }

    /// Name of the region owning `module`.
    pub fn region_of(&self, module: ModuleId) -> Option<String> {
        self.digraph
            .region_of(module)
            .map(|region| region.name().to_string())
    }
}

/// Read-only view of one region.
#[derive(Debug, Clone)]
pub struct ManagedRegion {
    region: Region,
}

impl ManagedRegion {
    /// The region name.
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Modules owned by the region.
    pub fn module_ids(&self) -> BTreeSet<ModuleId> {
        self.region.module_ids()
    }

    /// Names of the regions this region has edges to.
    pub fn dependencies(&self) -> BTreeSet<String> {
        self.region
            .edges()
            .into_iter()
            .map(|edge| edge.head)
            .collect()
    }
}

/// A managed object registered for monitoring.
#[derive(Debug, Clone)]
pub enum ManagedObject {
    /// The digraph
    Digraph(ManagedDigraph),

    /// One region
    Region(ManagedRegion),
}

/// Destination of managed object registrations.
pub trait ManagementRegistry: Send + Sync {
    /// Register `object` under `name`, replacing any previous registration.
    fn register(&self, name: String, object: ManagedObject);

    /// Remove the registration under `name`.
    fn unregister(&self, name: &str);
}

/// A [`ManagementRegistry`] keeping registrations in memory.
#[derive(Debug, Default)]
pub struct InMemoryManagementRegistry {
    objects: DashMap<String, ManagedObject>,
}

impl InMemoryManagementRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a registration.
    pub fn get(&self, name: &str) -> Option<ManagedObject> {
        self.objects.get(name).map(|entry| entry.value().clone())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl ManagementRegistry for InMemoryManagementRegistry {
    fn register(&self, name: String, object: ManagedObject) {
        self.objects.insert(name, object);
    }

    fn unregister(&self, name: &str) {
        self.objects.remove(name);
    }
}

struct Projection {
    registry: Arc<dyn ManagementRegistry>,
}

impl RegionLifecycleListener for Projection {
    fn region_added(&self, region: &Region) {
        debug!(region = region.name(), "registering managed region");
        self.registry.register(
            region_object_name(region.name()),
            ManagedObject::Region(ManagedRegion {
                region: region.clone(),
            }),
        );
    }

    fn region_removing(&self, region: &Region) {
        debug!(region = region.name(), "unregistering managed region");
        self.registry.unregister(&region_object_name(region.name()));
    }
}

/// Keeps a [`ManagementRegistry`] in sync with a digraph.
pub struct ManageableRegionDigraph {
    digraph: RegionDigraph,
    registry: Arc<dyn ManagementRegistry>,
    listener: Mutex<Option<ListenerId>>,
}

impl ManageableRegionDigraph {
    /// Register the digraph and its current regions, then follow changes.
    pub fn install(digraph: &RegionDigraph, registry: Arc<dyn ManagementRegistry>) -> Self {
        registry.register(
            digraph_object_name(),
            ManagedObject::Digraph(ManagedDigraph {
                digraph: digraph.clone(),
            }),
        );

        let projection = Arc::new(Projection {
            registry: registry.clone(),
        });
        let id = digraph.add_listener(projection.clone());
        for region in digraph.regions() {
            projection.region_added(&region);
        }

        Self {
            digraph: digraph.clone(),
            registry,
            listener: Mutex::new(Some(id)),
        }
    }

    /// Stop following the digraph and remove every registration.
    pub fn uninstall(&self) {
        if let Some(id) = self.listener.lock().take() {
            self.digraph.remove_listener(id);
            for region in self.digraph.regions() {
                self.registry.unregister(&region_object_name(region.name()));
            }
            self.registry.unregister(&digraph_object_name());
        }
    }
}

impl Drop for ManageableRegionDigraph {
    fn drop(&mut self) {
        self.uninstall();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::RegionFilter;

    #[test]
    fn test_registrations_follow_digraph() {
        let digraph = RegionDigraph::new();
        digraph.create_region("kernel").unwrap();
        let registry = Arc::new(InMemoryManagementRegistry::new());
        let manageable = ManageableRegionDigraph::install(&digraph, registry.clone());

        assert_eq!(
            registry.names(),
            vec![region_object_name("kernel"), digraph_object_name()]
        );

        let app = digraph.create_region("app").unwrap();
        let kernel = digraph.get_region("kernel").unwrap();
        app.connect_region(&kernel, RegionFilter::allow_everything())
            .unwrap();

        match registry.get(&region_object_name("app")) {
            Some(ManagedObject::Region(region)) => {
                assert_eq!(region.name(), "app");
                assert!(region.dependencies().contains("kernel"));
            }
            other => panic!("unexpected registration: {:?}", other),
        }

        digraph.remove_region("app");
        assert!(registry.get(&region_object_name("app")).is_none());

        manageable.uninstall();
        assert!(registry.names().is_empty());
    }
}
