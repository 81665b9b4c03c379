//! The framework context.
//!
//! A [`Framework`] owns the module registry, the region digraph, the
//! lifecycle dispatcher, the weaving pipeline and the host loaders. It is
//! the explicit process-wide context: nothing here is global.
//!
//! Structural operations (install, resolve, start, stop, uninstall,
//! refresh) are serialized by one lifecycle lock. Events raised by an
//! operation are collected while the lock is held and dispatched after it
//! is released, so listeners and tracker customizers may call back into
//! the framework.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use modula_core::error::{LoaderError, ModuleError, RegionError};
use modula_core::{
    EventChannel, FrameworkEvent, ModuleDescriptor, ModuleEvent, ModuleEventKind, ModuleId,
    ModuleState, Result, StateMask, Version,
};
use modula_loader::{
    HostLoader, HostLoaderKind, LoadedClass, ModuleClassLoader, ModuleEnvironment, ResourceRef,
    WeavingPipeline,
};
use modula_region::{InMemoryManagementRegistry, ManageableRegionDigraph, RegionDigraph, RegionHooks};
use modula_store::ReliableStorage;
use modula_tracker::{HookRegistry, ModuleTracker, TrackerCustomizer};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::FrameworkConfig;
use crate::resolver::{self, Candidate};

/// Public view of an installed module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Module id
    pub id: ModuleId,

    /// Symbolic name
    pub symbolic_name: String,

    /// Version
    pub version: Version,

    /// Current lifecycle state
    pub state: ModuleState,

    /// Region the module belongs to; `None` once uninstalled
    pub region: Option<String>,

    /// Host the module is attached to, for resolved fragments
    pub host: Option<ModuleId>,
}

#[derive(Clone)]
pub(crate) struct ModuleEntry {
    pub descriptor: Arc<ModuleDescriptor>,
    pub state: ModuleState,
    pub order: u64,
    pub loader: Option<Arc<ModuleClassLoader>>,
    pub host: Option<ModuleId>,
}

impl ModuleEntry {
    /// Whether this module is wired to `module`.
    pub fn depends_on(&self, module: ModuleId) -> bool {
        if self.host == Some(module) {
            return true;
        }
        self.loader.as_ref().is_some_and(|loader| {
            let wiring = loader.wiring();
            wiring.imports.values().any(|exporter| *exporter == module)
                || wiring.required.contains(&module)
        })
    }
}

pub(crate) struct FrameworkInner {
    pub config: FrameworkConfig,
    pub self_ref: Weak<FrameworkInner>,
    pub modules: DashMap<ModuleId, ModuleEntry>,
    pub next_order: AtomicU64,
    pub digraph: RegionDigraph,
    pub hooks: RegionHooks,
    pub management: Arc<InMemoryManagementRegistry>,
    _projection: ManageableRegionDigraph,
    pub registry: Arc<HookRegistry>,
    pub pipeline: Arc<WeavingPipeline>,
    pub events: EventChannel,
    pub hosts: BTreeMap<HostLoaderKind, Arc<HostLoader>>,
    pub storage: Option<ReliableStorage>,
    pub lifecycle: Mutex<()>,
}

/// A running module framework.
///
/// Cloning yields another handle to the same framework.
#[derive(Clone)]
pub struct Framework {
    pub(crate) inner: Arc<FrameworkInner>,
}

impl Framework {
    /// Create an empty framework.
    pub fn new(config: FrameworkConfig) -> Result<Self> {
        info!("Initializing module framework");
        config.validate()?;

        let digraph = config.build_digraph()?;
        let hooks = RegionHooks::new(digraph.clone());
        let management = Arc::new(InMemoryManagementRegistry::new());
        let projection = ManageableRegionDigraph::install(&digraph, management.clone());
        let storage = config
            .storage_dir
            .as_ref()
            .map(|dir| ReliableStorage::new(dir.clone()));
        let hosts = [
            HostLoaderKind::Boot,
            HostLoaderKind::Ext,
            HostLoaderKind::App,
            HostLoaderKind::Fwk,
        ]
        .into_iter()
        .map(|kind| (kind, Arc::new(HostLoader::new(kind))))
        .collect();
        let events = EventChannel::new();
        let pipeline = Arc::new(WeavingPipeline::with_events(events.clone()));

        let inner = Arc::new_cyclic(|self_ref| FrameworkInner {
            config,
            self_ref: self_ref.clone(),
            modules: DashMap::new(),
            next_order: AtomicU64::new(0),
            digraph,
            hooks,
            management,
            _projection: projection,
            registry: Arc::new(HookRegistry::new()),
            pipeline,
            events,
            hosts,
            storage,
            lifecycle: Mutex::new(()),
        });

        let weak = Arc::downgrade(&inner);
        inner
            .registry
            .add_listener(Arc::new(move |event: &ModuleEvent| {
                if let Some(inner) = weak.upgrade() {
                    inner.forward_to_loader(event);
                }
            }));

        info!(
            default_region = %inner.config.default_region,
            regions = inner.digraph.regions().len(),
            "Module framework initialized"
        );
        Ok(Self { inner })
    }

    /// Create a framework and reload the metadata persisted in the
    /// configured storage directory.
    pub fn restore(config: FrameworkConfig) -> Result<Self> {
        let framework = Self::new(config)?;
        let mut events = Vec::new();
        let restored = {
            let _guard = framework.inner.lifecycle.lock();
            framework.inner.restore_locked(&mut events)
        };
        framework.inner.dispatch(events);
        restored?;
        Ok(framework)
    }

    /// The configuration the framework was created with.
    pub fn config(&self) -> &FrameworkConfig {
        &self.inner.config
    }

    /// The region digraph.
    pub fn digraph(&self) -> &RegionDigraph {
        &self.inner.digraph
    }

    /// Region visibility hooks over the digraph.
    pub fn region_hooks(&self) -> &RegionHooks {
        &self.inner.hooks
    }

    /// Management registrations of the digraph and its regions, kept in
    /// step with the digraph.
    pub fn management(&self) -> &Arc<InMemoryManagementRegistry> {
        &self.inner.management
    }

    /// The lifecycle dispatcher.
    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.inner.registry
    }

    /// The weaving pipeline shared by every class loader.
    pub fn weaving(&self) -> &Arc<WeavingPipeline> {
        &self.inner.pipeline
    }

    /// The framework event channel.
    pub fn events(&self) -> &EventChannel {
        &self.inner.events
    }

    /// One of the host loaders.
    pub fn host_loader(&self, kind: HostLoaderKind) -> Option<Arc<HostLoader>> {
        self.inner.hosts.get(&kind).cloned()
    }

    /// Create a closed tracker over this framework's modules.
    pub fn tracker<T: Clone + Send + Sync + 'static>(
        &self,
        mask: StateMask,
        customizer: Arc<dyn TrackerCustomizer<T>>,
    ) -> ModuleTracker<T> {
        ModuleTracker::new(
            self.inner.registry.clone(),
            self.inner.clone(),
            mask,
            customizer,
        )
    }

    /// Install a module into the default region.
    pub fn install(&self, descriptor: ModuleDescriptor) -> Result<ModuleId> {
        let region = self.inner.config.default_region.clone();
        self.install_into(&region, descriptor)
    }

    /// Install a module into `region`.
    pub fn install_into(&self, region: &str, descriptor: ModuleDescriptor) -> Result<ModuleId> {
        self.run(|inner, events| inner.install_locked(region, descriptor, events))
    }

    /// Resolve the given modules, or every installed module when `ids` is
    /// empty. Returns whether all of them resolved.
    pub fn resolve(&self, ids: &[ModuleId]) -> bool {
        self.run(|inner, events| {
            let targets = inner.targets(ids);
            let resolution = inner.resolve_locked(&targets, events);
            Ok(resolution.failures.is_empty())
        })
        .unwrap_or(false)
    }

    /// Resolve one module, reporting why it could not be wired.
    pub fn resolve_module(&self, id: ModuleId) -> Result<()> {
        self.run(|inner, events| inner.ensure_resolved(id, events))
    }

    /// Start a module, resolving it first if needed.
    pub fn start(&self, id: ModuleId) -> Result<()> {
        self.run(|inner, events| inner.start_locked(id, events))
    }

    /// Stop an active module.
    pub fn stop(&self, id: ModuleId) -> Result<()> {
        self.run(|inner, events| inner.stop_locked(id, events))
    }

    /// Uninstall a module. A resolved module keeps serving its dependents
    /// until the next refresh.
    pub fn uninstall(&self, id: ModuleId) -> Result<()> {
        self.run(|inner, events| inner.uninstall_locked(id, events))
    }

    /// Re-wire the given modules and everything depending on them, or the
    /// uninstalled modules still pending removal when `ids` is empty.
    /// Returns the modules that were refreshed.
    pub fn refresh(&self, ids: &[ModuleId]) -> Result<Vec<ModuleId>> {
        self.run(|inner, events| inner.refresh_locked(ids, events))
    }

    /// Load a class through a module's class loader.
    pub fn load_class(&self, id: ModuleId, name: &str) -> Result<Arc<LoadedClass>> {
        let loader = self.loader_for(id)?;
        Ok(loader.load_class(name)?)
    }

    /// Find a resource through a module's class loader.
    pub fn get_resource(&self, id: ModuleId, name: &str) -> Result<Option<ResourceRef>> {
        let loader = self.loader_for(id)?;
        Ok(loader.get_resource(name))
    }

    /// Find every resource of a name visible to a module.
    pub fn get_resources(&self, id: ModuleId, name: &str) -> Result<Vec<ResourceRef>> {
        let loader = self.loader_for(id)?;
        Ok(loader.get_resources(name))
    }

    /// Class loader of a resolved module.
    pub fn class_loader(&self, id: ModuleId) -> Option<Arc<ModuleClassLoader>> {
        self.inner.modules.get(&id).and_then(|entry| entry.loader.clone())
    }

    /// Current state of a module.
    pub fn state(&self, id: ModuleId) -> Option<ModuleState> {
        self.inner.modules.get(&id).map(|entry| entry.state)
    }

    /// Describe one module.
    pub fn module(&self, id: ModuleId) -> Option<ModuleInfo> {
        let entry = self.inner.modules.get(&id).map(|entry| entry.clone())?;
        Some(self.inner.info(id, &entry))
    }

    /// Describe every module, in installation order.
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.inner
            .entries()
            .into_iter()
            .map(|(id, entry)| self.inner.info(id, &entry))
            .collect()
    }

    /// Modules with a symbolic name, highest version first.
    pub fn find(&self, symbolic_name: &str) -> Vec<ModuleInfo> {
        let mut found: Vec<ModuleInfo> = self
            .modules()
            .into_iter()
            .filter(|info| info.symbolic_name == symbolic_name)
            .collect();
        found.sort_by(|a, b| b.version.cmp(&a.version));
        found
    }

    /// Persist module metadata and the digraph to the storage directory.
    /// Does nothing when no storage directory is configured.
    pub fn persist(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock();
        self.inner.persist_locked()
    }

    fn run<R>(
        &self,
        operation: impl FnOnce(&FrameworkInner, &mut Vec<ModuleEvent>) -> Result<R>,
    ) -> Result<R> {
        let mut events = Vec::new();
        let outcome = {
            let _guard = self.inner.lifecycle.lock();
            operation(&self.inner, &mut events)
        };
        self.inner.dispatch(events);
        outcome
    }

    fn loader_for(&self, id: ModuleId) -> Result<Arc<ModuleClassLoader>> {
        if let Some(loader) = self.class_loader(id) {
            return Ok(loader);
        }
        self.resolve_module(id)?;
        self.class_loader(id)
            .ok_or_else(|| LoaderError::NotResolved(id).into())
    }
}

impl std::fmt::Debug for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framework")
            .field("modules", &self.inner.modules.len())
            .field("digraph", &self.inner.digraph)
            .finish()
    }
}

impl FrameworkInner {
    /// Clone every entry, in installation order, so that no map lock is
    /// held while the caller works with them.
    pub fn entries(&self) -> Vec<(ModuleId, ModuleEntry)> {
        let mut entries: Vec<(ModuleId, ModuleEntry)> = self
            .modules
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        entries.sort_by_key(|(_, entry)| entry.order);
        entries
    }

    fn info(&self, id: ModuleId, entry: &ModuleEntry) -> ModuleInfo {
        ModuleInfo {
            id,
            symbolic_name: entry.descriptor.symbolic_name.clone(),
            version: entry.descriptor.version.clone(),
            state: entry.state,
            region: self
                .digraph
                .region_of(id)
                .map(|region| region.name().to_string()),
            host: entry.host,
        }
    }

    fn entry(&self, id: ModuleId) -> Result<ModuleEntry> {
        self.modules
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| ModuleError::NotFound(id).into())
    }

    fn event(&self, kind: ModuleEventKind, id: ModuleId, state: ModuleState) -> Option<ModuleEvent> {
        let entry = self.modules.get(&id)?;
        Some(ModuleEvent::new(
            kind,
            id,
            entry.descriptor.symbolic_name.clone(),
            entry.descriptor.version.clone(),
            state,
        ))
    }

    fn set_state(
        &self,
        id: ModuleId,
        state: ModuleState,
        kind: ModuleEventKind,
        events: &mut Vec<ModuleEvent>,
    ) {
        if let Some(mut entry) = self.modules.get_mut(&id) {
            entry.state = state;
        }
        events.extend(self.event(kind, id, state));
    }

    pub fn dispatch(&self, events: Vec<ModuleEvent>) {
        for event in events {
            self.registry.dispatch(&event);
            self.events.publish(FrameworkEvent::Module(event));
        }
    }

    fn forward_to_loader(&self, event: &ModuleEvent) {
        if !matches!(
            event.kind,
            ModuleEventKind::Resolved | ModuleEventKind::Unresolved
        ) {
            return;
        }
        let loader = self
            .modules
            .get(&event.module)
            .and_then(|entry| entry.loader.clone());
        if let Some(loader) = loader {
            loader.handle_event(event);
        }
    }

    fn targets(&self, ids: &[ModuleId]) -> BTreeSet<ModuleId> {
        if ids.is_empty() {
            self.modules
                .iter()
                .filter(|entry| entry.state == ModuleState::Installed)
                .map(|entry| *entry.key())
                .collect()
        } else {
            ids.iter().copied().collect()
        }
    }

    pub fn install_entry(
        &self,
        id: ModuleId,
        region: &str,
        descriptor: ModuleDescriptor,
        events: &mut Vec<ModuleEvent>,
    ) -> Result<()> {
        let duplicate = self.modules.iter().any(|entry| {
            entry.state != ModuleState::Uninstalled
                && entry.descriptor.symbolic_name == descriptor.symbolic_name
                && entry.descriptor.version == descriptor.version
        });
        if duplicate {
            return Err(ModuleError::Duplicate {
                name: descriptor.symbolic_name,
                version: descriptor.version.to_string(),
            }
            .into());
        }
        if self.digraph.get_region(region).is_none() {
            return Err(RegionError::NotFound(region.to_string()).into());
        }
        if !self.digraph.contains(region, id) {
            self.digraph.add_module(region, id)?;
        }

        info!(module = %id, name = %descriptor.symbolic_name, version = %descriptor.version, region, "Installed module");
        let order = self.next_order.fetch_add(1, Ordering::SeqCst);
        self.modules.insert(
            id,
            ModuleEntry {
                descriptor: Arc::new(descriptor),
                state: ModuleState::Installed,
                order,
                loader: None,
                host: None,
            },
        );
        events.extend(self.event(ModuleEventKind::Installed, id, ModuleState::Installed));
        Ok(())
    }

    fn install_locked(
        &self,
        region: &str,
        descriptor: ModuleDescriptor,
        events: &mut Vec<ModuleEvent>,
    ) -> Result<ModuleId> {
        let id = ModuleId::new();
        self.install_entry(id, region, descriptor, events)?;
        Ok(id)
    }

    pub fn resolve_locked(
        &self,
        targets: &BTreeSet<ModuleId>,
        events: &mut Vec<ModuleEvent>,
    ) -> resolver::Resolution {
        let pool: Vec<Candidate> = self
            .entries()
            .into_iter()
            .filter(|(_, entry)| entry.state != ModuleState::Uninstalled)
            .map(|(id, entry)| Candidate {
                id,
                descriptor: entry.descriptor,
                order: entry.order,
                resolved: entry.state.is_resolved(),
            })
            .collect();
        let resolution = resolver::resolve(&pool, targets, &self.hooks);

        for (id, wiring) in &resolution.wirings {
            let Some(descriptor) = self.modules.get(id).map(|entry| entry.descriptor.clone())
            else {
                continue;
            };
            let env: Weak<dyn ModuleEnvironment> = self.self_ref.clone();
            let loader = Arc::new(ModuleClassLoader::new(
                *id,
                descriptor,
                wiring.clone(),
                self.pipeline.clone(),
                env,
                self.config.boot_delegation.clone(),
            ));
            if let Some(mut entry) = self.modules.get_mut(id) {
                entry.loader = Some(loader);
            }
            debug!(module = %id, imports = wiring.imports.len(), required = wiring.required.len(), "module wired");
            self.set_state(*id, ModuleState::Resolved, ModuleEventKind::Resolved, events);
        }

        for (fragment, host) in &resolution.fragments {
            let host_loader = self.modules.get(host).and_then(|entry| entry.loader.clone());
            let descriptor = self.modules.get(fragment).map(|entry| entry.descriptor.clone());
            if let (Some(loader), Some(descriptor)) = (host_loader, descriptor) {
                loader.attach_fragment(*fragment, descriptor);
                if let Some(mut entry) = self.modules.get_mut(fragment) {
                    entry.host = Some(*host);
                }
                self.set_state(*fragment, ModuleState::Resolved, ModuleEventKind::Resolved, events);
            }
        }

        for (id, reason) in &resolution.failures {
            debug!(module = %id, %reason, "module left unresolved");
        }
        resolution
    }

    fn ensure_resolved(&self, id: ModuleId, events: &mut Vec<ModuleEvent>) -> Result<()> {
        let entry = self.entry(id)?;
        match entry.state {
            ModuleState::Uninstalled => Err(ModuleError::InvalidState {
                module: id,
                state: entry.state,
            }
            .into()),
            ModuleState::Installed => {
                let mut targets = self.targets(&[]);
                targets.insert(id);
                let mut resolution = self.resolve_locked(&targets, events);
                match resolution.failures.remove(&id) {
                    Some(reason) => Err(ModuleError::ResolutionFailed { module: id, reason }.into()),
                    None => Ok(()),
                }
            }
            _ => Ok(()),
        }
    }

    pub fn start_locked(&self, id: ModuleId, events: &mut Vec<ModuleEvent>) -> Result<()> {
        let entry = self.entry(id)?;
        if entry.descriptor.is_fragment() || entry.state == ModuleState::Uninstalled {
            return Err(ModuleError::InvalidState {
                module: id,
                state: entry.state,
            }
            .into());
        }
        if entry.state == ModuleState::Active {
            return Ok(());
        }
        self.ensure_resolved(id, events)?;

        self.set_state(id, ModuleState::Starting, ModuleEventKind::Starting, events);
        self.set_state(id, ModuleState::Active, ModuleEventKind::Started, events);
        info!(module = %id, name = %entry.descriptor.symbolic_name, "Started module");
        Ok(())
    }

    fn stop_locked(&self, id: ModuleId, events: &mut Vec<ModuleEvent>) -> Result<()> {
        let entry = self.entry(id)?;
        match entry.state {
            ModuleState::Active => {
                self.set_state(id, ModuleState::Stopping, ModuleEventKind::Stopping, events);
                self.set_state(id, ModuleState::Resolved, ModuleEventKind::Stopped, events);
                info!(module = %id, name = %entry.descriptor.symbolic_name, "Stopped module");
                Ok(())
            }
            ModuleState::Uninstalled => Err(ModuleError::InvalidState {
                module: id,
                state: entry.state,
            }
            .into()),
            _ => Ok(()),
        }
    }

    fn uninstall_locked(&self, id: ModuleId, events: &mut Vec<ModuleEvent>) -> Result<()> {
        let entry = self.entry(id)?;
        if entry.state == ModuleState::Uninstalled {
            return Err(ModuleError::InvalidState {
                module: id,
                state: entry.state,
            }
            .into());
        }
        self.stop_locked(id, events)?;

        if let Some(region) = self.digraph.region_of(id) {
            region.remove_module(id);
        }
        self.set_state(id, ModuleState::Uninstalled, ModuleEventKind::Uninstalled, events);

        let in_use = entry.loader.is_some() || entry.host.is_some();
        if !in_use {
            self.modules.remove(&id);
        }
        info!(module = %id, name = %entry.descriptor.symbolic_name, pending_removal = in_use, "Uninstalled module");
        Ok(())
    }

    fn refresh_locked(&self, ids: &[ModuleId], events: &mut Vec<ModuleEvent>) -> Result<Vec<ModuleId>> {
        let entries = self.entries();
        let mut affected: BTreeSet<ModuleId> = if ids.is_empty() {
            entries
                .iter()
                .filter(|(_, entry)| entry.state == ModuleState::Uninstalled)
                .map(|(id, _)| *id)
                .collect()
        } else {
            for id in ids {
                self.entry(*id)?;
            }
            ids.iter().copied().collect()
        };

        loop {
            let before = affected.len();
            for (id, entry) in &entries {
                let pulled_in = affected.iter().any(|target| entry.depends_on(*target));
                let hosts_affected_fragment = entry.loader.as_ref().is_some_and(|loader| {
                    loader.fragments().iter().any(|fragment| affected.contains(fragment))
                });
                if pulled_in || hosts_affected_fragment {
                    affected.insert(*id);
                }
            }
            if affected.len() == before {
                break;
            }
        }

        let ordered: Vec<(ModuleId, ModuleEntry)> = entries
            .into_iter()
            .filter(|(id, _)| affected.contains(id))
            .collect();
        let was_active: Vec<ModuleId> = ordered
            .iter()
            .filter(|(_, entry)| entry.state == ModuleState::Active)
            .map(|(id, _)| *id)
            .collect();

        for id in was_active.iter().rev() {
            self.stop_locked(*id, events)?;
        }

        for (id, entry) in ordered.iter().rev() {
            if entry.state == ModuleState::Uninstalled {
                self.modules.remove(id);
                debug!(module = %id, "removed uninstalled module");
                continue;
            }
            if entry.state.is_resolved() {
                if let Some(mut current) = self.modules.get_mut(id) {
                    current.loader = None;
                    current.host = None;
                }
                self.set_state(*id, ModuleState::Installed, ModuleEventKind::Unresolved, events);
            }
        }

        let targets = self.targets(&[]);
        self.resolve_locked(&targets, events);
        for id in was_active {
            if let Err(e) = self.start_locked(id, events) {
                warn!(module = %id, error = %e, "module could not be restarted after refresh");
            }
        }

        info!(refreshed = ordered.len(), "Refreshed modules");
        self.events.publish(FrameworkEvent::Refreshed);
        Ok(ordered.into_iter().map(|(id, _)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modula_core::PackageImport;
    use parking_lot::Mutex as TestMutex;

    fn framework() -> Framework {
        Framework::new(FrameworkConfig::default()).unwrap()
    }

    #[test]
    fn test_install_rejects_duplicates() {
        let framework = framework();
        let descriptor = ModuleDescriptor::new("org.example", Version::new(1, 0, 0));
        let id = framework.install(descriptor.clone()).unwrap();
        assert_eq!(framework.state(id), Some(ModuleState::Installed));
        assert_eq!(framework.module(id).unwrap().region.as_deref(), Some("root"));

        let err = framework.install(descriptor).unwrap_err();
        assert!(matches!(
            err,
            modula_core::Error::Module(ModuleError::Duplicate { .. })
        ));
        assert!(framework
            .install_into("missing", ModuleDescriptor::new("other", Version::empty()))
            .is_err());
    }

    #[test]
    fn test_lifecycle_events_in_order() {
        let framework = framework();
        let seen = Arc::new(TestMutex::new(Vec::new()));
        let log = seen.clone();
        framework
            .registry()
            .add_listener(Arc::new(move |event: &ModuleEvent| log.lock().push(event.kind)));

        let id = framework
            .install(ModuleDescriptor::new("org.example", Version::empty()))
            .unwrap();
        framework.start(id).unwrap();
        framework.stop(id).unwrap();
        framework.uninstall(id).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                ModuleEventKind::Installed,
                ModuleEventKind::Resolved,
                ModuleEventKind::Starting,
                ModuleEventKind::Started,
                ModuleEventKind::Stopping,
                ModuleEventKind::Stopped,
                ModuleEventKind::Uninstalled,
            ]
        );
        assert_eq!(framework.state(id), Some(ModuleState::Uninstalled));
    }

    #[test]
    fn test_start_reports_resolution_failure() {
        let framework = framework();
        let id = framework
            .install(
                ModuleDescriptor::new("needy", Version::empty())
                    .with_import(PackageImport::new("org.absent")),
            )
            .unwrap();

        let err = framework.start(id).unwrap_err();
        assert!(matches!(
            err,
            modula_core::Error::Module(ModuleError::ResolutionFailed { .. })
        ));
        assert_eq!(framework.state(id), Some(ModuleState::Installed));
        assert!(!framework.resolve(&[]));
    }

    #[test]
    fn test_fragments_cannot_start() {
        let framework = framework();
        framework
            .install(ModuleDescriptor::new("host", Version::empty()))
            .unwrap();
        let fragment = framework
            .install(ModuleDescriptor::new("frag", Version::empty()).with_fragment_host("host"))
            .unwrap();

        assert!(framework.resolve(&[]));
        assert!(framework.module(fragment).unwrap().host.is_some());
        assert!(framework.start(fragment).is_err());
    }

    #[test]
    fn test_uninstalled_exporter_serves_until_refresh() {
        let framework = framework();
        let exporter = framework
            .install(
                ModuleDescriptor::new("exporter", Version::new(1, 0, 0))
                    .with_export("org.api", Version::new(1, 0, 0))
                    .with_class("org.api.Service", vec![1]),
            )
            .unwrap();
        let importer = framework
            .install(
                ModuleDescriptor::new("importer", Version::empty())
                    .with_import(PackageImport::new("org.api")),
            )
            .unwrap();
        framework.start(importer).unwrap();

        framework.uninstall(exporter).unwrap();
        assert!(framework.load_class(importer, "org.api.Service").is_ok());

        let refreshed = framework.refresh(&[]).unwrap();
        assert_eq!(refreshed, vec![exporter, importer]);
        assert!(framework.state(exporter).is_none());
        assert_eq!(framework.state(importer), Some(ModuleState::Installed));
    }
}
