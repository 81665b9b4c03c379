//! Persistence of framework metadata through the reliable store.
//!
//! Two keys are written: the installed modules and the region digraph
//! (which also records region membership). Each key is one reliable file,
//! so a crash while persisting leaves the previous generation readable.

use std::collections::BTreeSet;
use std::fs;
use std::sync::atomic::Ordering;

use modula_core::{ModuleDescriptor, ModuleEvent, ModuleId, ModuleState, Result};
use modula_region::DigraphSnapshot;
use modula_store::{load_json, save_json};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::framework::FrameworkInner;

/// Storage key of the module list.
pub const MODULES_KEY: &str = "modules.json";
/// Storage key of the digraph snapshot.
pub const DIGRAPH_KEY: &str = "digraph.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedModule {
    id: ModuleId,
    descriptor: ModuleDescriptor,
    #[serde(default)]
    active: bool,
}

impl FrameworkInner {
    pub fn persist_locked(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            debug!("no storage directory configured, skipping persist");
            return Ok(());
        };
        fs::create_dir_all(storage.base_dir())?;

        let modules: Vec<PersistedModule> = self
            .entries()
            .into_iter()
            .filter(|(_, entry)| entry.state != ModuleState::Uninstalled)
            .map(|(id, entry)| PersistedModule {
                id,
                descriptor: (*entry.descriptor).clone(),
                active: entry.state == ModuleState::Active,
            })
            .collect();

        save_json(storage, DIGRAPH_KEY, &self.digraph.snapshot())?;
        save_json(storage, MODULES_KEY, &modules)?;
        info!(
            modules = modules.len(),
            dir = %storage.base_dir().display(),
            "Persisted framework metadata"
        );
        Ok(())
    }

    pub fn restore_locked(&self, events: &mut Vec<ModuleEvent>) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        if let Some(snapshot) = load_json::<_, DigraphSnapshot>(storage, DIGRAPH_KEY)? {
            self.digraph.replace(&snapshot)?;
            if self.digraph.get_region(&self.config.default_region).is_none() {
                self.digraph.create_region(&self.config.default_region)?;
            }
        }

        let modules: Vec<PersistedModule> =
            load_json(storage, MODULES_KEY)?.unwrap_or_default();
        let mut installed = BTreeSet::new();
        let mut active = Vec::new();
        for module in modules {
            let region = self
                .digraph
                .region_of(module.id)
                .map(|region| region.name().to_string())
                .unwrap_or_else(|| self.config.default_region.clone());
            match self.install_entry(module.id, &region, module.descriptor, events) {
                Ok(()) => {
                    installed.insert(module.id);
                    if module.active {
                        active.push(module.id);
                    }
                }
                Err(e) => warn!(module = %module.id, error = %e, "skipping persisted module"),
            }
        }

        self.resolve_locked(&installed, events);
        for id in active {
            if let Err(e) = self.start_locked(id, events) {
                warn!(module = %id, error = %e, "persisted module could not be restarted");
            }
        }
        info!(
            modules = installed.len(),
            next_order = self.next_order.load(Ordering::SeqCst),
            "Restored framework metadata"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FrameworkConfig;
    use crate::framework::Framework;
    use modula_core::Version;

    #[test]
    fn test_persist_without_storage_is_a_no_op() {
        let framework = Framework::new(FrameworkConfig::default()).unwrap();
        framework
            .install(ModuleDescriptor::new("org.example", Version::empty()))
            .unwrap();
        assert!(framework.persist().is_ok());
    }
}
