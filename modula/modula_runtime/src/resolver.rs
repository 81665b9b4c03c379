//! Best-effort wiring of installed modules.
//!
//! Resolution is a fixpoint over the modules being resolved: a module is
//! dropped from the batch when one of its mandatory requirements has no
//! visible provider among the resolved modules and the rest of the batch,
//! and dropping it may in turn strand others. Whatever survives is wired
//! together, which lets mutually dependent modules resolve in one batch.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use modula_core::{ModuleDescriptor, ModuleId, PackageImport};
use modula_loader::ModuleWiring;
use modula_region::filter::{module_attributes, package_attributes};
use modula_region::{Candidate as Offer, RegionHooks};
use tracing::debug;

/// A module the resolver may wire to or resolve.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub id: ModuleId,
    pub descriptor: Arc<ModuleDescriptor>,
    pub order: u64,
    pub resolved: bool,
}

/// Outcome of one resolution pass.
#[derive(Debug, Default)]
pub(crate) struct Resolution {
    /// Wirings of the modules that resolved
    pub wirings: BTreeMap<ModuleId, ModuleWiring>,

    /// Fragments to attach, with their hosts
    pub fragments: Vec<(ModuleId, ModuleId)>,

    /// Modules left unresolved, with the first unmet requirement
    pub failures: BTreeMap<ModuleId, String>,
}

struct Pass<'a> {
    pool: &'a [Candidate],
    batch: &'a BTreeSet<ModuleId>,
    hooks: &'a RegionHooks,
}

impl Pass<'_> {
    fn available(&self, candidate: &Candidate) -> bool {
        !candidate.descriptor.is_fragment()
            && (candidate.resolved || self.batch.contains(&candidate.id))
    }

    fn package_provider(&self, requester: ModuleId, import: &PackageImport) -> Option<ModuleId> {
        let offers: Vec<Offer<(&Candidate, _)>> = self
            .pool
            .iter()
            .filter(|c| c.id != requester && self.available(c))
            .filter_map(|c| {
                let export = c.descriptor.export_of(&import.name)?;
                if !import.version_range.includes(&export.version) {
                    return None;
                }
                let attributes_match = import
                    .attributes
                    .iter()
                    .all(|(key, value)| export.attributes.get(key) == Some(value));
                if !attributes_match {
                    return None;
                }
                let attributes = package_attributes(
                    &export.name,
                    &export.version,
                    &c.descriptor.symbolic_name,
                    &c.descriptor.version,
                );
                Some(Offer::new(c.id, attributes, (c, export.version.clone())))
            })
            .collect();
        self.hooks
            .filter_providers(requester, offers)
            .into_iter()
            .map(|offer| offer.item)
            .max_by_key(|(c, version)| (c.resolved, version.clone(), Reverse(c.order)))
            .map(|(c, _)| c.id)
    }

    fn module_provider(&self, requester: ModuleId, symbolic_name: &str) -> Option<ModuleId> {
        let offers: Vec<Offer<&Candidate>> = self
            .pool
            .iter()
            .filter(|c| {
                c.id != requester
                    && self.available(c)
                    && c.descriptor.symbolic_name == symbolic_name
            })
            .map(|c| {
                let attributes =
                    module_attributes(c.id, &c.descriptor.symbolic_name, &c.descriptor.version);
                Offer::new(c.id, attributes, c)
            })
            .collect();
        self.hooks
            .filter_modules(requester, offers)
            .into_iter()
            .map(|offer| offer.item)
            .max_by_key(|c| (c.resolved, c.descriptor.version.clone(), Reverse(c.order)))
            .map(|c| c.id)
    }

    fn wire(&self, candidate: &Candidate) -> Result<ModuleWiring, String> {
        let descriptor = &candidate.descriptor;
        let mut wiring = ModuleWiring::default();

        for import in &descriptor.imports {
            match self.package_provider(candidate.id, import) {
                Some(exporter) => {
                    wiring.imports.insert(import.name.clone(), exporter);
                }
                None if import.optional || descriptor.export_of(&import.name).is_some() => {}
                None => {
                    return Err(format!(
                        "missing package {} {}",
                        import.name, import.version_range
                    ))
                }
            }
        }

        for required in &descriptor.required_modules {
            match self.module_provider(candidate.id, required) {
                Some(provider) => wiring.required.push(provider),
                None => return Err(format!("missing required module {}", required)),
            }
        }

        Ok(wiring)
    }
}

/// Resolve `targets` against `pool`, which holds every installed module
/// (including the targets and the already resolved modules).
pub(crate) fn resolve(
    pool: &[Candidate],
    targets: &BTreeSet<ModuleId>,
    hooks: &RegionHooks,
) -> Resolution {
    let mut resolution = Resolution::default();
    let mut batch: BTreeSet<ModuleId> = pool
        .iter()
        .filter(|c| targets.contains(&c.id) && !c.resolved && !c.descriptor.is_fragment())
        .map(|c| c.id)
        .collect();

    loop {
        let pass = Pass {
            pool,
            batch: &batch,
            hooks,
        };
        let mut wirings = BTreeMap::new();
        let mut failed = Vec::new();
        for candidate in pool.iter().filter(|c| batch.contains(&c.id)) {
            match pass.wire(candidate) {
                Ok(wiring) => {
                    wirings.insert(candidate.id, wiring);
                }
                Err(reason) => failed.push((candidate.id, reason)),
            }
        }

        if failed.is_empty() {
            resolution.wirings = wirings;
            break;
        }
        for (id, reason) in failed {
            debug!(module = %id, %reason, "module dropped from resolution");
            batch.remove(&id);
            resolution.failures.insert(id, reason);
        }
    }

    let pass = Pass {
        pool,
        batch: &batch,
        hooks,
    };
    for fragment in pool.iter().filter(|c| {
        targets.contains(&c.id) && !c.resolved && c.descriptor.is_fragment()
    }) {
        let host = fragment
            .descriptor
            .fragment_host
            .as_deref()
            .and_then(|host| pass.module_provider(fragment.id, host));
        match host {
            Some(host) => resolution.fragments.push((fragment.id, host)),
            None => {
                resolution
                    .failures
                    .insert(fragment.id, "fragment host not available".to_string());
            }
        }
    }

    resolution
}
