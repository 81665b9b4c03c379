//! Visibility filtering of modules and package providers.
//!
//! The resolver and the class loaders ask these hooks to drop candidates
//! the requesting module cannot see. Modules that are not
//! assigned to any region are unrestricted in both directions.

use modula_core::ModuleId;
use tracing::trace;

use crate::digraph::RegionDigraph;
use crate::filter::{Attributes, VISIBLE_BUNDLE_NAMESPACE, VISIBLE_PACKAGE_NAMESPACE};

/// A candidate object owned by a module, described by its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<T> {
    /// The module owning the object
    pub owner: ModuleId,

    /// Attributes evaluated against edge filters
    pub attributes: Attributes,

    /// The object itself
    pub item: T,
}

impl<T> Candidate<T> {
    /// Create a candidate.
    pub fn new(owner: ModuleId, attributes: Attributes, item: T) -> Self {
        Self {
            owner,
            attributes,
            item,
        }
    }
}

/// Region-based visibility checks over a digraph.
#[derive(Debug, Clone)]
pub struct RegionHooks {
    digraph: RegionDigraph,
}

impl RegionHooks {
    /// Create hooks over `digraph`.
    pub fn new(digraph: RegionDigraph) -> Self {
        Self { digraph }
    }

    /// The digraph consulted.
    pub fn digraph(&self) -> &RegionDigraph {
        &self.digraph
    }

    /// Whether an object owned by `owner` is visible to `requester`.
    pub fn is_visible(
        &self,
        requester: ModuleId,
        owner: ModuleId,
        namespace: &str,
        attributes: &Attributes,
    ) -> bool {
        if requester == owner {
            return true;
        }
        let (from, to) = match (
            self.digraph.region_of(requester),
            self.digraph.region_of(owner),
        ) {
            (Some(from), Some(to)) => (from, to),
            _ => return true,
        };
        let visible = self
            .digraph
            .is_visible(from.name(), namespace, attributes, to.name());
        trace!(
            %requester,
            %owner,
            namespace,
            from = from.name(),
            to = to.name(),
            visible,
            "region visibility check"
        );
        visible
    }

    /// Keep only the candidates of `namespace` visible to `requester`.
    pub fn filter_candidates<T>(
        &self,
        requester: ModuleId,
        namespace: &str,
        candidates: Vec<Candidate<T>>,
    ) -> Vec<Candidate<T>> {
        candidates
            .into_iter()
            .filter(|candidate| {
                self.is_visible(requester, candidate.owner, namespace, &candidate.attributes)
            })
            .collect()
    }

    /// Keep only the modules visible to `requester`.
    pub fn filter_modules<T>(&self, requester: ModuleId, candidates: Vec<Candidate<T>>) -> Vec<Candidate<T>> {
        self.filter_candidates(requester, VISIBLE_BUNDLE_NAMESPACE, candidates)
    }

    /// Keep only the package providers visible to `requester`.
    pub fn filter_providers<T>(
        &self,
        requester: ModuleId,
        candidates: Vec<Candidate<T>>,
    ) -> Vec<Candidate<T>> {
        self.filter_candidates(requester, VISIBLE_PACKAGE_NAMESPACE, candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::RegionFilter;
    use modula_core::Version;

    #[test]
    fn test_filters_by_region_edges() {
        let digraph = RegionDigraph::new();
        let app = digraph.create_region("app").unwrap();
        let lib = digraph.create_region("lib").unwrap();
        app.connect_region(
            &lib,
            RegionFilter::builder()
                .allow(VISIBLE_PACKAGE_NAMESPACE, "(package=org.lib.api)")
                .unwrap()
                .build(),
        )
        .unwrap();

        let consumer = ModuleId::new();
        let provider = ModuleId::new();
        let stray = ModuleId::new();
        app.add_module(consumer).unwrap();
        lib.add_module(provider).unwrap();

        let hooks = RegionHooks::new(digraph);
        let candidates = vec![
            Candidate::new(
                provider,
                Attributes::new().with("package", "org.lib.api"),
                "api",
            ),
            Candidate::new(
                provider,
                Attributes::new().with("package", "org.lib.impl"),
                "impl",
            ),
            Candidate::new(stray, Attributes::new(), "unassigned"),
        ];

        let visible: Vec<&str> = hooks
            .filter_providers(consumer, candidates)
            .into_iter()
            .map(|c| c.item)
            .collect();
        assert_eq!(visible, vec!["api", "unassigned"]);

        // The provider does not see the consumer's region at all
        let back = vec![Candidate::new(
            consumer,
            crate::filter::module_attributes(consumer, "app.main", &Version::empty()),
            (),
        )];
        assert!(hooks.filter_modules(provider, back).is_empty());
    }
}
