//! The region digraph.
//!
//! Regions partition the module set. Directed edges carry a
//! [`RegionFilter`] deciding which objects of the head region the tail
//! region can see. Visibility is transitive along edges whose filters all
//! admit the object, and the graph may contain cycles.
//!
//! Structural changes are serialized by one mutex per digraph. The graph
//! itself is copy-on-write: queries clone an `Arc` of the current state and
//! evaluate filters without holding the lock.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use modula_core::error::RegionError;
use modula_core::{ListenerId, ModuleId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::filter::{Attributes, RegionFilter};

/// An outbound edge of a region.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredEdge {
    /// The region the edge points to
    pub head: String,

    /// The filter gating what the tail sees of the head
    pub filter: Arc<RegionFilter>,
}

#[derive(Debug, Clone)]
struct Edge {
    tail: String,
    head: String,
    filter: Arc<RegionFilter>,
}

#[derive(Debug, Clone, Default)]
struct Graph {
    regions: BTreeMap<String, BTreeSet<ModuleId>>,
    owners: HashMap<ModuleId, String>,
    edges: Vec<Edge>,
}

impl Graph {
    fn require(&self, name: &str) -> Result<(), RegionError> {
        if self.regions.contains_key(name) {
            Ok(())
        } else {
            Err(RegionError::NotFound(name.to_string()))
        }
    }

    fn outbound<'a>(&'a self, tail: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |edge| edge.tail == tail)
    }

    /// Regions from which an object with `attributes` is visible to `from`.
    fn visible_from(
        &self,
        from: &str,
        namespace: &str,
        attributes: &Attributes,
        target: Option<&str>,
    ) -> BTreeSet<String> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(from.to_string());
        queue.push_back(from.to_string());

        while let Some(current) = queue.pop_front() {
            if target == Some(current.as_str()) {
                break;
            }
            for edge in self.outbound(&current) {
                if visited.contains(&edge.head) {
                    continue;
                }
                if edge.filter.is_allowed(namespace, attributes) {
                    visited.insert(edge.head.clone());
                    queue.push_back(edge.head.clone());
                }
            }
        }

        visited.into_iter().collect()
    }
}

/// Callbacks for region creation and removal.
///
/// Listeners are invoked outside the digraph lock and may query the
/// digraph.
pub trait RegionLifecycleListener: Send + Sync {
    /// A region was created.
    fn region_added(&self, region: &Region);

    /// A region is about to be removed.
    fn region_removing(&self, region: &Region);
}

struct DigraphInner {
    graph: Mutex<Arc<Graph>>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn RegionLifecycleListener>)>>,
}

/// A directed graph of regions connected by filtered edges.
///
/// Cloning yields another handle to the same digraph.
#[derive(Clone)]
pub struct RegionDigraph {
    inner: Arc<DigraphInner>,
}

impl Default for RegionDigraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RegionDigraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.current();
        f.debug_struct("RegionDigraph")
            .field("regions", &graph.regions.keys().collect::<Vec<_>>())
            .field("edges", &graph.edges.len())
            .finish()
    }
}

fn validate_region_name(name: &str) -> Result<(), RegionError> {
    let valid = !name.trim().is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | ' '));
    if valid {
        Ok(())
    } else {
        Err(RegionError::InvalidName(name.to_string()))
    }
}

impl RegionDigraph {
    /// Create an empty digraph.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DigraphInner {
                graph: Mutex::new(Arc::new(Graph::default())),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Build a digraph from a snapshot.
    pub fn from_snapshot(snapshot: &DigraphSnapshot) -> Result<Self, RegionError> {
        let digraph = Self::new();
        digraph.replace(snapshot)?;
        Ok(digraph)
    }

    fn current(&self) -> Arc<Graph> {
        self.inner.graph.lock().clone()
    }

    fn modify<R>(
        &self,
        change: impl FnOnce(&mut Graph) -> Result<R, RegionError>,
    ) -> Result<R, RegionError> {
        let mut guard = self.inner.graph.lock();
        let graph = Arc::make_mut(&mut *guard);
        change(graph)
    }

    fn listeners(&self) -> Vec<Arc<dyn RegionLifecycleListener>> {
        self.inner
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    fn handle(&self, name: &str) -> Region {
        Region {
            name: name.to_string(),
            digraph: self.clone(),
        }
    }

    /// Register a lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn RegionLifecycleListener>) -> ListenerId {
        let id = ListenerId::new();
        self.inner.listeners.write().push((id, listener));
        id
    }

    /// Unregister a lifecycle listener.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Create a new region.
    ///
    /// # Arguments
    ///
    /// * `name` - Region name, unique within the digraph
    ///
    /// # Returns
    ///
    /// A handle to the new region.
    pub fn create_region(&self, name: &str) -> Result<Region, RegionError> {
        validate_region_name(name)?;
        self.modify(|graph| {
            if graph.regions.contains_key(name) {
                return Err(RegionError::AlreadyExists(name.to_string()));
            }
            graph.regions.insert(name.to_string(), BTreeSet::new());
            Ok(())
        })?;

        info!(region = name, "created region");
        let region = self.handle(name);
        for listener in self.listeners() {
            listener.region_added(&region);
        }
        Ok(region)
    }

    /// Look up a region by name.
    pub fn get_region(&self, name: &str) -> Option<Region> {
        self.current()
            .regions
            .contains_key(name)
            .then(|| self.handle(name))
    }

    /// All regions, ordered by name.
    pub fn regions(&self) -> Vec<Region> {
        self.current()
            .regions
            .keys()
            .map(|name| self.handle(name))
            .collect()
    }

    /// Remove a region with its module assignments and every edge touching
    /// it. Returns whether the region existed.
    pub fn remove_region(&self, name: &str) -> bool {
        let region = match self.get_region(name) {
            Some(region) => region,
            None => return false,
        };
        for listener in self.listeners() {
            listener.region_removing(&region);
        }

        let removed = self
            .modify(|graph| {
                let modules = match graph.regions.remove(name) {
                    Some(modules) => modules,
                    None => return Ok(false),
                };
                for module in modules {
                    graph.owners.remove(&module);
                }
                graph
                    .edges
                    .retain(|edge| edge.tail != name && edge.head != name);
                Ok(true)
            })
            .unwrap_or(false);

        if removed {
            info!(region = name, "removed region");
        }
        removed
    }

    /// The region owning `module`.
    pub fn region_of(&self, module: ModuleId) -> Option<Region> {
        self.current()
            .owners
            .get(&module)
            .map(|name| self.handle(name))
    }

    /// Assign `module` to `region`.
    ///
    /// Adding a module to the region that already owns it is a no-op; a
    /// module owned by another region must be removed from it first.
    pub fn add_module(&self, region: &str, module: ModuleId) -> Result<(), RegionError> {
        self.modify(|graph| {
            graph.require(region)?;
            match graph.owners.get(&module) {
                Some(owner) if owner == region => return Ok(()),
                Some(owner) => {
                    return Err(RegionError::ModuleAlreadyAssigned {
                        module,
                        region: owner.clone(),
                    })
                }
                None => {}
            }
            graph.owners.insert(module, region.to_string());
            if let Some(modules) = graph.regions.get_mut(region) {
                modules.insert(module);
            }
            Ok(())
        })?;
        debug!(region, %module, "added module to region");
        Ok(())
    }

    /// Remove `module` from `region`; returns whether it was there.
    pub fn remove_module(&self, region: &str, module: ModuleId) -> bool {
        self.modify(|graph| {
            if graph.owners.get(&module).map(String::as_str) != Some(region) {
                return Ok(false);
            }
            graph.owners.remove(&module);
            if let Some(modules) = graph.regions.get_mut(region) {
                modules.remove(&module);
            }
            Ok(true)
        })
        .unwrap_or(false)
    }

    /// Whether `region` owns `module`.
    pub fn contains(&self, region: &str, module: ModuleId) -> bool {
        self.current()
            .owners
            .get(&module)
            .map_or(false, |owner| owner == region)
    }

    /// Modules owned by `region`.
    pub fn module_ids(&self, region: &str) -> BTreeSet<ModuleId> {
        self.current()
            .regions
            .get(region)
            .cloned()
            .unwrap_or_default()
    }

    /// Add an edge from `tail` to `head`.
    ///
    /// Several edges may connect the same pair of regions; an object passes
    /// if any of them admits it.
    pub fn connect(&self, tail: &str, filter: RegionFilter, head: &str) -> Result<(), RegionError> {
        if tail == head {
            return Err(RegionError::SelfConnection(tail.to_string()));
        }
        self.modify(|graph| {
            graph.require(tail)?;
            graph.require(head)?;
            graph.edges.push(Edge {
                tail: tail.to_string(),
                head: head.to_string(),
                filter: Arc::new(filter),
            });
            Ok(())
        })?;
        info!(tail, head, "connected regions");
        Ok(())
    }

    /// Remove every edge from `tail` to `head`; returns how many were
    /// removed.
    pub fn disconnect(&self, tail: &str, head: &str) -> usize {
        self.modify(|graph| {
            let before = graph.edges.len();
            graph
                .edges
                .retain(|edge| !(edge.tail == tail && edge.head == head));
            Ok(before - graph.edges.len())
        })
        .unwrap_or(0)
    }

    /// Outbound edges of `region`.
    pub fn edges(&self, region: &str) -> Vec<FilteredEdge> {
        self.current()
            .outbound(region)
            .map(|edge| FilteredEdge {
                head: edge.head.clone(),
                filter: edge.filter.clone(),
            })
            .collect()
    }

    /// Regions whose objects matching `namespace`/`attributes` are visible
    /// from `from`, including `from` itself.
    pub fn visible_regions(
        &self,
        from: &str,
        namespace: &str,
        attributes: &Attributes,
    ) -> Result<BTreeSet<String>, RegionError> {
        let graph = self.current();
        graph.require(from)?;
        Ok(graph.visible_from(from, namespace, attributes, None))
    }

    /// Whether an object owned by `owner` is visible from `from`.
    pub fn is_visible(
        &self,
        from: &str,
        namespace: &str,
        attributes: &Attributes,
        owner: &str,
    ) -> bool {
        if from == owner {
            return true;
        }
        let graph = self.current();
        if graph.require(from).is_err() || graph.require(owner).is_err() {
            return false;
        }
        graph
            .visible_from(from, namespace, attributes, Some(owner))
            .contains(owner)
    }

    /// Capture regions, memberships and edges.
    pub fn snapshot(&self) -> DigraphSnapshot {
        let graph = self.current();
        DigraphSnapshot {
            regions: graph
                .regions
                .iter()
                .map(|(name, modules)| RegionSnapshot {
                    name: name.clone(),
                    modules: modules.iter().copied().collect(),
                })
                .collect(),
            edges: graph
                .edges
                .iter()
                .map(|edge| EdgeSnapshot {
                    tail: edge.tail.clone(),
                    head: edge.head.clone(),
                    filter: (*edge.filter).clone(),
                })
                .collect(),
        }
    }

    /// Replace the whole digraph content with `snapshot`.
    ///
    /// The snapshot is validated first; on error the digraph is unchanged.
    /// Listeners see every current region removed and every restored
    /// region added.
    pub fn replace(&self, snapshot: &DigraphSnapshot) -> Result<(), RegionError> {
        let mut next = Graph::default();
        for region in &snapshot.regions {
            validate_region_name(&region.name)?;
            if next.regions.contains_key(&region.name) {
                return Err(RegionError::AlreadyExists(region.name.clone()));
            }
            for module in &region.modules {
                if let Some(owner) = next.owners.get(module) {
                    return Err(RegionError::ModuleAlreadyAssigned {
                        module: *module,
                        region: owner.clone(),
                    });
                }
                next.owners.insert(*module, region.name.clone());
            }
            next.regions
                .insert(region.name.clone(), region.modules.iter().copied().collect());
        }
        for edge in &snapshot.edges {
            if edge.tail == edge.head {
                return Err(RegionError::SelfConnection(edge.tail.clone()));
            }
            next.require(&edge.tail)?;
            next.require(&edge.head)?;
            next.edges.push(Edge {
                tail: edge.tail.clone(),
                head: edge.head.clone(),
                filter: Arc::new(edge.filter.clone()),
            });
        }

        let listeners = self.listeners();
        for region in self.regions() {
            for listener in &listeners {
                listener.region_removing(&region);
            }
        }

        *self.inner.graph.lock() = Arc::new(next);

        for region in self.regions() {
            for listener in &listeners {
                listener.region_added(&region);
            }
        }
        info!(
            regions = snapshot.regions.len(),
            edges = snapshot.edges.len(),
            "restored region digraph"
        );
        Ok(())
    }
}

/// A handle to one region of a digraph.
#[derive(Clone)]
pub struct Region {
    name: String,
    digraph: RegionDigraph,
}

impl Region {
    /// The region name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The digraph this region belongs to.
    pub fn digraph(&self) -> &RegionDigraph {
        &self.digraph
    }

    /// Assign a module to this region.
    pub fn add_module(&self, module: ModuleId) -> Result<(), RegionError> {
        self.digraph.add_module(&self.name, module)
    }

    /// Remove a module from this region.
    pub fn remove_module(&self, module: ModuleId) -> bool {
        self.digraph.remove_module(&self.name, module)
    }

    /// Whether this region owns `module`.
    pub fn contains(&self, module: ModuleId) -> bool {
        self.digraph.contains(&self.name, module)
    }

    /// Modules owned by this region.
    pub fn module_ids(&self) -> BTreeSet<ModuleId> {
        self.digraph.module_ids(&self.name)
    }

    /// Connect this region to `head` through `filter`.
    pub fn connect_region(&self, head: &Region, filter: RegionFilter) -> Result<(), RegionError> {
        self.digraph.connect(&self.name, filter, &head.name)
    }

    /// Outbound edges of this region.
    pub fn edges(&self) -> Vec<FilteredEdge> {
        self.digraph.edges(&self.name)
    }
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && Arc::ptr_eq(&self.digraph.inner, &other.digraph.inner)
    }
}

impl Eq for Region {}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region").field("name", &self.name).finish()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Serializable content of a digraph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DigraphSnapshot {
    /// Regions with their modules
    pub regions: Vec<RegionSnapshot>,

    /// Edges between regions
    pub edges: Vec<EdgeSnapshot>,
}

/// One region in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSnapshot {
    /// Region name
    pub name: String,

    /// Owned modules
    #[serde(default)]
    pub modules: Vec<ModuleId>,
}

/// One edge in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    /// Source region
    pub tail: String,

    /// Target region
    pub head: String,

    /// Edge filter
    pub filter: RegionFilter,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{VISIBLE_BUNDLE_NAMESPACE, VISIBLE_PACKAGE_NAMESPACE};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_create_and_remove_region() {
        let digraph = RegionDigraph::new();
        let region = digraph.create_region("kernel").unwrap();
        assert_eq!(region.name(), "kernel");
        assert!(matches!(
            digraph.create_region("kernel"),
            Err(RegionError::AlreadyExists(_))
        ));
        assert!(matches!(
            digraph.create_region(""),
            Err(RegionError::InvalidName(_))
        ));
        assert!(matches!(
            digraph.create_region("a,b"),
            Err(RegionError::InvalidName(_))
        ));

        assert!(digraph.remove_region("kernel"));
        assert!(!digraph.remove_region("kernel"));
        assert!(digraph.get_region("kernel").is_none());
    }

    #[test]
    fn test_module_belongs_to_one_region() {
        let digraph = RegionDigraph::new();
        let a = digraph.create_region("a").unwrap();
        let b = digraph.create_region("b").unwrap();
        let module = ModuleId::new();

        a.add_module(module).unwrap();
        a.add_module(module).unwrap();
        assert!(matches!(
            b.add_module(module),
            Err(RegionError::ModuleAlreadyAssigned { .. })
        ));

        assert!(a.remove_module(module));
        b.add_module(module).unwrap();
        assert_eq!(digraph.region_of(module), Some(b.clone()));
        assert!(!a.contains(module));
        assert_eq!(b.module_ids().len(), 1);
    }

    #[test]
    fn test_self_connection_rejected() {
        let digraph = RegionDigraph::new();
        let a = digraph.create_region("a").unwrap();
        assert!(matches!(
            a.connect_region(&a, RegionFilter::allow_everything()),
            Err(RegionError::SelfConnection(_))
        ));
        assert!(matches!(
            digraph.connect("a", RegionFilter::default(), "missing"),
            Err(RegionError::NotFound(_))
        ));
    }

    #[test]
    fn test_parallel_edges_are_ored() {
        let digraph = RegionDigraph::new();
        let a = digraph.create_region("a").unwrap();
        let b = digraph.create_region("b").unwrap();

        let first = RegionFilter::builder()
            .allow(VISIBLE_PACKAGE_NAMESPACE, "(package=p1)")
            .unwrap()
            .build();
        let second = RegionFilter::builder()
            .allow(VISIBLE_PACKAGE_NAMESPACE, "(package=p2)")
            .unwrap()
            .build();
        a.connect_region(&b, first).unwrap();
        a.connect_region(&b, second).unwrap();
        assert_eq!(a.edges().len(), 2);

        let p1 = Attributes::new().with("package", "p1");
        let p2 = Attributes::new().with("package", "p2");
        let p3 = Attributes::new().with("package", "p3");
        assert!(digraph.is_visible("a", VISIBLE_PACKAGE_NAMESPACE, &p1, "b"));
        assert!(digraph.is_visible("a", VISIBLE_PACKAGE_NAMESPACE, &p2, "b"));
        assert!(!digraph.is_visible("a", VISIBLE_PACKAGE_NAMESPACE, &p3, "b"));

        assert_eq!(digraph.disconnect("a", "b"), 2);
        assert!(!digraph.is_visible("a", VISIBLE_PACKAGE_NAMESPACE, &p1, "b"));
    }

    #[test]
    fn test_remove_region_drops_edges_and_members() {
        let digraph = RegionDigraph::new();
        let a = digraph.create_region("a").unwrap();
        let b = digraph.create_region("b").unwrap();
        let module = ModuleId::new();
        b.add_module(module).unwrap();
        a.connect_region(&b, RegionFilter::allow_everything()).unwrap();

        digraph.remove_region("b");
        assert!(a.edges().is_empty());
        assert!(digraph.region_of(module).is_none());
    }

    struct Counting {
        added: AtomicUsize,
        removing: AtomicUsize,
    }

    impl RegionLifecycleListener for Counting {
        fn region_added(&self, _region: &Region) {
            self.added.fetch_add(1, Ordering::SeqCst);
        }

        fn region_removing(&self, region: &Region) {
            // The region is still present while listeners run
            assert!(region.digraph().get_region(region.name()).is_some());
            self.removing.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_lifecycle_listeners() {
        let digraph = RegionDigraph::new();
        let counting = Arc::new(Counting {
            added: AtomicUsize::new(0),
            removing: AtomicUsize::new(0),
        });
        let id = digraph.add_listener(counting.clone());

        digraph.create_region("a").unwrap();
        digraph.create_region("b").unwrap();
        digraph.remove_region("a");
        assert_eq!(counting.added.load(Ordering::SeqCst), 2);
        assert_eq!(counting.removing.load(Ordering::SeqCst), 1);

        assert!(digraph.remove_listener(id));
        digraph.create_region("c").unwrap();
        assert_eq!(counting.added.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_snapshot_restores_structure() {
        let digraph = RegionDigraph::new();
        let a = digraph.create_region("a").unwrap();
        let b = digraph.create_region("b").unwrap();
        let module = ModuleId::new();
        b.add_module(module).unwrap();
        a.connect_region(
            &b,
            RegionFilter::builder()
                .allow(VISIBLE_BUNDLE_NAMESPACE, "(bundle-symbolic-name=org.*)")
                .unwrap()
                .build(),
        )
        .unwrap();

        let json = serde_json::to_string(&digraph.snapshot()).unwrap();
        let snapshot: DigraphSnapshot = serde_json::from_str(&json).unwrap();
        let restored = RegionDigraph::from_snapshot(&snapshot).unwrap();

        assert!(restored.contains("b", module));
        assert_eq!(restored.edges("a").len(), 1);
        assert_eq!(restored.snapshot(), digraph.snapshot());
    }

    #[test]
    fn test_invalid_snapshot_leaves_digraph_unchanged() {
        let digraph = RegionDigraph::new();
        digraph.create_region("keep").unwrap();

        let bad = DigraphSnapshot {
            regions: vec![RegionSnapshot {
                name: "a".into(),
                modules: Vec::new(),
            }],
            edges: vec![EdgeSnapshot {
                tail: "a".into(),
                head: "missing".into(),
                filter: RegionFilter::default(),
            }],
        };
        assert!(digraph.replace(&bad).is_err());
        assert!(digraph.get_region("keep").is_some());
    }
}
