//! # Modula Region
//!
//! Isolation regions for the Modula module platform.
//!
//! A [`RegionDigraph`] partitions modules into named regions connected by
//! directed edges. Each edge carries a [`RegionFilter`]: per-namespace
//! LDAP-style filters deciding which modules, packages and services of the
//! head region the tail region can see. Visibility is transitive and cycle
//! tolerant.
//!
//! ## Crate Structure
//!
//! - **filter**: LDAP filter parser/evaluator and region filters
//! - **digraph**: Regions, edges, visibility queries, snapshots
//! - **hooks**: Candidate filtering for resolvers and loaders
//! - **management**: Read-only management projection

pub mod digraph;
pub mod filter;
pub mod hooks;
pub mod management;

pub use digraph::{
    DigraphSnapshot, EdgeSnapshot, FilteredEdge, Region, RegionDigraph, RegionLifecycleListener,
    RegionSnapshot,
};
pub use filter::{AttrValue, Attributes, Filter, RegionFilter, RegionFilterBuilder};
pub use hooks::{Candidate, RegionHooks};
pub use management::{
    InMemoryManagementRegistry, ManageableRegionDigraph, ManagedObject, ManagementRegistry,
};
