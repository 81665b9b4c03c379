//! Filters gating visibility across region edges.

pub mod ldap;
pub mod region_filter;

pub use ldap::{AttrValue, Attributes, Filter};
pub use region_filter::{
    module_attributes, package_attributes, RegionFilter, RegionFilterBuilder,
    ALL_MATCHING_FILTER, MODULE_ID_ATTRIBUTE, MODULE_VERSION_ATTRIBUTE, NAMESPACE_ATTRIBUTE,
    PACKAGE_ATTRIBUTE, PACKAGE_VERSION_ATTRIBUTE, SYMBOLIC_NAME_ATTRIBUTE,
    VISIBLE_ALL_NAMESPACE, VISIBLE_BUNDLE_NAMESPACE, VISIBLE_PACKAGE_NAMESPACE,
    VISIBLE_SERVICE_NAMESPACE,
};
