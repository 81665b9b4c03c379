//! Loaded classes, resource handles and host class sources.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use modula_core::ModuleId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Class loaders that live outside the module system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostLoaderKind {
    /// The bootstrap loader
    Boot,

    /// The extension loader
    Ext,

    /// The application loader
    App,

    /// The loader of the framework itself
    Fwk,
}

impl HostLoaderKind {
    /// Lowercase name as used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::Ext => "ext",
            Self::App => "app",
            Self::Fwk => "fwk",
        }
    }
}

impl fmt::Display for HostLoaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HostLoaderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "boot" => Ok(Self::Boot),
            "ext" => Ok(Self::Ext),
            "app" => Ok(Self::App),
            "fwk" => Ok(Self::Fwk),
            other => Err(format!("unknown loader '{}'", other)),
        }
    }
}

/// Where a class or resource came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Origin {
    /// Defined by a module's loader
    Module(ModuleId),

    /// Supplied by a host loader
    Host(HostLoaderKind),
}

/// A defined class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedClass {
    name: String,
    bytes: Vec<u8>,
    origin: Origin,
}

impl LoadedClass {
    /// Create a defined class.
    pub fn new(name: impl Into<String>, bytes: Vec<u8>, origin: Origin) -> Self {
        Self {
            name: name.into(),
            bytes,
            origin,
        }
    }

    /// Fully-qualified class name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Final class bytes, after weaving.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Defining loader.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// The defining module, if a module defined the class.
    pub fn defining_module(&self) -> Option<ModuleId> {
        match self.origin {
            Origin::Module(id) => Some(id),
            Origin::Host(_) => None,
        }
    }
}

/// A located resource. Two handles are the same resource when origin and
/// path are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Where the resource lives
    pub origin: Origin,

    /// Resource path
    pub path: String,
}

impl ResourceRef {
    /// Create a resource handle.
    pub fn new(origin: Origin, path: impl Into<String>) -> Self {
        Self {
            origin,
            path: path.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.origin {
            Origin::Module(id) => write!(f, "module://{}/{}", id, self.path),
            Origin::Host(kind) => write!(f, "{}://{}", kind, self.path),
        }
    }
}

/// Append `items` to `acc`, skipping ones already present.
pub(crate) fn extend_unique(acc: &mut Vec<ResourceRef>, items: impl IntoIterator<Item = ResourceRef>) {
    for item in items {
        if !acc.contains(&item) {
            acc.push(item);
        }
    }
}

/// A source of classes and resources outside the module system.
pub trait ClassSource: Send + Sync {
    /// Find a class.
    fn find_class(&self, name: &str) -> Option<Arc<LoadedClass>>;

    /// Find a resource.
    fn find_resource(&self, name: &str) -> Option<ResourceRef>;

    /// Find every resource with the name.
    fn find_resources(&self, name: &str) -> Vec<ResourceRef> {
        self.find_resource(name).into_iter().collect()
    }
}

/// An in-process host loader with a fixed, growable content set.
#[derive(Debug)]
pub struct HostLoader {
    kind: HostLoaderKind,
    classes: RwLock<BTreeMap<String, Arc<LoadedClass>>>,
    resources: RwLock<BTreeSet<String>>,
}

impl HostLoader {
    /// Create an empty host loader.
    pub fn new(kind: HostLoaderKind) -> Self {
        Self {
            kind,
            classes: RwLock::new(BTreeMap::new()),
            resources: RwLock::new(BTreeSet::new()),
        }
    }

    /// Which loader this is.
    pub fn kind(&self) -> HostLoaderKind {
        self.kind
    }

    /// Make a class available.
    pub fn add_class(&self, name: impl Into<String>, bytes: Vec<u8>) {
        let name = name.into();
        let class = Arc::new(LoadedClass::new(name.clone(), bytes, Origin::Host(self.kind)));
        self.classes.write().insert(name, class);
    }

    /// Make a resource available.
    pub fn add_resource(&self, path: impl Into<String>) {
        self.resources.write().insert(path.into());
    }
}

impl ClassSource for HostLoader {
    fn find_class(&self, name: &str) -> Option<Arc<LoadedClass>> {
        self.classes.read().get(name).cloned()
    }

    fn find_resource(&self, name: &str) -> Option<ResourceRef> {
        self.resources
            .read()
            .contains(name)
            .then(|| ResourceRef::new(Origin::Host(self.kind), name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_loader() {
        let loader = HostLoader::new(HostLoaderKind::App);
        loader.add_class("org.host.Util", vec![1, 2]);
        loader.add_resource("org/host/config.properties");

        let class = loader.find_class("org.host.Util").unwrap();
        assert_eq!(class.origin(), Origin::Host(HostLoaderKind::App));
        assert_eq!(class.defining_module(), None);
        assert!(loader.find_class("org.host.Missing").is_none());
        assert_eq!(
            loader.find_resources("org/host/config.properties").len(),
            1
        );
    }

    #[test]
    fn test_extend_unique() {
        let a = ResourceRef::new(Origin::Host(HostLoaderKind::Boot), "x");
        let b = ResourceRef::new(Origin::Host(HostLoaderKind::App), "x");
        let mut acc = vec![a.clone()];
        extend_unique(&mut acc, vec![a, b.clone(), b]);
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn test_loader_kind_parsing() {
        assert_eq!("Boot".parse::<HostLoaderKind>(), Ok(HostLoaderKind::Boot));
        assert!("system".parse::<HostLoaderKind>().is_err());
    }
}
