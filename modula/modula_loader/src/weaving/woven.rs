//! The value handed to weaving hooks.

use std::fmt;
use std::sync::Arc;

use modula_core::error::WeavingError;
use modula_core::{ModuleId, PackageImport};
use serde::{Deserialize, Serialize};

use crate::class::LoadedClass;

/// Where a woven class is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WovenClassState {
    /// Hooks are running; bytes and dynamic imports may change.
    Transforming,

    /// Every hook ran; the bytes are frozen.
    Transformed,

    /// A hook rejected or failed the class.
    TransformingFailed,

    /// The loader defined the class.
    Defined,

    /// The loader could not define the class.
    DefineFailed,
}

impl WovenClassState {
    /// Whether the bytes and imports can still change.
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::Transforming)
    }
}

/// A class about to be defined, as seen by weaving hooks.
pub struct WovenClass {
    class_name: String,
    module: ModuleId,
    bytes: Vec<u8>,
    dynamic_imports: Vec<String>,
    parsed_imports: Vec<PackageImport>,
    state: WovenClassState,
    defined: Option<Arc<LoadedClass>>,
}

impl WovenClass {
    pub(crate) fn new(module: ModuleId, class_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            class_name: class_name.into(),
            module,
            bytes,
            dynamic_imports: Vec::new(),
            parsed_imports: Vec::new(),
            state: WovenClassState::Transforming,
            defined: None,
        }
    }

    /// Fully-qualified class name.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    /// Module whose loader is defining the class.
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Current class bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Replace the class bytes.
    pub fn set_bytes(&mut self, bytes: Vec<u8>) -> Result<(), WeavingError> {
        self.check_mutable()?;
        self.bytes = bytes;
        Ok(())
    }

    /// Dynamic import declarations added so far.
    pub fn dynamic_imports(&self) -> &[String] {
        &self.dynamic_imports
    }

    /// Add a `DynamicImport-Package` declaration.
    ///
    /// The declaration is validated immediately; a malformed one is
    /// rejected and not recorded.
    pub fn add_dynamic_import(&mut self, declaration: impl Into<String>) -> Result<(), WeavingError> {
        self.check_mutable()?;
        let declaration = declaration.into();
        let parsed = PackageImport::parse_all(&declaration, true).map_err(|e| {
            WeavingError::InvalidDynamicImport {
                import: declaration.clone(),
                reason: e.reason,
            }
        })?;
        if parsed.is_empty() {
            return Err(WeavingError::InvalidDynamicImport {
                import: declaration,
                reason: "empty declaration".to_string(),
            });
        }
        self.parsed_imports.extend(parsed);
        self.dynamic_imports.push(declaration);
        Ok(())
    }

    /// Lifecycle state.
    pub fn state(&self) -> WovenClassState {
        self.state
    }

    /// Whether the loader has finished with the class, successfully or not.
    pub fn is_weaving_complete(&self) -> bool {
        matches!(
            self.state,
            WovenClassState::Defined | WovenClassState::DefineFailed
        )
    }

    /// The defined class, once the loader has defined it.
    pub fn defined_class(&self) -> Option<&Arc<LoadedClass>> {
        self.defined.as_ref()
    }

    fn check_mutable(&self) -> Result<(), WeavingError> {
        if self.state.is_mutable() {
            Ok(())
        } else {
            Err(WeavingError::Immutable(self.class_name.clone()))
        }
    }

    pub(crate) fn complete(&mut self) {
        self.state = WovenClassState::Transformed;
    }

    pub(crate) fn fail(&mut self) {
        self.state = WovenClassState::TransformingFailed;
    }

    /// Record the defined class and hand back the imports to merge.
    pub(crate) fn mark_defined(&mut self, class: Arc<LoadedClass>) -> Vec<PackageImport> {
        self.state = WovenClassState::Defined;
        self.defined = Some(class);
        std::mem::take(&mut self.parsed_imports)
    }

    pub(crate) fn mark_define_failed(&mut self) {
        self.state = WovenClassState::DefineFailed;
        self.parsed_imports.clear();
    }
}

impl fmt::Debug for WovenClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WovenClass")
            .field("class_name", &self.class_name)
            .field("module", &self.module)
            .field("len", &self.bytes.len())
            .field("dynamic_imports", &self.dynamic_imports)
            .field("state", &self.state)
            .finish()
    }
}
