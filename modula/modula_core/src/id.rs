//! Strongly-typed identifiers for the Modula platform.
//!
//! Each identifier type is a thin wrapper around a UUID with a phantom
//! type parameter so identifiers of different entities cannot be mixed up.
//!
//! # Examples
//!
//! ```
//! use modula_core::id::{ModuleId, HookId};
//! use std::str::FromStr;
//!
//! let module_id = ModuleId::new();
//! let hook_id = HookId::new();
//! assert_ne!(module_id.to_string(), hook_id.to_string());
//!
//! let id_str = "550e8400-e29b-41d4-a716-446655440000";
//! let module_id = ModuleId::from_str(id_str).unwrap();
//! assert_eq!(module_id.to_string(), id_str);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// A type-safe identifier based on UUID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Id<T> {
    uuid: Uuid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    /// Create a new random identifier.
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Create an identifier from a specific UUID.
    ///
    /// Used when restoring identifiers from persisted framework state.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            uuid,
            _marker: PhantomData,
        }
    }

    /// Create an identifier from a raw 128-bit value.
    ///
    /// # Examples
    ///
    /// ```
    /// use modula_core::id::ModuleId;
    ///
    /// let a = ModuleId::from_u128(1);
    /// let b = ModuleId::from_u128(2);
    /// assert!(a < b);
    /// ```
    pub fn from_u128(value: u128) -> Self {
        Self::from_uuid(Uuid::from_u128(value))
    }

    /// Get the underlying UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Create a nil (all zeros) identifier.
    pub fn nil() -> Self {
        Self::from_uuid(Uuid::nil())
    }

    /// Check if this is a nil identifier.
    pub fn is_nil(&self) -> bool {
        self.uuid.is_nil()
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)
    }
}

impl<T> FromStr for Id<T> {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_uuid(Uuid::parse_str(s)?))
    }
}

/// Marker type for modules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleMarker;
/// Identifier for an installed module.
pub type ModuleId = Id<ModuleMarker>;

/// Marker type for weaving hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookMarker;
/// Identifier for a registered weaving hook.
pub type HookId = Id<HookMarker>;

/// Marker type for lifecycle listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerMarker;
/// Identifier for a registered lifecycle listener.
pub type ListenerId = Id<ListenerMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_new() {
        let id1 = ModuleId::new();
        let id2 = ModuleId::new();
        assert_ne!(id1, id2, "Generated IDs should be unique");
    }

    #[test]
    fn test_id_from_str() {
        let uuid_str = "550e8400-e29b-41d4-a716-446655440000";
        let id = ModuleId::from_str(uuid_str).unwrap();
        assert_eq!(id.to_string(), uuid_str);
        assert!(ModuleId::from_str("not-a-uuid").is_err());
    }

    #[test]
    fn test_id_nil() {
        let nil_id = HookId::nil();
        assert_eq!(nil_id.to_string(), "00000000-0000-0000-0000-000000000000");
        assert!(nil_id.is_nil());
        assert!(!HookId::new().is_nil());
    }

    #[test]
    fn test_id_serde_is_transparent() {
        let id = ModuleId::from_u128(7);
        let serialized = serde_json::to_string(&id).unwrap();
        assert_eq!(serialized, format!("\"{}\"", id));
        let deserialized: ModuleId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(id, deserialized);
    }
}
