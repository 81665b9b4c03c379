//! Keyed storage backends for framework metadata.
//!
//! The framework persists its module table, region digraph and start
//! levels as named blobs. [`ReliableStorage`] keeps every blob in its own
//! reliable file; [`MemoryStorage`] is used by tests and ephemeral
//! frameworks.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use modula_core::error::StoreError;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::reliable::{ReliableFileStore, BAK_SUFFIX, NEW_SUFFIX, TMP_SUFFIX};

/// Trait for storage backends
pub trait StorageBackend: Send + Sync + 'static {
    /// Store data with the given key
    fn store(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Load data with the given key
    fn load(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Delete data with the given key
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Check if a key exists
    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// List all keys
    fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Rename a key, replacing any existing value under the new key
    fn rename(&self, old_key: &str, new_key: &str) -> Result<(), StoreError>;
}

/// Serialize `value` as JSON under `key`.
pub fn save_json<B, T>(backend: &B, key: &str, value: &T) -> modula_core::Result<()>
where
    B: StorageBackend + ?Sized,
    T: Serialize,
{
    let data = serde_json::to_vec_pretty(value)?;
    backend.store(key, &data)?;
    Ok(())
}

/// Load a JSON value stored under `key`; `None` when the key is absent.
pub fn load_json<B, T>(backend: &B, key: &str) -> modula_core::Result<Option<T>>
where
    B: StorageBackend + ?Sized,
    T: DeserializeOwned,
{
    match backend.load(key) {
        Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reliable-file backed storage; each key is one reliable file under
/// `base_dir`.
#[derive(Debug, Clone)]
pub struct ReliableStorage {
    base_dir: PathBuf,
    files: ReliableFileStore,
}

impl ReliableStorage {
    /// Create a new storage rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            files: ReliableFileStore::new(),
        }
    }

    /// Root directory of the storage
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The reliable file store used for every key
    pub fn files(&self) -> &ReliableFileStore {
        &self.files
    }

    fn get_path(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }
}

/// Strip a generation suffix, yielding the logical file name.
fn logical_name(file_name: &str) -> &str {
    [TMP_SUFFIX, NEW_SUFFIX, BAK_SUFFIX]
        .iter()
        .find_map(|suffix| file_name.strip_suffix(suffix))
        .unwrap_or(file_name)
}

impl StorageBackend for ReliableStorage {
    fn store(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.files.write_all(&self.get_path(key), data)
    }

    fn load(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.files.read_all(&self.get_path(key))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.files.delete(&self.get_path(key))
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.files.exists(&self.get_path(key)))
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let dir = match fs::read_dir(&self.base_dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.base_dir.clone(),
                    source,
                })
            }
        };

        let mut keys = BTreeSet::new();
        for entry in dir.flatten() {
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(file_name) = entry.file_name().to_str() {
                // A lone .tmp is an abandoned write, not a key
                if file_name.ends_with(TMP_SUFFIX) {
                    continue;
                }
                keys.insert(logical_name(file_name).to_string());
            }
        }

        Ok(keys.into_iter().collect())
    }

    fn rename(&self, old_key: &str, new_key: &str) -> Result<(), StoreError> {
        let data = self.load(old_key)?;
        self.store(new_key, &data)?;
        self.delete(old_key)
    }
}

/// In-memory storage backend (for testing)
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryStorage {
    fn store(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        self.data.write().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn load(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.data
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(PathBuf::from(key)))
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.data.read().contains_key(key))
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn rename(&self, old_key: &str, new_key: &str) -> Result<(), StoreError> {
        let mut map = self.data.write();

        if let Some(data) = map.remove(old_key) {
            map.insert(new_key.to_string(), data);
            Ok(())
        } else {
            Err(StoreError::NotFound(PathBuf::from(old_key)))
        }
    }
}
