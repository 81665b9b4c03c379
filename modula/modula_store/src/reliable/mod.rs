//! Reliable dual-generation file store.
//!
//! A reliable file `F` is backed by up to four sibling files:
//!
//! - `F`: the live generation
//! - `F.new`: a complete generation promoted but not yet made live
//! - `F.bak`: the previous generation
//! - `F.tmp`: an in-progress write
//!
//! Writes go to `F.tmp` with a running CRC32. On commit the checksum
//! trailer is appended and synced, then the generations are rotated with
//! renames ordered so that a crash at any point leaves at least one
//! complete generation. Every read first runs the recovery step, which
//! repairs whatever intermediate state a crash left behind.

pub mod signature;
mod stream;

pub use signature::{GenerationStatus, SIGNATURE_SIZE};
pub use stream::{ReliableReader, ReliableWriter};

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modula_core::error::StoreError;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Suffix of the in-progress write.
pub const TMP_SUFFIX: &str = ".tmp";
/// Suffix of a promoted but not yet live generation.
pub const NEW_SUFFIX: &str = ".new";
/// Suffix of the previous generation.
pub const BAK_SUFFIX: &str = ".bak";

/// Which physical generation a reader is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Generation {
    /// The live file
    Live,

    /// The previous generation
    Backup,
}

/// Build the path of a sibling generation (`F` + suffix).
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path)(e)),
    }
}

#[derive(Debug, Default)]
struct RegistryEntry {
    users: usize,
    writing: bool,
    // held while generations are renamed or picked for reading
    rotation: Arc<Mutex<()>>,
}

/// Use-counted registry of open reliable files, keyed by path.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    entries: Mutex<HashMap<PathBuf, RegistryEntry>>,
}

impl Registry {
    /// Register a new user of `path`; returns whether a writer is active
    /// and the rotation lock shared by every user of the path.
    fn acquire(&self, path: &Path, for_write: bool) -> Result<(bool, Arc<Mutex<()>>), StoreError> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(path.to_path_buf()).or_default();
        if for_write && entry.writing {
            return Err(StoreError::Locked(path.to_path_buf()));
        }
        let writer_active = entry.writing;
        entry.users += 1;
        if for_write {
            entry.writing = true;
        }
        Ok((writer_active, entry.rotation.clone()))
    }

    fn release(&self, path: &Path, writer: bool) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(path) {
            entry.users = entry.users.saturating_sub(1);
            if writer {
                entry.writing = false;
            }
            if entry.users == 0 {
                entries.remove(path);
            }
        }
    }

    fn is_writing(&self, path: &Path) -> bool {
        self.entries
            .lock()
            .get(path)
            .map(|entry| entry.writing)
            .unwrap_or(false)
    }

    fn users(&self, path: &Path) -> usize {
        self.entries
            .lock()
            .get(path)
            .map(|entry| entry.users)
            .unwrap_or(0)
    }
}

/// A registration held by an open stream; released when dropped.
#[derive(Debug)]
pub(crate) struct Lease {
    registry: Arc<Registry>,
    path: PathBuf,
    writer: bool,
    rotation: Arc<Mutex<()>>,
}

impl Lease {
    /// The rotation lock of the leased path.
    pub(crate) fn rotation(&self) -> Arc<Mutex<()>> {
        self.rotation.clone()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.registry.release(&self.path, self.writer);
    }
}

/// Status of every physical generation of a reliable file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inspection {
    /// The live file
    pub live: GenerationStatus,

    /// The `.new` file
    pub new: GenerationStatus,

    /// The `.bak` file
    pub bak: GenerationStatus,

    /// Whether a `.tmp` file is present
    pub tmp_present: bool,
}

/// Entry point for reading and writing reliable files.
///
/// Clones share one registry, so concurrent opens of the same logical file
/// through any clone are deduplicated and write-locked together. Distinct
/// stores never coordinate with each other.
#[derive(Debug, Clone, Default)]
pub struct ReliableFileStore {
    registry: Arc<Registry>,
}

impl ReliableFileStore {
    /// Create a store with an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trailer bytes that follow logical content on disk.
    pub fn signature_size(&self) -> usize {
        SIGNATURE_SIZE
    }

    fn lease(&self, path: &Path, for_write: bool) -> Result<(Lease, bool), StoreError> {
        let (writer_active, rotation) = self.registry.acquire(path, for_write)?;
        Ok((
            Lease {
                registry: self.registry.clone(),
                path: path.to_path_buf(),
                writer: for_write,
                rotation,
            },
            writer_active,
        ))
    }

    /// Whether `path` is currently open for writing.
    pub fn is_locked(&self, path: &Path) -> bool {
        self.registry.is_writing(path)
    }

    /// Number of open streams on `path`.
    pub fn open_count(&self, path: &Path) -> usize {
        self.registry.users(path)
    }

    /// Whether any complete generation of `path` exists.
    pub fn exists(&self, path: &Path) -> bool {
        path.exists() || sibling(path, NEW_SUFFIX).exists() || sibling(path, BAK_SUFFIX).exists()
    }

    /// Report the status of every physical generation without repairing.
    pub fn inspect(&self, path: &Path) -> Result<Inspection, StoreError> {
        let status = |p: &Path| signature::inspect(p).map_err(io_error(p));
        Ok(Inspection {
            live: status(path)?,
            new: status(&sibling(path, NEW_SUFFIX))?,
            bak: status(&sibling(path, BAK_SUFFIX))?,
            tmp_present: sibling(path, TMP_SUFFIX).exists(),
        })
    }

    /// Repair the generations of `path` after an interrupted commit.
    ///
    /// A complete `.new` is promoted to live, demoting or discarding the
    /// old live file. Without a `.new`, a `.bak` is copied back when the
    /// live file is missing. Runs under the path's rotation lock, so
    /// concurrent openers through this store never race on the renames.
    pub fn recover(&self, path: &Path) -> Result<(), StoreError> {
        let (lease, _) = self.lease(path, false)?;
        let rotation = lease.rotation();
        let _guard = rotation.lock();
        recover_generations(path)
    }

    /// Open `path` for reading its most recent complete generation.
    pub fn open_for_read(&self, path: &Path) -> Result<ReliableReader, StoreError> {
        let (lease, writer_active) = self.lease(path, false)?;
        let rotation = lease.rotation();
        let _guard = rotation.lock();

        if !writer_active {
            recover_generations(path)?;
        } else {
            debug!(path = %path.display(), "writer active, skipping recovery");
        }

        let bak_path = sibling(path, BAK_SUFFIX);
        let mut any_exists = false;
        for (candidate, generation) in [(path, Generation::Live), (bak_path.as_path(), Generation::Backup)] {
            let status = signature::inspect(candidate).map_err(io_error(candidate))?;
            match status.logical_len() {
                Some(logical_len) => {
                    if generation == Generation::Backup {
                        warn!(path = %path.display(), "live generation unusable, reading .bak");
                    }
                    let file = fs::File::open(candidate).map_err(io_error(candidate))?;
                    return Ok(ReliableReader::new(
                        path.to_path_buf(),
                        file,
                        logical_len,
                        generation,
                        lease,
                    ));
                }
                None => any_exists |= status != GenerationStatus::Missing,
            }
        }

        if any_exists {
            Err(StoreError::Corrupt(path.to_path_buf()))
        } else {
            Err(StoreError::NotFound(path.to_path_buf()))
        }
    }

    /// Open `path` for writing a new generation.
    ///
    /// With `append`, the new generation starts with the logical content of
    /// the current one. Only one writer per path may be open at a time.
    pub fn open_for_write(&self, path: &Path, append: bool) -> Result<ReliableWriter, StoreError> {
        let (lease, _) = self.lease(path, true)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }

        {
            let rotation = lease.rotation();
            let _guard = rotation.lock();
            recover_generations(path)?;
        }

        let tmp_path = sibling(path, TMP_SUFFIX);
        let file = fs::File::create(&tmp_path).map_err(io_error(&tmp_path))?;
        let mut writer = ReliableWriter::new(path.to_path_buf(), tmp_path, file, lease);

        if append {
            match self.read_existing(path) {
                Ok(existing) => writer.write_content(&existing)?,
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(writer)
    }

    fn read_existing(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        let bak_path = sibling(path, BAK_SUFFIX);
        for candidate in [path, bak_path.as_path()] {
            let status = signature::inspect(candidate).map_err(io_error(candidate))?;
            if let Some(logical_len) = status.logical_len() {
                let file = fs::File::open(candidate).map_err(io_error(candidate))?;
                let mut content = Vec::with_capacity(logical_len as usize);
                file.take(logical_len)
                    .read_to_end(&mut content)
                    .map_err(io_error(candidate))?;
                return Ok(content);
            }
        }
        Err(StoreError::NotFound(path.to_path_buf()))
    }

    /// Promote a finished write to be the live generation.
    pub fn commit(&self, writer: ReliableWriter) -> Result<(), StoreError> {
        writer.commit()
    }

    /// Discard an in-progress write without touching existing generations.
    pub fn abort(&self, writer: ReliableWriter) -> Result<(), StoreError> {
        writer.abort()
    }

    /// Read the whole logical content of `path`.
    pub fn read_all(&self, path: &Path) -> Result<Vec<u8>, StoreError> {
        let mut reader = self.open_for_read(path)?;
        let mut content = Vec::with_capacity(reader.len() as usize);
        reader
            .read_to_end(&mut content)
            .map_err(io_error(path))?;
        Ok(content)
    }

    /// Replace the content of `path` and commit it.
    pub fn write_all(&self, path: &Path, content: &[u8]) -> Result<(), StoreError> {
        let mut writer = self.open_for_write(path, false)?;
        writer.write_content(content)?;
        writer.commit()
    }

    /// Remove every generation of `path`.
    pub fn delete(&self, path: &Path) -> Result<(), StoreError> {
        if self.registry.is_writing(path) {
            return Err(StoreError::Locked(path.to_path_buf()));
        }
        let (lease, _) = self.lease(path, false)?;
        let rotation = lease.rotation();
        let _guard = rotation.lock();
        for suffix in [NEW_SUFFIX, BAK_SUFFIX, TMP_SUFFIX] {
            remove_if_exists(&sibling(path, suffix))?;
        }
        remove_if_exists(path)
    }
}

/// Rename `from` to `to` during recovery. A missing source means another
/// opener finished this step first, which is reported as `false`.
fn rename_for_recovery(from: &Path, to: &Path) -> Result<bool, StoreError> {
    match fs::rename(from, to) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %from.display(), "generation already moved by another opener");
            Ok(false)
        }
        Err(e) => Err(io_error(from)(e)),
    }
}

/// Repair whatever intermediate state an interrupted commit left behind.
/// Callers hold the path's rotation lock.
fn recover_generations(path: &Path) -> Result<(), StoreError> {
    let new_path = sibling(path, NEW_SUFFIX);
    let bak_path = sibling(path, BAK_SUFFIX);

    if new_path.exists() {
        let status = signature::inspect(&new_path).map_err(io_error(&new_path))?;
        if status == GenerationStatus::Missing {
            return Ok(());
        }
        if !status.is_usable() {
            warn!(path = %path.display(), "discarding corrupt .new generation");
            return remove_if_exists(&new_path);
        }

        if path.exists() {
            if bak_path.exists() {
                remove_if_exists(path)?;
            } else {
                rename_for_recovery(path, &bak_path)?;
            }
        }
        if rename_for_recovery(&new_path, path)? {
            info!(path = %path.display(), "promoted .new generation after interrupted commit");
        }
    } else if bak_path.exists() && !path.exists() {
        match fs::copy(&bak_path, path) {
            Ok(_) => info!(path = %path.display(), "restored live generation from .bak"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), ".bak already moved by another opener");
            }
            Err(e) => return Err(io_error(&bak_path)(e)),
        }
    }

    Ok(())
}

/// Rotate generations after `tmp` has been fully written and synced.
///
/// The order matters: every intermediate state is repaired by
/// [`ReliableFileStore::recover`].
pub(crate) fn promote(path: &Path, tmp_path: &Path) -> Result<(), StoreError> {
    let new_path = sibling(path, NEW_SUFFIX);
    let bak_path = sibling(path, BAK_SUFFIX);

    let new_existed = new_path.exists();
    let live_existed = path.exists();

    if new_existed {
        remove_if_exists(&bak_path)?;
        fs::rename(&new_path, &bak_path).map_err(io_error(&new_path))?;
    }

    fs::rename(tmp_path, &new_path).map_err(io_error(tmp_path))?;

    if live_existed {
        if new_existed {
            fs::remove_file(path).map_err(io_error(path))?;
        } else {
            remove_if_exists(&bak_path)?;
            fs::rename(path, &bak_path).map_err(io_error(path))?;
        }
    }

    fs::rename(&new_path, path).map_err(io_error(&new_path))?;
    Ok(())
}
