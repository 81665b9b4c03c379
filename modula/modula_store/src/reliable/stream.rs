//! Read and write streams over reliable files.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Take, Write};
use std::path::{Path, PathBuf};

use modula_core::error::StoreError;
use tracing::{debug, warn};

use super::signature;
use super::{io_error, promote, Generation, Lease};

/// Reads the logical content of one generation; the trailer is never
/// returned.
#[derive(Debug)]
pub struct ReliableReader {
    path: PathBuf,
    inner: Take<BufReader<File>>,
    len: u64,
    generation: Generation,
    _lease: Lease,
}

impl ReliableReader {
    pub(crate) fn new(
        path: PathBuf,
        file: File,
        len: u64,
        generation: Generation,
        lease: Lease,
    ) -> Self {
        Self {
            path,
            inner: BufReader::new(file).take(len),
            len,
            generation,
            _lease: lease,
        }
    }

    /// Logical path of the reliable file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical length of the content.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the content is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes of logical content not yet read.
    pub fn available(&self) -> u64 {
        self.inner.limit()
    }

    /// Which physical generation is being served.
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

impl Read for ReliableReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Writes a new generation into the `.tmp` sibling.
///
/// Nothing becomes visible to readers until [`ReliableWriter::commit`].
/// Dropping an uncommitted writer aborts it.
pub struct ReliableWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    inner: Option<BufWriter<File>>,
    hasher: crc32fast::Hasher,
    written: u64,
    lease: Option<Lease>,
}

impl ReliableWriter {
    pub(crate) fn new(path: PathBuf, tmp_path: PathBuf, file: File, lease: Lease) -> Self {
        Self {
            path,
            tmp_path,
            inner: Some(BufWriter::new(file)),
            hasher: crc32fast::Hasher::new(),
            written: 0,
            lease: Some(lease),
        }
    }

    /// Logical path of the reliable file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of logical content written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Write content, mapping failures to store errors.
    pub fn write_content(&mut self, content: &[u8]) -> Result<(), StoreError> {
        self.write_all(content).map_err(io_error(&self.tmp_path))
    }

    /// Seal the generation with its checksum trailer and make it live.
    pub fn commit(mut self) -> Result<(), StoreError> {
        let mut writer = match self.inner.take() {
            Some(writer) => writer,
            None => return Err(StoreError::Closed(self.path.clone())),
        };

        let checksum = self.hasher.clone().finalize();
        writer
            .write_all(&signature::encode(checksum))
            .map_err(io_error(&self.tmp_path))?;
        let file = writer
            .into_inner()
            .map_err(|e| io_error(&self.tmp_path)(e.into_error()))?;

        match file.sync_all() {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                warn!(path = %self.path.display(), "sync interrupted, continuing commit");
            }
            Err(e) => return Err(io_error(&self.tmp_path)(e)),
        }
        drop(file);

        {
            let rotation = self.lease.as_ref().map(Lease::rotation);
            let _guard = rotation.as_ref().map(|lock| lock.lock());
            promote(&self.path, &self.tmp_path)?;
        }
        debug!(
            path = %self.path.display(),
            bytes = self.written,
            checksum,
            "committed reliable file"
        );

        self.lease.take();
        Ok(())
    }

    /// Discard the generation being written.
    pub fn abort(mut self) -> Result<(), StoreError> {
        self.discard()
    }

    fn discard(&mut self) -> Result<(), StoreError> {
        if self.inner.take().is_some() {
            match fs::remove_file(&self.tmp_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&self.tmp_path)(e)),
            }
            debug!(path = %self.path.display(), "aborted reliable write");
        }
        self.lease.take();
        Ok(())
    }
}

impl std::fmt::Debug for ReliableWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableWriter")
            .field("path", &self.path)
            .field("written", &self.written)
            .field("open", &self.inner.is_some())
            .finish()
    }
}

impl Write for ReliableWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "reliable writer is closed"))?;
        let count = writer.write(buf)?;
        self.hasher.update(&buf[..count]);
        self.written += count as u64;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ReliableWriter {
    fn drop(&mut self) {
        if let Err(e) = self.discard() {
            warn!(path = %self.path.display(), error = %e, "failed to discard uncommitted write");
        }
    }
}
