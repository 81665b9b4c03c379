//! Checksum trailer appended to every committed generation.
//!
//! Layout of a committed file:
//!
//! ```text
//! +-----------------+--------+-----------------+--------+
//! | logical content | ".crc" | crc32 as u64 BE | ".v1\n" |
//! +-----------------+--------+-----------------+--------+
//! ```
//!
//! Files without a recognisable trailer are accepted as unsigned content.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Number of trailer bytes following the logical content.
pub const SIGNATURE_SIZE: usize = 16;

const PREFIX: &[u8; 4] = b".crc";
const SUFFIX: &[u8; 4] = b".v1\n";
const CHUNK: usize = 8 * 1024;

/// Encode the trailer for a content checksum.
pub fn encode(checksum: u32) -> [u8; SIGNATURE_SIZE] {
    let mut trailer = [0u8; SIGNATURE_SIZE];
    trailer[..4].copy_from_slice(PREFIX);
    trailer[4..12].copy_from_slice(&u64::from(checksum).to_be_bytes());
    trailer[12..].copy_from_slice(SUFFIX);
    trailer
}

/// Decode a trailer, returning the checksum it carries.
pub fn decode(trailer: &[u8]) -> Option<u32> {
    if trailer.len() != SIGNATURE_SIZE || &trailer[..4] != PREFIX || &trailer[12..] != SUFFIX {
        return None;
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&trailer[4..12]);
    u32::try_from(u64::from_be_bytes(raw)).ok()
}

/// Outcome of validating one physical generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    /// Trailer present and checksum matches
    Valid {
        /// Bytes of logical content
        logical_len: u64,
    },

    /// No trailer; the whole file is content
    Unsigned {
        /// Bytes of content
        logical_len: u64,
    },

    /// Trailer present but checksum mismatch
    Corrupt,

    /// The file does not exist
    Missing,
}

impl GenerationStatus {
    /// Whether the generation can be served to readers.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Valid { .. } | Self::Unsigned { .. })
    }

    /// Logical length of a usable generation.
    pub fn logical_len(&self) -> Option<u64> {
        match self {
            Self::Valid { logical_len } | Self::Unsigned { logical_len } => Some(*logical_len),
            _ => None,
        }
    }
}

/// Validate the generation stored at `path`.
pub fn inspect(path: &Path) -> io::Result<GenerationStatus> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(GenerationStatus::Missing),
        Err(e) => return Err(e),
    };

    let total = file.metadata()?.len();
    if total < SIGNATURE_SIZE as u64 {
        return Ok(GenerationStatus::Unsigned { logical_len: total });
    }

    let logical_len = total - SIGNATURE_SIZE as u64;
    file.seek(SeekFrom::Start(logical_len))?;
    let mut trailer = [0u8; SIGNATURE_SIZE];
    file.read_exact(&mut trailer)?;

    let expected = match decode(&trailer) {
        Some(checksum) => checksum,
        None => return Ok(GenerationStatus::Unsigned { logical_len: total }),
    };

    file.seek(SeekFrom::Start(0))?;
    let mut hasher = crc32fast::Hasher::new();
    let mut remaining = logical_len;
    let mut buffer = vec![0u8; CHUNK];
    while remaining > 0 {
        let want = remaining.min(CHUNK as u64) as usize;
        file.read_exact(&mut buffer[..want])?;
        hasher.update(&buffer[..want]);
        remaining -= want as u64;
    }

    if hasher.finalize() == expected {
        Ok(GenerationStatus::Valid { logical_len })
    } else {
        Ok(GenerationStatus::Corrupt)
    }
}
