//! # Modula Store
//!
//! Crash-safe persistence for framework metadata.
//!
//! The [`reliable`] module implements the dual-generation file protocol:
//! writers fill a temporary sibling, commits rotate `.new`/`.bak`
//! generations with ordered renames, and readers always see the newest
//! complete generation even after a crash mid-commit. The [`storage`]
//! module layers a keyed blob API on top.

pub mod reliable;
pub mod storage;

pub use reliable::{
    Generation, GenerationStatus, Inspection, ReliableFileStore, ReliableReader, ReliableWriter,
    SIGNATURE_SIZE,
};
pub use storage::{load_json, save_json, MemoryStorage, ReliableStorage, StorageBackend};
