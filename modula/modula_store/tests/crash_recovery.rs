//! Integration tests for recovery of reliable files after interrupted
//! commits.
//!
//! Each test lays out the sibling generations exactly as a crash at some
//! point of the commit sequence would leave them, then checks that the
//! next reader sees the newest complete generation.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Barrier;
use std::thread;

use modula_core::error::StoreError;
use modula_store::reliable::{self, signature, Generation, GenerationStatus, ReliableFileStore};
use tempfile::TempDir;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

// Initialize tracing for tests
fn init_tracing() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn signed(path: &Path, content: &[u8]) {
    let mut file = fs::File::create(path).unwrap();
    file.write_all(content).unwrap();
    file.write_all(&signature::encode(crc32fast::hash(content)))
        .unwrap();
}

fn corrupted(path: &Path, content: &[u8]) {
    let mut file = fs::File::create(path).unwrap();
    file.write_all(content).unwrap();
    file.write_all(&signature::encode(crc32fast::hash(content) ^ 0xFFFF))
        .unwrap();
}

fn new_of(path: &Path) -> PathBuf {
    reliable::sibling(path, reliable::NEW_SUFFIX)
}

fn bak_of(path: &Path) -> PathBuf {
    reliable::sibling(path, reliable::BAK_SUFFIX)
}

fn tmp_of(path: &Path) -> PathBuf {
    reliable::sibling(path, reliable::TMP_SUFFIX)
}

#[test]
fn test_promotes_lone_new_generation() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("F");
    signed(&new_of(&path), b"hello");

    let store = ReliableFileStore::new();
    let mut reader = store.open_for_read(&path).unwrap();
    let mut content = String::new();
    reader.read_to_string(&mut content).unwrap();

    assert_eq!(content, "hello");
    assert!(path.exists());
    assert!(!new_of(&path).exists());
}

#[test]
fn test_crash_before_final_rename() {
    // new -> bak and tmp -> new happened; live was not yet replaced
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("F");
    signed(&path, b"second");
    signed(&bak_of(&path), b"first");
    signed(&new_of(&path), b"third");

    let store = ReliableFileStore::new();
    assert_eq!(store.read_all(&path).unwrap(), b"third");
    assert!(!new_of(&path).exists());
    assert_eq!(
        signature::inspect(&bak_of(&path)).unwrap(),
        GenerationStatus::Valid { logical_len: 5 }
    );
}

#[test]
fn test_crash_after_live_demoted() {
    // live moved to bak; new not yet renamed to live
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("F");
    signed(&bak_of(&path), b"old");
    signed(&new_of(&path), b"current");

    let store = ReliableFileStore::new();
    assert_eq!(store.read_all(&path).unwrap(), b"current");
    assert_eq!(fs::read(bak_of(&path)).unwrap().len(), 3 + reliable::SIGNATURE_SIZE);
}

#[test]
fn test_corrupt_new_generation_is_discarded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("F");
    signed(&path, b"stable");
    corrupted(&new_of(&path), b"torn");

    let store = ReliableFileStore::new();
    assert_eq!(store.read_all(&path).unwrap(), b"stable");
    assert!(!new_of(&path).exists());
}

#[test]
fn test_corrupt_live_falls_back_to_backup() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("F");
    corrupted(&path, b"damaged");
    signed(&bak_of(&path), b"previous");

    let store = ReliableFileStore::new();
    let mut reader = store.open_for_read(&path).unwrap();
    assert_eq!(reader.generation(), Generation::Backup);
    let mut content = Vec::new();
    reader.read_to_end(&mut content).unwrap();
    assert_eq!(content, b"previous");
}

#[test]
fn test_missing_live_restored_from_backup() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("F");
    signed(&bak_of(&path), b"saved");

    let store = ReliableFileStore::new();
    assert_eq!(store.read_all(&path).unwrap(), b"saved");
    assert!(path.exists());
    assert!(bak_of(&path).exists());
}

#[test]
fn test_all_generations_corrupt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("F");
    corrupted(&path, b"a");
    corrupted(&bak_of(&path), b"b");

    let store = ReliableFileStore::new();
    assert!(matches!(
        store.open_for_read(&path),
        Err(StoreError::Corrupt(_))
    ));
}

#[test]
fn test_legacy_unsigned_file_is_readable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("F");
    fs::write(&path, b"written before checksums").unwrap();

    let store = ReliableFileStore::new();
    assert_eq!(
        store.read_all(&path).unwrap(),
        b"written before checksums"
    );
}

#[test]
fn test_trailer_excluded_from_length_and_checksum() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("F");
    let store = ReliableFileStore::new();
    store.write_all(&path, b"payload").unwrap();

    let raw = fs::read(&path).unwrap();
    assert_eq!(raw.len(), 7 + store.signature_size());
    assert_eq!(
        signature::decode(&raw[7..]),
        Some(crc32fast::hash(b"payload"))
    );

    let reader = store.open_for_read(&path).unwrap();
    assert_eq!(reader.len(), 7);
}

#[test]
fn test_stale_tmp_is_ignored_and_replaced() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("F");
    let store = ReliableFileStore::new();
    store.write_all(&path, b"committed").unwrap();
    fs::write(tmp_of(&path), b"half written").unwrap();

    assert_eq!(store.read_all(&path).unwrap(), b"committed");

    store.write_all(&path, b"next").unwrap();
    assert_eq!(store.read_all(&path).unwrap(), b"next");
    assert!(!tmp_of(&path).exists());
}

#[test]
fn test_dropped_writer_aborts() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("F");
    let store = ReliableFileStore::new();
    store.write_all(&path, b"kept").unwrap();

    {
        let mut writer = store.open_for_write(&path, false).unwrap();
        writer.write_all(b"never committed").unwrap();
    }

    assert!(!store.is_locked(&path));
    assert!(!tmp_of(&path).exists());
    assert_eq!(store.read_all(&path).unwrap(), b"kept");
}

#[test]
fn test_concurrent_readers_share_one_recovery() {
    init_tracing();
    const READERS: usize = 8;

    for _ in 0..50 {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("F");
        signed(&path, b"older");
        signed(&bak_of(&path), b"oldest");
        signed(&new_of(&path), b"hello");

        let store = ReliableFileStore::new();
        let barrier = Barrier::new(READERS);
        let results: Vec<Result<Vec<u8>, StoreError>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..READERS)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        store.read_all(&path)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for result in results {
            assert_eq!(result.unwrap(), b"hello");
        }
        assert!(!new_of(&path).exists());
        assert_eq!(store.open_count(&path), 0);
    }
}

#[test]
fn test_readers_never_see_a_partial_commit() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("F");
    let store = ReliableFileStore::new();
    store.write_all(&path, b"v0").unwrap();

    let values: Vec<Vec<u8>> = (0..100).map(|i| format!("v{}", i).into_bytes()).collect();
    let barrier = Barrier::new(4);
    thread::scope(|scope| {
        scope.spawn(|| {
            barrier.wait();
            for value in &values[1..] {
                store.write_all(&path, value).unwrap();
            }
        });
        for _ in 0..3 {
            scope.spawn(|| {
                barrier.wait();
                for _ in 0..200 {
                    let content = store.read_all(&path).unwrap();
                    assert!(values.contains(&content), "unexpected content {:?}", content);
                }
            });
        }
    });

    assert_eq!(store.read_all(&path).unwrap(), b"v99");
    assert!(!store.is_locked(&path));
}

#[test]
fn test_second_writer_is_rejected_while_readers_proceed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("F");
    let store = ReliableFileStore::new();
    store.write_all(&path, b"first").unwrap();

    let mut writer = store.open_for_write(&path, false).unwrap();
    writer.write_all(b"second").unwrap();

    let outcome = thread::scope(|scope| {
        scope
            .spawn(|| (store.open_for_write(&path, false).err(), store.read_all(&path)))
            .join()
            .unwrap()
    });
    assert!(matches!(outcome.0, Some(StoreError::Locked(_))));
    assert_eq!(outcome.1.unwrap(), b"first");

    store.commit(writer).unwrap();
    assert_eq!(store.read_all(&path).unwrap(), b"second");
}
