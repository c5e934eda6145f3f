//! Integration tests for the file store contract.
//!
//! Exercises construction atomicity, state gating, metadata migration and
//! delete visibility through the public API only, across the plain,
//! content-addressed and LRU store variants.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p kiln-storage --test file_store
//! ```

use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Once};

use chrono::{DateTime, Duration, Utc};
use kiln_storage::metadata;
use kiln_storage::{
    FileState, FileStore, LastAccessTime, Metadata, MockClock, StoreError,
};
use rand::RngCore;
use tempfile::TempDir;

const PINNED_SUFFIX: &str = "_test_pinned";
const TRAVELLING_SUFFIX: &str = "_test_travelling";
const START: i64 = 1_700_000_000;

/// Opaque bytes in a sidecar.
struct Note {
    suffix: &'static str,
    movable: bool,
    body: Vec<u8>,
}

impl Note {
    fn pinned(body: &[u8]) -> Self {
        Self {
            suffix: PINNED_SUFFIX,
            movable: false,
            body: body.to_vec(),
        }
    }

    fn travelling(body: &[u8]) -> Self {
        Self {
            suffix: TRAVELLING_SUFFIX,
            movable: true,
            body: body.to_vec(),
        }
    }
}

impl Metadata for Note {
    fn suffix(&self) -> &str {
        self.suffix
    }

    fn movable(&self) -> bool {
        self.movable
    }

    fn serialize(&self) -> kiln_storage::Result<Vec<u8>> {
        Ok(self.body.clone())
    }

    fn deserialize(&mut self, bytes: &[u8]) -> kiln_storage::Result<()> {
        self.body = bytes.to_vec();
        Ok(())
    }
}

fn register_notes() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        metadata::register(PINNED_SUFFIX, |_: &str| -> Option<Box<dyn Metadata>> {
            Some(Box::new(Note::pinned(b"")))
        })
        .unwrap();
        metadata::register(TRAVELLING_SUFFIX, |_: &str| -> Option<Box<dyn Metadata>> {
            Some(Box::new(Note::travelling(b"")))
        })
        .unwrap();
    });
}

struct Fixture {
    tmp: TempDir,
    download: FileState,
    cache: FileState,
    clock: Arc<MockClock>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let download = FileState::new(tmp.path().join("download"));
        let cache = FileState::new(tmp.path().join("cache"));
        Self {
            tmp,
            download,
            cache,
            clock: Arc::new(MockClock::new(t(START))),
        }
    }

    fn states(&self) -> Vec<FileState> {
        vec![self.download.clone(), self.cache.clone()]
    }

    fn stores(&self) -> Vec<(&'static str, FileStore)> {
        vec![
            ("local", FileStore::new_local(self.states())),
            ("cas", FileStore::new_cas(self.states())),
            ("lru", FileStore::new_lru(self.states(), 64, self.clock.clone())),
        ]
    }

    fn root(&self) -> &Path {
        self.tmp.path()
    }
}

fn t(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// Every regular file below `dir` whose name starts with `name`.
fn files_named(dir: &Path, name: &str) -> Vec<std::path::PathBuf> {
    let mut found = Vec::new();
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(files_named(&path, name));
        } else if entry.file_name().to_string_lossy().starts_with(name) {
            found.push(path);
        }
    }
    found
}

#[test]
fn test_concurrent_create_exactly_one_wins() {
    for _ in 0..10 {
        let f = Fixture::new();
        for (kind, store) in f.stores() {
            let wins = AtomicUsize::new(0);
            let conflicts = AtomicUsize::new(0);
            let barrier = Barrier::new(16);

            std::thread::scope(|s| {
                for _ in 0..16 {
                    s.spawn(|| {
                        barrier.wait();
                        match store.new_op().create_file("abcdef01", &f.download, 100) {
                            Ok(()) => {
                                wins.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(e) if e.is_already_exists() => {
                                conflicts.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(e) => panic!("{kind}: unexpected error: {e}"),
                        }
                    });
                }
            });

            assert_eq!(wins.load(Ordering::SeqCst), 1, "{kind}");
            assert_eq!(conflicts.load(Ordering::SeqCst), 15, "{kind}");
            let stat = store
                .new_op()
                .accept_state(&f.download)
                .get_file_stat("abcdef01")
                .unwrap();
            assert_eq!(stat.len(), 100, "{kind}");

            store
                .new_op()
                .accept_state(&f.download)
                .delete_file("abcdef01")
                .unwrap();
        }
    }
}

#[test]
fn test_failed_construction_leaves_no_trace() {
    let f = Fixture::new();
    for (kind, store) in f.stores() {
        let missing = f.root().join("does-not-exist");
        let err = store
            .new_op()
            .move_file_from("abcdef02", &f.cache, &missing)
            .unwrap_err();
        assert!(matches!(err, StoreError::IoError(_)), "{kind}: {err}");

        let err = store
            .new_op()
            .accept_state(&f.cache)
            .get_file_stat("abcdef02")
            .unwrap_err();
        assert!(err.is_not_found(), "{kind}: {err}");
        assert_eq!(store.len(), 0, "{kind}");

        store.new_op().create_file("abcdef02", &f.cache, 0).unwrap();
        store
            .new_op()
            .accept_state(&f.cache)
            .delete_file("abcdef02")
            .unwrap();
    }
}

#[test]
fn test_state_gating() {
    let f = Fixture::new();
    for (kind, store) in f.stores() {
        store.new_op().create_file("abcdef03", &f.download, 0).unwrap();

        let err = store
            .new_op()
            .accept_state(&f.cache)
            .get_file_reader("abcdef03")
            .unwrap_err();
        match err {
            StoreError::StateError {
                state, accepted, ..
            } => {
                assert_eq!(state, f.download, "{kind}");
                assert_eq!(accepted, vec![f.cache.clone()], "{kind}");
            }
            other => panic!("{kind}: expected state error, got {other}"),
        }

        store
            .new_op()
            .accept_state(&f.cache)
            .accept_state(&f.download)
            .get_file_reader("abcdef03")
            .unwrap()
            .close()
            .unwrap();

        store
            .new_op()
            .accept_state(&f.download)
            .delete_file("abcdef03")
            .unwrap();
    }
}

#[test]
fn test_move_preserves_movable_metadata() {
    register_notes();
    let f = Fixture::new();
    for (kind, store) in f.stores() {
        store.new_op().create_file("abcdef04", &f.download, 0).unwrap();
        let op = store.new_op().accept_state(&f.download);
        op.set_file_metadata("abcdef04", &Note::travelling(b"follows"))
            .unwrap();
        op.set_file_metadata("abcdef04", &Note::pinned(b"stays"))
            .unwrap();

        op.move_file("abcdef04", &f.cache).unwrap();

        let op = store.new_op().accept_state(&f.cache);
        let mut travelling = Note::travelling(b"");
        op.get_file_metadata("abcdef04", &mut travelling).unwrap();
        assert_eq!(travelling.body, b"follows", "{kind}");

        let mut pinned = Note::pinned(b"");
        let err = op.get_file_metadata("abcdef04", &mut pinned).unwrap_err();
        assert!(
            matches!(err, StoreError::MetadataNotFound { .. }),
            "{kind}: {err}"
        );
        assert!(
            files_named(f.download.directory(), "abcdef04").is_empty(),
            "{kind}"
        );

        op.delete_file("abcdef04").unwrap();
    }
}

#[test]
fn test_delete_is_visible_everywhere() {
    register_notes();
    let f = Fixture::new();
    for (kind, store) in f.stores() {
        store.new_op().create_file("abcdef05", &f.cache, 16).unwrap();
        let op = store.new_op().accept_state(&f.cache).accept_state(&f.download);
        op.set_file_metadata("abcdef05", &Note::pinned(b"x")).unwrap();
        op.set_file_metadata("abcdef05", &LastAccessTime::new(t(1)))
            .unwrap();

        op.delete_file("abcdef05").unwrap();

        assert!(op.get_file_stat("abcdef05").unwrap_err().is_not_found(), "{kind}");
        assert!(store.is_empty(), "{kind}");
        assert!(files_named(f.root(), "abcdef05").is_empty(), "{kind}");
    }
}

#[test]
fn test_write_move_read_roundtrip() {
    let f = Fixture::new();
    for (kind, store) in f.stores() {
        let payload = random_bytes(1024);
        store.new_op().create_file("abcdef06", &f.download, 0).unwrap();

        let mut rw = store
            .new_op()
            .accept_state(&f.download)
            .get_file_read_writer("abcdef06")
            .unwrap();
        rw.write_all(&payload).unwrap();
        rw.close().unwrap();

        store
            .new_op()
            .accept_state(&f.download)
            .move_file("abcdef06", &f.cache)
            .unwrap();

        let mut reader = store
            .new_op()
            .accept_state(&f.cache)
            .get_file_reader("abcdef06")
            .unwrap();
        let mut read_back = Vec::new();
        reader.read_to_end(&mut read_back).unwrap();
        reader.close().unwrap();
        assert_eq!(read_back, payload, "{kind}");

        store
            .new_op()
            .accept_state(&f.cache)
            .delete_file("abcdef06")
            .unwrap();
    }
}

#[test]
fn test_two_threads_create_same_name() {
    let f = Fixture::new();
    let store = FileStore::new_local(f.states());
    let barrier = Barrier::new(2);

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    store.new_op().create_file("y", &f.download, 100)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_already_exists()))
            .count(),
        1
    );
}

#[test]
fn test_stat_in_wrong_state_is_state_error() {
    let f = Fixture::new();
    let store = FileStore::new_local(f.states());
    store.new_op().create_file("z", &f.download, 0).unwrap();

    let err = store
        .new_op()
        .accept_state(&f.cache)
        .get_file_stat("z")
        .unwrap_err();
    assert!(err.is_state_error(), "{err}");
    assert!(!err.is_not_found());
}

#[test]
fn test_get_or_set_keeps_existing_value() {
    let f = Fixture::new();
    for (kind, store) in f.stores() {
        store.new_op().create_file("abcdef07", &f.download, 0).unwrap();
        let op = store.new_op().accept_state(&f.download);

        let t1 = t(START) - Duration::hours(1);
        let t2 = t(START) + Duration::hours(1);
        op.set_file_metadata("abcdef07", &LastAccessTime::new(t1))
            .unwrap();

        let mut lat = LastAccessTime::new(t2);
        op.get_or_set_file_metadata("abcdef07", &mut lat).unwrap();
        assert_eq!(lat.time, t1, "{kind}");

        let mut stored = LastAccessTime::default();
        op.get_file_metadata("abcdef07", &mut stored).unwrap();
        assert_eq!(stored.time, t1, "{kind}");

        op.delete_file("abcdef07").unwrap();
    }
}

#[test]
fn test_set_file_metadata_at_patches_in_place() {
    register_notes();
    let f = Fixture::new();
    for (kind, store) in f.stores() {
        store.new_op().create_file("abcdef09", &f.download, 0).unwrap();
        let op = store.new_op().accept_state(&f.download);

        let err = op
            .set_file_metadata_at("abcdef09", &Note::pinned(b""), b"zz", 0)
            .unwrap_err();
        assert!(
            matches!(err, StoreError::MetadataNotFound { .. }),
            "{kind}: {err}"
        );

        op.set_file_metadata("abcdef09", &Note::pinned(b"aaaaaa"))
            .unwrap();
        assert!(op
            .set_file_metadata_at("abcdef09", &Note::pinned(b""), b"bb", 2)
            .unwrap());
        assert!(!op
            .set_file_metadata_at("abcdef09", &Note::pinned(b""), b"bb", 2)
            .unwrap());

        let mut note = Note::pinned(b"");
        op.get_file_metadata("abcdef09", &mut note).unwrap();
        assert_eq!(note.body, b"aabbaa", "{kind}");

        let err = store
            .new_op()
            .accept_state(&f.cache)
            .set_file_metadata_at("abcdef09", &Note::pinned(b""), b"cc", 0)
            .unwrap_err();
        assert!(err.is_state_error(), "{kind}: {err}");

        op.delete_file("abcdef09").unwrap();
    }
}

#[test]
fn test_names_ending_in_metadata_suffix_are_rejected() {
    register_notes();
    let f = Fixture::new();
    for (kind, store) in f.stores() {
        store.new_op().create_file("abcdef08", &f.download, 0).unwrap();

        for suffix in ["_persist", "_last_access_time", TRAVELLING_SUFFIX] {
            let name = format!("abcdef08{suffix}");
            let err = store
                .new_op()
                .create_file(&name, &f.download, 3)
                .unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidName { .. }),
                "{kind}: {name}: {err}"
            );
            let source = f.root().join("external");
            std::fs::write(&source, b"abc").unwrap();
            let err = store
                .new_op()
                .move_file_from(&name, &f.cache, &source)
                .unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidName { .. }),
                "{kind}: {name}: {err}"
            );
            assert!(source.exists(), "{kind}");
        }

        store
            .new_op()
            .accept_state(&f.download)
            .move_file("abcdef08", &f.cache)
            .unwrap();
        let op = store.new_op().accept_state(&f.cache);
        assert_eq!(op.list_names().unwrap(), vec!["abcdef08"], "{kind}");
        op.delete_file("abcdef08").unwrap();
        assert!(
            files_named(f.root(), "abcdef08").is_empty(),
            "{kind}"
        );
    }
}

#[test]
fn test_rejected_call_does_not_refresh_access_time() {
    let f = Fixture::new();
    let store = FileStore::new_lru(f.states(), 8, f.clock.clone());
    store.new_op().create_file("abcdef10", &f.download, 4).unwrap();

    let last_access = || {
        let mut lat = LastAccessTime::default();
        store
            .new_op()
            .accept_state(&f.download)
            .get_file_metadata("abcdef10", &mut lat)
            .unwrap();
        lat.time
    };
    assert_eq!(last_access(), t(START));

    f.clock.advance(Duration::hours(1));
    let err = store
        .new_op()
        .accept_state(&f.cache)
        .get_file_reader("abcdef10")
        .unwrap_err();
    assert!(err.is_state_error(), "{err}");
    let err = store
        .new_op()
        .accept_state(&f.cache)
        .get_file_read_writer("abcdef10")
        .unwrap_err();
    assert!(err.is_state_error(), "{err}");
    assert_eq!(last_access(), t(START));

    store
        .new_op()
        .accept_state(&f.download)
        .get_file_reader("abcdef10")
        .unwrap()
        .close()
        .unwrap();
    assert_eq!(last_access(), t(START) + Duration::hours(1));
}

#[test]
fn test_concurrent_get_or_set_single_winner() {
    let f = Fixture::new();
    let store = FileStore::new_local(f.states());
    store.new_op().create_file("w", &f.download, 0).unwrap();
    let barrier = Barrier::new(8);

    let seen: Vec<DateTime<Utc>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = &store;
                let barrier = &barrier;
                let download = &f.download;
                s.spawn(move || {
                    barrier.wait();
                    let mut lat = LastAccessTime::new(t(1_000 + i));
                    store
                        .new_op()
                        .accept_state(download)
                        .get_or_set_file_metadata("w", &mut lat)
                        .unwrap();
                    lat.time
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(seen.windows(2).all(|w| w[0] == w[1]), "{seen:?}");
}

#[test]
fn test_readers_and_deleters_race() {
    let f = Fixture::new();
    let store = FileStore::new_local(f.states());
    let payload = random_bytes(256);

    for round in 0..20 {
        let name = format!("race{round}");
        let source = f.root().join(format!("src{round}"));
        std::fs::write(&source, &payload).unwrap();
        store.new_op().move_file_from(&name, &f.cache, &source).unwrap();

        let deleted = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for i in 0..6 {
                let store = &store;
                let name = &name;
                let payload = &payload;
                let deleted = &deleted;
                let cache = &f.cache;
                s.spawn(move || {
                    let op = store.new_op().accept_state(cache);
                    if i == 0 {
                        op.delete_file(name).unwrap();
                        deleted.fetch_add(1, Ordering::SeqCst);
                        return;
                    }
                    match op.get_file_reader(name) {
                        Ok(mut reader) => {
                            let mut buf = Vec::new();
                            reader.read_to_end(&mut buf).unwrap();
                            assert_eq!(&buf, payload);
                        }
                        Err(e) => assert!(e.is_not_found(), "{e}"),
                    }
                });
            }
        });

        assert_eq!(deleted.load(Ordering::SeqCst), 1);
        assert!(store
            .new_op()
            .accept_state(&f.cache)
            .get_file_stat(&name)
            .unwrap_err()
            .is_not_found());
    }
}
