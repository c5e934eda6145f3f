//! Short-lived file operations against a [`FileStore`].
//!
//! Every call follows the same shape: hydrate the entry from disk if it is
//! not resident, lock it at the level the call needs, verify its state is
//! accepted, then act through the [`BlobEntry`].

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::entry::{BlobEntry, PathLayout};
use super::map::LoadOrStore;
use super::readwriter::{FileReadWriter, FileReader};
use super::state::FileState;
use super::store::FileStore;
use crate::error::{Result, StoreError};
use crate::metadata::{Metadata, Persist};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockLevel {
    Peek,
    Read,
    Write,
    /// Exclusive, for sidecar changes that are not content access.
    Update,
}

/// One operation against a file store, configured with the states the
/// caller accepts as valid sources.
///
/// ```no_run
/// # use kiln_storage::{FileState, FileStore};
/// # fn demo() -> kiln_storage::Result<()> {
/// let download = FileState::new("/var/kiln/layer_tar/download");
/// let cache = FileState::new("/var/kiln/layer_tar/cache");
/// let store = FileStore::new_local(vec![download.clone(), cache.clone()]);
///
/// store.new_op().create_file("layer", &download, 0)?;
/// store.new_op().accept_state(&download).move_file("layer", &cache)?;
/// let stat = store.new_op().accept_state(&cache).get_file_stat("layer")?;
/// # let _ = stat;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileOp<'a> {
    store: &'a FileStore,
    states: Vec<FileState>,
}

impl<'a> FileOp<'a> {
    pub(crate) fn new(store: &'a FileStore) -> Self {
        Self {
            store,
            states: Vec::new(),
        }
    }

    /// Add `state` to the accepted set.
    pub fn accept_state(mut self, state: &FileState) -> Self {
        if !self.states.contains(state) {
            self.states.push(state.clone());
        }
        self
    }

    pub fn accepted_states(&self) -> &[FileState] {
        &self.states
    }

    fn layout(&self) -> PathLayout {
        self.store.layout()
    }

    fn verify_state(&self, entry: &BlobEntry) -> Result<()> {
        if self.states.contains(entry.state()) {
            return Ok(());
        }
        Err(StoreError::StateError {
            name: entry.name().to_string(),
            state: entry.state().clone(),
            accepted: self.states.clone(),
        })
    }

    /// Accepted states plus `extra`, without duplicates.
    fn with_states<'s>(&self, extra: impl IntoIterator<Item = &'s FileState>) -> Vec<FileState> {
        let mut states = self.states.clone();
        for state in extra {
            if !states.contains(state) {
                states.push(state.clone());
            }
        }
        states
    }

    /// Make `name` resident by checking `scope` in order.
    ///
    /// Returns true if this call published the entry, false if it was
    /// already resident, NotFound if no listed directory holds it.
    fn reload_entry(&self, name: &str, scope: &[FileState]) -> Result<bool> {
        self.layout().validate(name)?;
        let map = self.store.map();
        if map.contains(name) {
            return Ok(false);
        }

        for state in scope {
            let candidate = BlobEntry::new(name, state.clone(), self.layout());
            // Cheap unlocked check first; the insert hook checks again.
            if candidate.reload().is_err() {
                continue;
            }
            match map.load_or_store(candidate, &mut |entry| entry.reload()) {
                Ok(LoadOrStore::Stored) => return Ok(true),
                Ok(LoadOrStore::Loaded(_)) => return Ok(false),
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::not_found(name))
    }

    /// Run `f` on the entry under `level` after verifying its state.
    fn lock_helper<T>(
        &self,
        name: &str,
        level: LockLevel,
        f: impl FnOnce(&BlobEntry) -> Result<T>,
    ) -> Result<T> {
        self.reload_entry(name, &self.states)?;

        let mut f = Some(f);
        let mut out: Option<Result<T>> = None;
        // Reports whether the call succeeded, so failures are not accesses.
        let mut run = |entry: &BlobEntry| -> bool {
            let Some(f) = f.take() else {
                return false;
            };
            let result = self.verify_state(entry).and_then(|()| f(entry));
            let ok = result.is_ok();
            out = Some(result);
            ok
        };

        let map = self.store.map();
        let loaded = match level {
            LockLevel::Peek => map.load_for_peek(name, &mut |entry| {
                run(entry);
            }),
            LockLevel::Read => map.load_for_read(name, &mut run),
            LockLevel::Write => map.load_for_write(name, &mut |entry| run(&*entry)),
            LockLevel::Update => map.load_for_update(name, &mut |entry| run(&*entry)),
        };
        if !loaded {
            return Err(StoreError::not_found(name));
        }
        out.unwrap_or_else(|| Err(StoreError::not_found(name)))
    }

    fn create_file_helper(
        &self,
        name: &str,
        target: &FileState,
        source: Option<&Path>,
        len: u64,
    ) -> Result<()> {
        self.layout().validate(name)?;
        let map = self.store.map();
        if map.contains(name) {
            return Err(StoreError::already_exists(name));
        }

        // Any state the store recognizes counts as a conflict.
        let scope = self.with_states(self.store.states().iter().chain(Some(target)));
        match self.reload_entry(name, &scope) {
            Ok(_) => return Err(StoreError::already_exists(name)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let candidate = BlobEntry::new(name, target.clone(), self.layout());
        let outcome = map.load_or_store(candidate, &mut |entry| match source {
            Some(source) => entry.move_from(target, source),
            None => entry.create(target, len),
        })?;
        match outcome {
            LoadOrStore::Stored => Ok(()),
            LoadOrStore::Loaded(_) => Err(StoreError::already_exists(name)),
        }
    }

    /// Create an empty file of `len` bytes in `state`.
    ///
    /// Fails with AlreadyExists if the name is present in any state the
    /// store recognizes.
    pub fn create_file(&self, name: &str, state: &FileState, len: u64) -> Result<()> {
        self.create_file_helper(name, state, None, len)
    }

    /// Adopt the unmanaged file at `source` into `state`.
    pub fn move_file_from(&self, name: &str, state: &FileState, source: &Path) -> Result<()> {
        self.create_file_helper(name, state, Some(source), 0)
    }

    /// Move a file from an accepted state to `target`, carrying movable
    /// metadata along.
    pub fn move_file(&self, name: &str, target: &FileState) -> Result<()> {
        let scope = self.with_states(Some(target));
        self.reload_entry(name, &scope)?;

        let mut result = None;
        let loaded = self.store.map().load_for_write(name, &mut |entry| {
            let outcome = if entry.state() == target {
                Err(StoreError::already_exists(name))
            } else {
                self.verify_state(entry).and_then(|()| entry.move_to(target))
            };
            let ok = outcome.is_ok();
            result = Some(outcome);
            ok
        });
        if !loaded {
            return Err(StoreError::not_found(name));
        }
        result.unwrap_or_else(|| Err(StoreError::not_found(name)))
    }

    /// Hard link the file to an unmanaged path.
    pub fn link_file_to(&self, name: &str, target: &Path) -> Result<()> {
        self.lock_helper(name, LockLevel::Read, |entry| entry.link_to(target))
    }

    /// Remove the file and its metadata. Persisted files are refused.
    pub fn delete_file(&self, name: &str) -> Result<()> {
        self.reload_entry(name, &self.states)?;
        let result = self.store.map().delete(name, &mut |entry| {
            self.verify_state(entry)?;
            let mut persist = Persist::default();
            match entry.get_metadata(&mut persist) {
                Ok(()) if persist.value => {
                    return Err(StoreError::Persisted {
                        name: name.to_string(),
                    })
                }
                Ok(()) | Err(StoreError::MetadataNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            entry.delete()
        });
        result.unwrap_or_else(|| Err(StoreError::not_found(name)))
    }

    pub fn get_file_path(&self, name: &str) -> Result<PathBuf> {
        self.lock_helper(name, LockLevel::Peek, |entry| Ok(entry.path()))
    }

    pub fn get_file_stat(&self, name: &str) -> Result<fs::Metadata> {
        self.lock_helper(name, LockLevel::Peek, |entry| entry.stat())
    }

    pub fn get_file_reader(&self, name: &str) -> Result<FileReader> {
        self.lock_helper(name, LockLevel::Read, |entry| entry.reader())
    }

    pub fn get_file_read_writer(&self, name: &str) -> Result<FileReadWriter> {
        self.lock_helper(name, LockLevel::Write, |entry| entry.read_writer())
    }

    pub fn get_file_metadata(&self, name: &str, md: &mut dyn Metadata) -> Result<()> {
        self.lock_helper(name, LockLevel::Peek, |entry| entry.get_metadata(md))
    }

    /// Returns whether the stored bytes changed.
    pub fn set_file_metadata(&self, name: &str, md: &dyn Metadata) -> Result<bool> {
        self.lock_helper(name, LockLevel::Update, |entry| entry.set_metadata(md))
    }

    /// Overwrite part of an existing sidecar. Returns whether bytes changed.
    pub fn set_file_metadata_at(
        &self,
        name: &str,
        md: &dyn Metadata,
        bytes: &[u8],
        offset: u64,
    ) -> Result<bool> {
        self.lock_helper(name, LockLevel::Update, |entry| {
            entry.set_metadata_at(md, bytes, offset)
        })
    }

    /// Load `md` from disk, or persist the given value if none exists yet.
    /// Concurrent callers agree on a single winner.
    pub fn get_or_set_file_metadata(&self, name: &str, md: &mut dyn Metadata) -> Result<()> {
        self.lock_helper(name, LockLevel::Update, |entry| entry.get_or_set_metadata(md))
    }

    pub fn delete_file_metadata(&self, name: &str, md: &dyn Metadata) -> Result<()> {
        self.lock_helper(name, LockLevel::Update, |entry| entry.delete_metadata(md))
    }

    /// Names of blobs on disk in any accepted state, sorted.
    ///
    /// This is a directory scan and does not take entry locks.
    pub fn list_names(&self) -> Result<Vec<String>> {
        let layout = self.layout();
        let depth = match layout {
            PathLayout::Flat => 0,
            PathLayout::Sharded { levels } => levels,
        };

        let mut names = BTreeSet::new();
        for state in &self.states {
            collect_names(state.directory(), depth, layout, &mut names)?;
        }
        Ok(names.into_iter().collect())
    }
}

/// Walk `depth` shard levels below `dir` and collect blob names.
fn collect_names(
    dir: &Path,
    depth: usize,
    layout: PathLayout,
    names: &mut BTreeSet<String>,
) -> Result<()> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for dir_entry in read_dir {
        let dir_entry = dir_entry?;
        let file_type = dir_entry.file_type()?;
        if depth > 0 {
            if file_type.is_dir() {
                collect_names(&dir_entry.path(), depth - 1, layout, names)?;
            }
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        let Ok(file_name) = dir_entry.file_name().into_string() else {
            continue;
        };
        // Leftovers of atomic sidecar writes.
        if file_name.starts_with(".tmp") {
            continue;
        }
        // Sidecars fail validation: they end in a metadata suffix.
        if layout.validate(&file_name).is_err() {
            continue;
        }
        if layout.relative_path(&file_name) != strip_to_shards(dir, &file_name, layout) {
            continue;
        }
        names.insert(file_name);
    }
    Ok(())
}

/// Relative path `file_name` actually occupies given the shard
/// directories it was found under.
fn strip_to_shards(dir: &Path, file_name: &str, layout: PathLayout) -> PathBuf {
    let levels = match layout {
        PathLayout::Flat => 0,
        PathLayout::Sharded { levels } => levels,
    };
    let components: Vec<_> = dir.components().collect();
    let start = components.len().saturating_sub(levels);
    components[start..]
        .iter()
        .collect::<PathBuf>()
        .join(file_name)
}
