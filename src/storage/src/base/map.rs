//! Name -> entry index with two-level locking.
//!
//! The map itself is sharded and never held across disk I/O. Each entry
//! carries its own reader-writer lock, taken after the map reference is
//! released. Lock order is always entry -> shard.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::entry::BlobEntry;
use crate::error::Result;

pub type SharedEntry = Arc<RwLock<BlobEntry>>;

/// Outcome of [`BlobMap::load_or_store`].
#[derive(Debug)]
pub enum LoadOrStore {
    /// The candidate was published and its insert hook succeeded.
    Stored,
    /// Another caller already published this name; the candidate was dropped.
    Loaded(SharedEntry),
}

pub trait BlobMap: Send + Sync {
    /// Lock-free existence check.
    fn contains(&self, name: &str) -> bool;

    /// Publish `entry` unless the name is already taken.
    ///
    /// The candidate is locked exclusively before publication and
    /// `on_insert` runs under that lock. If `on_insert` fails the entry is
    /// removed before the lock is released, so no other caller observes it.
    fn load_or_store(
        &self,
        entry: BlobEntry,
        on_insert: &mut dyn FnMut(&mut BlobEntry) -> Result<()>,
    ) -> Result<LoadOrStore>;

    /// Run `f` under a shared lock. False if the name is absent.
    ///
    /// `f` returns whether it actually used the entry; a rejected call does
    /// not count as an access.
    fn load_for_read(&self, name: &str, f: &mut dyn FnMut(&BlobEntry) -> bool) -> bool;

    /// Run `f` under an exclusive lock. False if the name is absent.
    fn load_for_write(&self, name: &str, f: &mut dyn FnMut(&mut BlobEntry) -> bool) -> bool;

    /// Run `f` under an exclusive lock for a metadata update. Unlike
    /// [`load_for_write`](BlobMap::load_for_write) this is not a content
    /// access, so sidecars written by `f` are left as `f` wrote them.
    fn load_for_update(&self, name: &str, f: &mut dyn FnMut(&mut BlobEntry) -> bool) -> bool;

    /// Run `f` for a side-effect free query. Results are advisory.
    fn load_for_peek(&self, name: &str, f: &mut dyn FnMut(&BlobEntry)) -> bool;

    /// Run `f` under an exclusive lock and unpublish the name if it
    /// succeeds. `None` if the name is absent.
    fn delete(
        &self,
        name: &str,
        f: &mut dyn FnMut(&BlobEntry) -> Result<()>,
    ) -> Option<Result<()>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded [`BlobMap`].
#[derive(Default)]
pub struct SimpleBlobMap {
    entries: DashMap<String, SharedEntry>,
}

impl SimpleBlobMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, name: &str) -> Option<SharedEntry> {
        self.entries.get(name).map(|r| Arc::clone(r.value()))
    }

    /// Whether `name` still maps to `slot`. Guards against a
    /// delete-then-recreate between lookup and lock acquisition.
    fn is_current(&self, name: &str, slot: &SharedEntry) -> bool {
        self.entries
            .get(name)
            .map(|r| Arc::ptr_eq(r.value(), slot))
            .unwrap_or(false)
    }

    /// Like [`BlobMap::delete`] but gives up instead of waiting when the
    /// entry is locked. `None` if the name is absent or busy.
    pub(crate) fn try_delete(
        &self,
        name: &str,
        f: &mut dyn FnMut(&BlobEntry) -> Result<()>,
    ) -> Option<Result<()>> {
        let slot = self.lookup(name)?;
        let guard = slot.try_write()?;
        if !self.is_current(name, &slot) {
            return None;
        }
        let result = f(&guard);
        if result.is_ok() {
            self.entries.remove_if(name, |_, v| Arc::ptr_eq(v, &slot));
        }
        Some(result)
    }
}

impl BlobMap for SimpleBlobMap {
    fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    fn load_or_store(
        &self,
        entry: BlobEntry,
        on_insert: &mut dyn FnMut(&mut BlobEntry) -> Result<()>,
    ) -> Result<LoadOrStore> {
        let name = entry.name().to_string();
        let slot: SharedEntry = Arc::new(RwLock::new(entry));
        let mut guard = slot.write();

        match self.entries.entry(name.clone()) {
            Entry::Occupied(occupied) => {
                return Ok(LoadOrStore::Loaded(Arc::clone(occupied.get())));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&slot));
            }
        }

        if let Err(e) = on_insert(&mut guard) {
            self.entries.remove_if(&name, |_, v| Arc::ptr_eq(v, &slot));
            return Err(e);
        }
        Ok(LoadOrStore::Stored)
    }

    fn load_for_read(&self, name: &str, f: &mut dyn FnMut(&BlobEntry) -> bool) -> bool {
        let Some(slot) = self.lookup(name) else {
            return false;
        };
        let guard = slot.read();
        if !self.is_current(name, &slot) {
            return false;
        }
        f(&guard);
        true
    }

    fn load_for_write(&self, name: &str, f: &mut dyn FnMut(&mut BlobEntry) -> bool) -> bool {
        let Some(slot) = self.lookup(name) else {
            return false;
        };
        let mut guard = slot.write();
        if !self.is_current(name, &slot) {
            return false;
        }
        f(&mut guard);
        true
    }

    fn load_for_update(&self, name: &str, f: &mut dyn FnMut(&mut BlobEntry) -> bool) -> bool {
        self.load_for_write(name, f)
    }

    fn load_for_peek(&self, name: &str, f: &mut dyn FnMut(&BlobEntry)) -> bool {
        self.load_for_read(name, &mut |entry| {
            f(entry);
            true
        })
    }

    fn delete(
        &self,
        name: &str,
        f: &mut dyn FnMut(&BlobEntry) -> Result<()>,
    ) -> Option<Result<()>> {
        let slot = self.lookup(name)?;
        let guard = slot.write();
        if !self.is_current(name, &slot) {
            return None;
        }
        let result = f(&guard);
        if result.is_ok() {
            self.entries.remove_if(name, |_, v| Arc::ptr_eq(v, &slot));
        }
        Some(result)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
