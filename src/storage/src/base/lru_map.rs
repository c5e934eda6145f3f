//! Capacity-bounded blob map.
//!
//! Recency is tracked in memory and mirrored to each blob's
//! [`LastAccessTime`] sidecar, so ordering survives a restart. Sidecar
//! writes are throttled to one per `resolution` per blob.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Duration;
use parking_lot::Mutex;

use super::entry::BlobEntry;
use super::map::{BlobMap, LoadOrStore, SimpleBlobMap};
use crate::clock::Clock;
use crate::error::{Result, StoreError};
use crate::metadata::{LastAccessTime, Persist};

const DEFAULT_RESOLUTION_MINUTES: i64 = 5;

#[derive(Default)]
struct Recency {
    /// (access time in unix seconds, sequence) -> name, oldest first.
    order: BTreeMap<(i64, u64), String>,
    keys: HashMap<String, (i64, u64)>,
    seq: u64,
}

impl Recency {
    fn touch(&mut self, name: &str, at: i64) {
        self.forget(name);
        self.seq += 1;
        let key = (at, self.seq);
        self.order.insert(key, name.to_string());
        self.keys.insert(name.to_string(), key);
    }

    fn forget(&mut self, name: &str) {
        if let Some(key) = self.keys.remove(name) {
            self.order.remove(&key);
        }
    }
}

/// [`BlobMap`] that evicts least recently used entries once it holds more
/// than `capacity` names. Busy and persisted entries are never evicted.
pub struct LruBlobMap {
    inner: SimpleBlobMap,
    capacity: usize,
    clock: Arc<dyn Clock>,
    resolution: Duration,
    recency: Mutex<Recency>,
}

impl LruBlobMap {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: SimpleBlobMap::new(),
            capacity,
            clock,
            resolution: Duration::minutes(DEFAULT_RESOLUTION_MINUTES),
            recency: Mutex::new(Recency::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Seed recency for a newly published entry from its sidecar, or stamp
    /// it with the current time.
    fn track_insert(&self, entry: &BlobEntry) {
        let mut lat = LastAccessTime::default();
        let at = match entry.get_metadata(&mut lat) {
            Ok(()) => lat.time,
            Err(_) => {
                let now = self.clock.now();
                if let Err(e) = entry.set_metadata(&LastAccessTime::new(now)) {
                    tracing::warn!(name = %entry.name(), error = %e, "Failed to record last access time");
                }
                now
            }
        };
        self.recency.lock().touch(entry.name(), at.timestamp());
    }

    fn track_access(&self, entry: &BlobEntry) {
        let now = self.clock.now();
        self.recency.lock().touch(entry.name(), now.timestamp());

        let mut lat = LastAccessTime::default();
        let stale = match entry.get_metadata(&mut lat) {
            Ok(()) => now - lat.time >= self.resolution,
            Err(_) => true,
        };
        // An externally removed blob must not grow an orphan sidecar.
        if stale && entry.reload().is_ok() {
            if let Err(e) = entry.set_metadata(&LastAccessTime::new(now)) {
                tracing::warn!(name = %entry.name(), error = %e, "Failed to update last access time");
            }
        }
    }

    /// Follow the entry's sidecar after a metadata update, so an explicitly
    /// written last access time also orders eviction.
    fn sync_recency(&self, entry: &BlobEntry) {
        let mut lat = LastAccessTime::default();
        if entry.get_metadata(&mut lat).is_ok() {
            self.recency.lock().touch(entry.name(), lat.time.timestamp());
        }
    }

    fn evict(&self, keep: &str) {
        let excess = self.inner.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }

        let candidates: Vec<String> = self
            .recency
            .lock()
            .order
            .values()
            .filter(|name| name.as_str() != keep)
            .cloned()
            .collect();

        let mut evicted = 0;
        for name in candidates {
            if evicted >= excess {
                break;
            }
            let result = self.inner.try_delete(&name, &mut |entry| {
                let mut persist = Persist::default();
                if entry.get_metadata(&mut persist).is_ok() && persist.value {
                    return Err(StoreError::Persisted {
                        name: entry.name().to_string(),
                    });
                }
                entry.delete()
            });
            match result {
                Some(Ok(())) => {
                    self.recency.lock().forget(&name);
                    evicted += 1;
                    tracing::debug!(name = %name, "Evicted file");
                }
                Some(Err(StoreError::Persisted { .. })) => {
                    tracing::debug!(name = %name, "Skipped persisted file during eviction");
                }
                Some(Err(e)) => {
                    tracing::warn!(name = %name, error = %e, "Failed to evict file");
                }
                None => {
                    tracing::debug!(name = %name, "Skipped busy file during eviction");
                }
            }
        }
    }
}

impl BlobMap for LruBlobMap {
    fn contains(&self, name: &str) -> bool {
        self.inner.contains(name)
    }

    fn load_or_store(
        &self,
        entry: BlobEntry,
        on_insert: &mut dyn FnMut(&mut BlobEntry) -> Result<()>,
    ) -> Result<LoadOrStore> {
        let name = entry.name().to_string();
        let outcome = self.inner.load_or_store(entry, &mut |e| {
            on_insert(e)?;
            self.track_insert(e);
            Ok(())
        })?;
        if matches!(outcome, LoadOrStore::Stored) {
            self.evict(&name);
        }
        Ok(outcome)
    }

    fn load_for_read(&self, name: &str, f: &mut dyn FnMut(&BlobEntry) -> bool) -> bool {
        self.inner.load_for_read(name, &mut |e| {
            let used = f(e);
            if used {
                self.track_access(e);
            }
            used
        })
    }

    fn load_for_write(&self, name: &str, f: &mut dyn FnMut(&mut BlobEntry) -> bool) -> bool {
        self.inner.load_for_write(name, &mut |e| {
            let used = f(e);
            if used {
                self.track_access(e);
            }
            used
        })
    }

    fn load_for_update(&self, name: &str, f: &mut dyn FnMut(&mut BlobEntry) -> bool) -> bool {
        self.inner.load_for_update(name, &mut |e| {
            let used = f(e);
            if used {
                self.sync_recency(e);
            }
            used
        })
    }

    fn load_for_peek(&self, name: &str, f: &mut dyn FnMut(&BlobEntry)) -> bool {
        self.inner.load_for_peek(name, f)
    }

    fn delete(
        &self,
        name: &str,
        f: &mut dyn FnMut(&BlobEntry) -> Result<()>,
    ) -> Option<Result<()>> {
        let result = self.inner.delete(name, f);
        if matches!(result, Some(Ok(()))) {
            self.recency.lock().forget(name);
        }
        result
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
