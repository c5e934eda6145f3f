//! Layer tarball store.
//!
//! Layers are staged under `layer_tar/download` while they stream in and
//! promoted to `layer_tar/cache` once verified. The cache survives
//! restarts; the download area does not.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};

use crate::base::{FileReadWriter, FileReader, FileState, FileStore};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError};
use crate::metadata::LastAccessTime;

pub const LAYER_TAR_DOWNLOAD_DIR: &str = "layer_tar/download";
pub const LAYER_TAR_CACHE_DIR: &str = "layer_tar/cache";
pub const DEFAULT_LAYER_CACHE_SIZE: usize = 256;

/// Manages layer tar files on local disk, keyed by digest.
pub struct LayerTarStore {
    backend: FileStore,
    download: FileState,
    cache: FileState,
    clock: Arc<dyn Clock>,
}

impl LayerTarStore {
    pub fn new(root: &Path) -> Result<Self> {
        Self::with_options(root, DEFAULT_LAYER_CACHE_SIZE, Arc::new(SystemClock))
    }

    /// Open the store under `root`, wiping stale downloads and reloading
    /// cached layers.
    pub fn with_options(root: &Path, capacity: usize, clock: Arc<dyn Clock>) -> Result<Self> {
        let download_dir = root.join(LAYER_TAR_DOWNLOAD_DIR);
        let cache_dir = root.join(LAYER_TAR_CACHE_DIR);

        match fs::remove_dir_all(&download_dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        fs::create_dir_all(&download_dir)?;
        fs::create_dir_all(&cache_dir)?;

        let download = FileState::new(download_dir);
        let cache = FileState::new(cache_dir);
        let backend = FileStore::new_lru(
            vec![download.clone(), cache.clone()],
            capacity,
            Arc::clone(&clock),
        );

        let op = backend.new_op().accept_state(&cache);
        let names = op.list_names()?;
        for name in &names {
            op.get_file_stat(name)?;
        }
        tracing::info!(
            root = %root.display(),
            layers = names.len(),
            "Loaded layer tar store"
        );

        Ok(Self {
            backend,
            download,
            cache,
            clock,
        })
    }

    /// Create an empty file of `len` bytes in the download area.
    pub fn create_download_file(&self, name: &str, len: u64) -> Result<()> {
        self.backend
            .new_op()
            .accept_state(&self.download)
            .create_file(name, &self.download, len)
    }

    pub fn get_download_file_reader(&self, name: &str) -> Result<FileReader> {
        self.backend
            .new_op()
            .accept_state(&self.download)
            .get_file_reader(name)
    }

    pub fn get_download_file_read_writer(&self, name: &str) -> Result<FileReadWriter> {
        self.backend
            .new_op()
            .accept_state(&self.download)
            .get_file_read_writer(name)
    }

    /// Promote a finished download into the cache.
    pub fn move_download_file_to_store(&self, name: &str) -> Result<()> {
        self.backend
            .new_op()
            .accept_state(&self.download)
            .move_file(name, &self.cache)
    }

    /// Adopt an external file into the cache under `name`.
    pub fn move_into_store(&self, name: &str, source: &Path) -> Result<()> {
        self.backend
            .new_op()
            .accept_state(&self.cache)
            .move_file_from(name, &self.cache, source)
    }

    pub fn get_store_file_reader(&self, name: &str) -> Result<FileReader> {
        self.backend
            .new_op()
            .accept_state(&self.cache)
            .get_file_reader(name)
    }

    /// Stat a layer that is either downloading or cached. Used to skip
    /// pulls of layers already present.
    pub fn get_download_or_cache_file_stat(&self, name: &str) -> Result<fs::Metadata> {
        self.backend
            .new_op()
            .accept_state(&self.download)
            .accept_state(&self.cache)
            .get_file_stat(name)
    }

    pub fn get_store_file_stat(&self, name: &str) -> Result<fs::Metadata> {
        self.backend
            .new_op()
            .accept_state(&self.cache)
            .get_file_stat(name)
    }

    /// Last access time recorded for a cached layer.
    pub fn get_store_file_last_access(&self, name: &str) -> Result<DateTime<Utc>> {
        let mut lat = LastAccessTime::default();
        self.backend
            .new_op()
            .accept_state(&self.cache)
            .get_file_metadata(name, &mut lat)?;
        Ok(lat.time)
    }

    pub fn delete_store_file(&self, name: &str) -> Result<()> {
        self.backend
            .new_op()
            .accept_state(&self.cache)
            .delete_file(name)
    }

    /// Hard link a cached layer to `target`.
    pub fn link_store_file_to(&self, name: &str, target: &Path) -> Result<()> {
        self.backend
            .new_op()
            .accept_state(&self.cache)
            .link_file_to(name, target)
    }

    /// Hash `source` with SHA-256 and adopt it into the cache under its
    /// hex digest. A layer already cached under that digest is kept and
    /// `source` is left in place.
    pub fn commit_layer(&self, source: &Path) -> Result<String> {
        let mut hasher = Sha256::new();
        io::copy(&mut fs::File::open(source)?, &mut hasher)?;
        let digest = hex::encode(hasher.finalize());

        match self.move_into_store(&digest, source) {
            Ok(()) => {
                tracing::debug!(digest = %digest, "Committed layer");
                Ok(digest)
            }
            Err(e) if e.is_already_exists() => {
                tracing::debug!(digest = %digest, "Layer already cached");
                Ok(digest)
            }
            Err(e) => Err(e),
        }
    }

    /// Names of all cached layers.
    pub fn list_store_files(&self) -> Result<Vec<String>> {
        self.backend.new_op().accept_state(&self.cache).list_names()
    }

    /// Delete cached layers idle for longer than `tti` (by last access) or
    /// older than `ttl` (by mtime). A zero `ttl` disables the age check.
    /// Persisted layers are kept.
    ///
    /// Returns the disk usage of the layers that remain.
    pub fn cleanup(&self, tti: Duration, ttl: Duration) -> Result<u64> {
        let op = self.backend.new_op().accept_state(&self.cache);
        let now = self.clock.now();
        let mut usage = 0;
        let mut deleted = 0;

        for name in op.list_names()? {
            let info = match op.get_file_stat(&name) {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Failed to stat cached layer");
                    continue;
                }
            };

            let expired = ttl > Duration::zero()
                && info
                    .modified()
                    .map(|mtime| now - DateTime::<Utc>::from(mtime) > ttl)
                    .unwrap_or(false);
            let idle = if expired {
                false
            } else {
                let mut lat = LastAccessTime::default();
                match op.get_file_metadata(&name, &mut lat) {
                    Ok(()) => now - lat.time > tti,
                    Err(StoreError::MetadataNotFound { .. }) => false,
                    Err(e) => {
                        tracing::warn!(name = %name, error = %e, "Failed to read last access time");
                        false
                    }
                }
            };

            if expired || idle {
                match op.delete_file(&name) {
                    Ok(()) => {
                        deleted += 1;
                        tracing::debug!(name = %name, expired, idle, "Removed cached layer");
                        continue;
                    }
                    Err(StoreError::Persisted { .. }) => {}
                    Err(e) => {
                        tracing::warn!(name = %name, error = %e, "Failed to remove cached layer");
                    }
                }
            }
            usage += info.len();
        }

        tracing::info!(deleted, usage, "Cleaned up layer tar store");
        Ok(usage)
    }
}
