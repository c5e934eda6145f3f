//! Image manifest store, keyed by `<repository>/<tag>`.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use regex::Regex;

use crate::base::{FileReadWriter, FileReader, FileState, FileStore};
use crate::clock::{Clock, SystemClock};
use crate::error::{Result, StoreError};

pub const MANIFEST_DOWNLOAD_DIR: &str = "manifest/download";
pub const MANIFEST_CACHE_DIR: &str = "manifest/cache";
pub const DEFAULT_MANIFEST_CACHE_SIZE: usize = 16;

/// File name for a repository and tag.
///
/// URL-safe base64 keeps the name a single path component.
pub fn encode_repo_tag(repo: &str, tag: &str) -> String {
    URL_SAFE.encode(format!("{}/{}", repo, tag))
}

/// Reverse of [`encode_repo_tag`].
pub fn decode_repo_tag(name: &str) -> Result<(String, String)> {
    static REPO_TAG: OnceLock<Option<Regex>> = OnceLock::new();

    let invalid = |reason: String| StoreError::invalid_name(name, reason);
    let bytes = URL_SAFE
        .decode(name)
        .map_err(|e| invalid(format!("not base64: {}", e)))?;
    let decoded = String::from_utf8(bytes).map_err(|e| invalid(format!("not UTF-8: {}", e)))?;

    let pattern = REPO_TAG
        .get_or_init(|| Regex::new(r"^(.+)/(\w[\w.-]{0,127})$").ok())
        .as_ref()
        .ok_or_else(|| invalid("repo/tag pattern unavailable".to_string()))?;
    let caps = pattern
        .captures(&decoded)
        .ok_or_else(|| invalid(format!("'{}' is not <repository>/<tag>", decoded)))?;
    Ok((caps[1].to_string(), caps[2].to_string()))
}

/// Manages distribution manifests on local disk.
pub struct ManifestStore {
    backend: FileStore,
    download: FileState,
    cache: FileState,
}

impl ManifestStore {
    pub fn new(root: &Path) -> Result<Self> {
        Self::with_options(root, DEFAULT_MANIFEST_CACHE_SIZE, Arc::new(SystemClock))
    }

    /// Open the store under `root`. Cached manifests that cannot be loaded
    /// are removed.
    pub fn with_options(root: &Path, capacity: usize, clock: Arc<dyn Clock>) -> Result<Self> {
        let download_dir = root.join(MANIFEST_DOWNLOAD_DIR);
        let cache_dir = root.join(MANIFEST_CACHE_DIR);

        match fs::remove_dir_all(&download_dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        fs::create_dir_all(&download_dir)?;
        fs::create_dir_all(&cache_dir)?;

        let download = FileState::new(download_dir);
        let cache = FileState::new(cache_dir.clone());
        let backend = FileStore::new_lru(vec![download.clone(), cache.clone()], capacity, clock);

        let op = backend.new_op().accept_state(&cache);
        let mut loaded = 0;
        for name in op.list_names()? {
            match op.get_file_stat(&name) {
                Ok(_) => loaded += 1,
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Failed to load cached manifest");
                    if let Err(e) = op.delete_file(&name) {
                        tracing::warn!(name = %name, error = %e, "Failed to remove cached manifest");
                    }
                }
            }
        }
        // Directories are never blobs; clear them out of the cache area.
        for dir_entry in fs::read_dir(&cache_dir)? {
            let dir_entry = dir_entry?;
            if dir_entry.file_type()?.is_dir() {
                tracing::warn!(path = %dir_entry.path().display(), "Removing unexpected directory from manifest cache");
                if let Err(e) = fs::remove_dir_all(dir_entry.path()) {
                    tracing::warn!(path = %dir_entry.path().display(), error = %e, "Failed to remove directory");
                }
            }
        }
        tracing::info!(root = %root.display(), manifests = loaded, "Loaded manifest store");

        Ok(Self {
            backend,
            download,
            cache,
        })
    }

    pub fn create_download_file(&self, repo: &str, tag: &str, len: u64) -> Result<()> {
        self.backend
            .new_op()
            .accept_state(&self.download)
            .create_file(&encode_repo_tag(repo, tag), &self.download, len)
    }

    pub fn get_download_file_read_writer(&self, repo: &str, tag: &str) -> Result<FileReadWriter> {
        self.backend
            .new_op()
            .accept_state(&self.download)
            .get_file_read_writer(&encode_repo_tag(repo, tag))
    }

    pub fn move_download_file_to_store(&self, repo: &str, tag: &str) -> Result<()> {
        self.backend
            .new_op()
            .accept_state(&self.download)
            .move_file(&encode_repo_tag(repo, tag), &self.cache)
    }

    /// Adopt an external manifest file into the cache.
    pub fn move_into_store(&self, repo: &str, tag: &str, source: &Path) -> Result<()> {
        self.backend
            .new_op()
            .accept_state(&self.cache)
            .move_file_from(&encode_repo_tag(repo, tag), &self.cache, source)
    }

    pub fn get_store_file_reader(&self, repo: &str, tag: &str) -> Result<FileReader> {
        self.backend
            .new_op()
            .accept_state(&self.cache)
            .get_file_reader(&encode_repo_tag(repo, tag))
    }

    pub fn get_download_or_cache_file_stat(&self, repo: &str, tag: &str) -> Result<fs::Metadata> {
        self.backend
            .new_op()
            .accept_state(&self.download)
            .accept_state(&self.cache)
            .get_file_stat(&encode_repo_tag(repo, tag))
    }

    pub fn get_store_file_stat(&self, repo: &str, tag: &str) -> Result<fs::Metadata> {
        self.backend
            .new_op()
            .accept_state(&self.cache)
            .get_file_stat(&encode_repo_tag(repo, tag))
    }

    pub fn delete_store_file(&self, repo: &str, tag: &str) -> Result<()> {
        self.backend
            .new_op()
            .accept_state(&self.cache)
            .delete_file(&encode_repo_tag(repo, tag))
    }

    pub fn link_store_file_to(&self, repo: &str, tag: &str, target: &Path) -> Result<()> {
        self.backend
            .new_op()
            .accept_state(&self.cache)
            .link_file_to(&encode_repo_tag(repo, tag), target)
    }

    /// `(repository, tag)` of every cached manifest. Names that do not
    /// decode are skipped.
    pub fn list_store_files(&self) -> Result<Vec<(String, String)>> {
        let names = self.backend.new_op().accept_state(&self.cache).list_names()?;
        Ok(names
            .iter()
            .filter_map(|name| decode_repo_tag(name).ok())
            .collect())
    }
}
