use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_core::StorageConfig;

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::layer_tar::{LayerTarStore, DEFAULT_LAYER_CACHE_SIZE};
use crate::manifest::{ManifestStore, DEFAULT_MANIFEST_CACHE_SIZE};

const SANDBOX_DIR: &str = "sandbox";

/// Manifest store, layer store and a per-build sandbox under one root.
pub struct ImageStore {
    pub root: PathBuf,
    pub sandbox_dir: PathBuf,
    pub manifests: ManifestStore,
    pub layers: LayerTarStore,
}

impl ImageStore {
    pub fn new(root: &Path) -> Result<Self> {
        Self::with_options(
            root,
            DEFAULT_MANIFEST_CACHE_SIZE,
            DEFAULT_LAYER_CACHE_SIZE,
            Arc::new(SystemClock),
        )
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::with_options(
            &config.root,
            config.manifest_cache_size,
            config.layer_cache_size,
            Arc::new(SystemClock),
        )
    }

    fn with_options(
        root: &Path,
        manifest_cache_size: usize,
        layer_cache_size: usize,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let sandbox_parent = root.join(SANDBOX_DIR);
        fs::create_dir_all(&sandbox_parent)?;
        let sandbox_dir = sandbox_parent.join(format!(
            "{}{}",
            SANDBOX_DIR,
            uuid::Uuid::new_v4().simple()
        ));
        fs::create_dir(&sandbox_dir)?;

        let manifests = ManifestStore::with_options(root, manifest_cache_size, Arc::clone(&clock))?;
        let layers = LayerTarStore::with_options(root, layer_cache_size, clock)?;

        tracing::debug!(
            root = %root.display(),
            sandbox = %sandbox_dir.display(),
            "Opened image store"
        );
        Ok(Self {
            root: root.to_path_buf(),
            sandbox_dir,
            manifests,
            layers,
        })
    }
}

/// Remove every sandbox under `root`. Run after each build.
pub fn cleanup_sandbox(root: &Path) -> Result<()> {
    match fs::remove_dir_all(root.join(SANDBOX_DIR)) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
