//! Blob lifecycle states.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lifecycle stage of a blob. Each state owns one directory; a blob in a
/// given state lives under that directory.
///
/// States are values rather than a fixed enum so that each store can
/// recognize its own set (e.g. `layer_tar/download`, `layer_tar/cache`).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FileState {
    directory: Arc<PathBuf>,
}

impl FileState {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Arc::new(directory.into()),
        }
    }

    /// Directory holding blobs in this state.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.directory.display())
    }
}

impl fmt::Debug for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileState({})", self.directory.display())
    }
}
