use std::fmt;
use std::sync::Arc;

use super::entry::PathLayout;
use super::lru_map::LruBlobMap;
use super::map::{BlobMap, SimpleBlobMap};
use super::op::FileOp;
use super::state::FileState;
use crate::clock::Clock;

/// A blob map plus the policy for building entries.
///
/// All variants expose the same [`FileOp`] contract.
pub struct FileStore {
    map: Box<dyn BlobMap>,
    layout: PathLayout,
    states: Vec<FileState>,
}

impl FileStore {
    /// Flat layout, unbounded.
    pub fn new_local(states: Vec<FileState>) -> Self {
        Self {
            map: Box::new(SimpleBlobMap::new()),
            layout: PathLayout::Flat,
            states,
        }
    }

    /// Content-addressed layout: names are sharded by their leading
    /// characters.
    pub fn new_cas(states: Vec<FileState>) -> Self {
        Self {
            map: Box::new(SimpleBlobMap::new()),
            layout: PathLayout::Sharded {
                levels: PathLayout::DEFAULT_SHARD_LEVELS,
            },
            states,
        }
    }

    /// Flat layout, holding at most `capacity` entries.
    pub fn new_lru(states: Vec<FileState>, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            map: Box::new(LruBlobMap::new(capacity, clock)),
            layout: PathLayout::Flat,
            states,
        }
    }

    /// A fresh operation with no accepted states.
    pub fn new_op(&self) -> FileOp<'_> {
        FileOp::new(self)
    }

    /// Every state this store recognizes.
    pub fn states(&self) -> &[FileState] {
        &self.states
    }

    pub fn layout(&self) -> PathLayout {
        self.layout
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn map(&self) -> &dyn BlobMap {
        self.map.as_ref()
    }
}

impl fmt::Debug for FileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStore")
            .field("layout", &self.layout)
            .field("states", &self.states)
            .field("entries", &self.map.len())
            .finish()
    }
}
