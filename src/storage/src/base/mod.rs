//! Concurrency-safe local blob store.
//!
//! - [`FileState`]: lifecycle stage, one directory per state
//! - [`BlobEntry`]: one blob and its sidecars on disk
//! - [`BlobMap`]: name index with per-entry reader-writer locks
//! - [`FileOp`]: accepted-state gated operations
//! - [`FileStore`]: plain, content-addressed and LRU-bounded variants

mod entry;
mod lru_map;
mod map;
mod op;
mod readwriter;
mod state;
mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use entry::{BlobEntry, PathLayout};
pub use lru_map::LruBlobMap;
pub use map::{BlobMap, LoadOrStore, SharedEntry, SimpleBlobMap};
pub use op::FileOp;
pub use readwriter::{FileReadWriter, FileReader};
pub use state::FileState;
pub use store::FileStore;
