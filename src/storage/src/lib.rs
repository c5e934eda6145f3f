//! Kiln Storage - Local File Store
//!
//! Concurrency-safe storage for the blobs an image build produces and
//! consumes: layer tarballs, manifests and their sidecar metadata.
//!
//! Blobs move through lifecycle states, each backed by a directory (for
//! example `layer_tar/download` then `layer_tar/cache`). Callers open a
//! [`FileOp`] on a [`FileStore`], declare which states they accept, and
//! issue a single create, move, read, write, link, delete or metadata call.

pub mod base;
pub mod clock;
pub mod error;
pub mod image;
pub mod layer_tar;
pub mod manifest;
pub mod metadata;

pub use base::{
    BlobEntry, BlobMap, FileOp, FileReadWriter, FileReader, FileState, FileStore, LoadOrStore,
    LruBlobMap, PathLayout, SimpleBlobMap,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{Result, StoreError};
pub use image::{cleanup_sandbox, ImageStore};
pub use layer_tar::LayerTarStore;
pub use manifest::{decode_repo_tag, encode_repo_tag, ManifestStore};
pub use metadata::{LastAccessTime, Metadata, MetadataFactory, Persist};
