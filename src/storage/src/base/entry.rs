//! One named blob on disk: its backing file and metadata sidecars.
//!
//! Methods here touch the filesystem directly and assume the caller holds
//! the entry's lock in the blob map.

use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::readwriter::{FileReadWriter, FileReader};
use super::state::FileState;
use crate::error::{Result, StoreError};
use crate::metadata::{self, Metadata};

/// How a blob name maps to a path below its state directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathLayout {
    /// `<state>/<name>`
    Flat,
    /// `<state>/<n[0..2]>/<n[2..4]>/.../<name>`, one directory level per
    /// shard. Names are expected to be hex digests.
    Sharded { levels: usize },
}

impl PathLayout {
    pub const DEFAULT_SHARD_LEVELS: usize = 2;

    /// Check that `name` maps to a single file inside a state directory.
    pub fn validate(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(StoreError::invalid_name(name, "empty name"));
        }
        if name == "." || name == ".." {
            return Err(StoreError::invalid_name(name, "reserved path component"));
        }
        if name.contains('/') || name.contains('\0') {
            return Err(StoreError::invalid_name(
                name,
                "contains a path separator or NUL byte",
            ));
        }
        // A name ending in a metadata suffix would read as another blob's sidecar.
        if let Some(i) = sidecar_split(name) {
            return Err(StoreError::invalid_name(
                name,
                format!("ends in metadata suffix '{}'", &name[i..]),
            ));
        }
        if let PathLayout::Sharded { levels } = self {
            if !name.is_ascii() || name.len() < levels * 2 {
                return Err(StoreError::invalid_name(
                    name,
                    format!("needs at least {} ASCII characters to shard", levels * 2),
                ));
            }
        }
        Ok(())
    }

    /// Path of `name` relative to its state directory.
    pub fn relative_path(&self, name: &str) -> PathBuf {
        let mut path = PathBuf::new();
        if let PathLayout::Sharded { levels } = self {
            for i in 0..*levels {
                if let Some(shard) = name.get(i * 2..i * 2 + 2) {
                    path.push(shard);
                }
            }
        }
        path.push(name);
        path
    }
}

/// Byte offset at which `name` splits into a non-empty prefix and a
/// registered metadata suffix, if any.
pub(crate) fn sidecar_split(name: &str) -> Option<usize> {
    name.char_indices()
        .skip(1)
        .map(|(i, _)| i)
        .find(|&i| metadata::create_from_suffix(&name[i..]).is_some())
}

/// In-memory representative of one blob.
///
/// `state` always names the directory the backing file currently lives
/// in; it is only meaningful while the entry lock is held.
#[derive(Debug)]
pub struct BlobEntry {
    name: String,
    state: FileState,
    layout: PathLayout,
}

impl BlobEntry {
    pub fn new(name: impl Into<String>, state: FileState, layout: PathLayout) -> Self {
        Self {
            name: name.into(),
            state,
            layout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &FileState {
        &self.state
    }

    /// Current location of the backing file.
    pub fn path(&self) -> PathBuf {
        self.path_in(&self.state)
    }

    fn path_in(&self, state: &FileState) -> PathBuf {
        state.directory().join(self.layout.relative_path(&self.name))
    }

    fn sidecar_path(&self, state: &FileState, suffix: &str) -> PathBuf {
        let mut path: OsString = self.path_in(state).into_os_string();
        path.push(suffix);
        PathBuf::from(path)
    }

    /// Sidecars of this blob in its current state, recognized through the
    /// metadata registry.
    fn sidecars(&self) -> Result<Vec<(PathBuf, Box<dyn Metadata>)>> {
        let path = self.path();
        let Some(dir) = path.parent() else {
            return Ok(Vec::new());
        };
        let read_dir = match fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sidecars = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(suffix) = file_name.strip_prefix(self.name.as_str()) else {
                continue;
            };
            if let Some(md) = metadata::create_from_suffix(suffix) {
                sidecars.push((dir_entry.path(), md));
            }
        }
        Ok(sidecars)
    }

    /// Confirm the blob exists in the state this entry was built with.
    pub fn reload(&self) -> Result<()> {
        let path = self.path();
        match fs::metadata(&path) {
            Ok(info) if info.is_file() => Ok(()),
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} is not a regular file", path.display()),
            )
            .into()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::not_found(&self.name)),
            Err(e) => Err(e.into()),
        }
    }

    /// Allocate an empty backing file of `len` bytes in `state`.
    pub fn create(&mut self, state: &FileState, len: u64) -> Result<()> {
        let path = self.path_in(state);
        ensure_parent(&path)?;

        let file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::already_exists(&self.name))
            }
            Err(e) => return Err(e.into()),
        };
        if len > 0 {
            if let Err(e) = file.set_len(len) {
                drop(file);
                let _ = fs::remove_file(&path);
                return Err(e.into());
            }
        }

        self.state = state.clone();
        tracing::debug!(name = %self.name, state = %state, len, "Created file");
        Ok(())
    }

    /// Take ownership of an unmanaged file, placing it in `state`.
    pub fn move_from(&mut self, state: &FileState, source: &Path) -> Result<()> {
        let path = self.path_in(state);
        if path.symlink_metadata().is_ok() {
            return Err(StoreError::already_exists(&self.name));
        }
        ensure_parent(&path)?;
        rename_or_copy(source, &path)?;

        self.state = state.clone();
        tracing::debug!(
            name = %self.name,
            state = %state,
            source = %source.display(),
            "Moved file into store"
        );
        Ok(())
    }

    /// Rename the blob into `target`'s directory. Movable sidecars follow
    /// it; the rest are removed.
    pub fn move_to(&mut self, target: &FileState) -> Result<()> {
        let from = self.path();
        let to = self.path_in(target);
        if to.symlink_metadata().is_ok() {
            return Err(StoreError::already_exists(&self.name));
        }

        let sidecars = self.sidecars()?;
        ensure_parent(&to)?;
        rename_or_copy(&from, &to)?;
        let source = std::mem::replace(&mut self.state, target.clone());

        for (path, md) in sidecars {
            if md.movable() {
                rename_or_copy(&path, &self.sidecar_path(target, md.suffix()))?;
            } else {
                remove_if_exists(&path)?;
            }
        }

        tracing::debug!(name = %self.name, from = %source, to = %target, "Moved file");
        Ok(())
    }

    /// Hard link the blob to an unmanaged path.
    pub fn link_to(&self, target: &Path) -> Result<()> {
        fs::hard_link(self.path(), target)?;
        tracing::debug!(name = %self.name, target = %target.display(), "Linked file");
        Ok(())
    }

    /// Remove the backing file and every sidecar.
    pub fn delete(&self) -> Result<()> {
        let sidecars = self.sidecars()?;
        remove_if_exists(&self.path())?;
        for (path, _) in sidecars {
            remove_if_exists(&path)?;
        }
        tracing::debug!(name = %self.name, state = %self.state, "Deleted file");
        Ok(())
    }

    pub fn stat(&self) -> Result<fs::Metadata> {
        fs::metadata(self.path()).map_err(|e| self.map_not_found(e))
    }

    pub fn reader(&self) -> Result<FileReader> {
        FileReader::open(&self.path()).map_err(|e| self.map_not_found(e))
    }

    pub fn read_writer(&self) -> Result<FileReadWriter> {
        FileReadWriter::open(&self.path()).map_err(|e| self.map_not_found(e))
    }

    /// Load the sidecar for `md`'s suffix into `md`.
    pub fn get_metadata(&self, md: &mut dyn Metadata) -> Result<()> {
        let path = self.sidecar_path(&self.state, md.suffix());
        let bytes = fs::read(&path).map_err(|e| self.map_metadata_not_found(e, md.suffix()))?;
        md.deserialize(&bytes)
    }

    /// Write `md` to its sidecar. Returns false when the stored bytes were
    /// already identical.
    pub fn set_metadata(&self, md: &dyn Metadata) -> Result<bool> {
        let bytes = md.serialize()?;
        let path = self.sidecar_path(&self.state, md.suffix());
        match fs::read(&path) {
            Ok(existing) if existing == bytes => return Ok(false),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        write_atomic(&path, &bytes)?;
        Ok(true)
    }

    /// Overwrite part of an existing sidecar starting at `offset`.
    pub fn set_metadata_at(&self, md: &dyn Metadata, bytes: &[u8], offset: u64) -> Result<bool> {
        let path = self.sidecar_path(&self.state, md.suffix());
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| self.map_metadata_not_found(e, md.suffix()))?;

        let mut current = Vec::with_capacity(bytes.len());
        file.seek(SeekFrom::Start(offset))?;
        (&mut file)
            .take(bytes.len() as u64)
            .read_to_end(&mut current)?;
        if current == bytes {
            return Ok(false);
        }

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(true)
    }

    /// Load `md` if its sidecar exists, otherwise persist `md` as given.
    pub fn get_or_set_metadata(&self, md: &mut dyn Metadata) -> Result<()> {
        match self.get_metadata(md) {
            Err(StoreError::MetadataNotFound { .. }) => {
                let bytes = md.serialize()?;
                write_atomic(&self.sidecar_path(&self.state, md.suffix()), &bytes)?;
                Ok(())
            }
            other => other,
        }
    }

    pub fn delete_metadata(&self, md: &dyn Metadata) -> Result<()> {
        fs::remove_file(self.sidecar_path(&self.state, md.suffix()))
            .map_err(|e| self.map_metadata_not_found(e, md.suffix()))
    }

    fn map_not_found(&self, e: io::Error) -> StoreError {
        if e.kind() == io::ErrorKind::NotFound {
            StoreError::not_found(&self.name)
        } else {
            e.into()
        }
    }

    fn map_metadata_not_found(&self, e: io::Error, suffix: &str) -> StoreError {
        if e.kind() == io::ErrorKind::NotFound {
            StoreError::MetadataNotFound {
                name: self.name.clone(),
                suffix: suffix.to_string(),
            }
        } else {
            e.into()
        }
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent),
        None => Ok(()),
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Write via a temp file in the same directory, then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Rename, falling back to copy + remove when `from` and `to` live on
/// different filesystems. The copy lands under a temp name first and never
/// replaces an existing destination.
fn rename_or_copy(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Err(e) if is_cross_device(&e) => copy_then_remove(from, to),
        other => other,
    }
}

fn copy_then_remove(from: &Path, to: &Path) -> io::Result<()> {
    let dir = to.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    io::copy(&mut fs::File::open(from)?, &mut tmp)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(to).map_err(|e| e.error)?;
    fs::remove_file(from)
}

#[cfg(unix)]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}
