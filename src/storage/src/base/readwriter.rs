//! Scoped handles over a blob's backing file.
//!
//! A handle stays valid after the entry lock is released, so a concurrent
//! move or delete of the same name is not blocked by an open handle.
//! Callers should `close` handles explicitly on every path; `close` on a
//! read-writer flushes data to disk.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Read access to a blob.
#[derive(Debug)]
pub struct FileReader {
    file: File,
    path: PathBuf,
}

impl FileReader {
    pub(crate) fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
            path: path.to_path_buf(),
        })
    }

    /// Path the handle was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the underlying file.
    pub fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Read into `buf` starting at `offset` without moving the cursor.
    #[cfg(unix)]
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(&self.file, buf, offset)
    }

    pub fn close(self) -> io::Result<()> {
        drop(self.file);
        Ok(())
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

/// Read/write access to a blob.
#[derive(Debug)]
pub struct FileReadWriter {
    file: File,
    path: PathBuf,
}

impl FileReadWriter {
    pub(crate) fn open(path: &Path) -> io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    #[cfg(unix)]
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(&self.file, buf, offset)
    }

    /// Write `buf` at `offset` without moving the cursor.
    #[cfg(unix)]
    pub fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(&self.file, buf, offset)
    }

    /// Flush written data to disk and release the handle.
    pub fn close(self) -> io::Result<()> {
        self.file.sync_all()
    }
}

impl Read for FileReadWriter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for FileReadWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for FileReadWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}
