//! Filesystem and file surface traits consumed by the image-mount layer.
//!
//! The registry filesystem is read-only: `open` and `stat` are the whole
//! usable surface, and every mutating operation has a default implementation
//! that fails with [`Error::Unsupported`].

use crate::error::{Error, Result};
use async_trait::async_trait;

/// Requested access mode for `open`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OpenMode {
    #[default]
    Read,
    Write,
    ReadWrite,
}

/// File kind reported by `stat`/`metadata`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Regular,
}

/// Stat result. Fields absent here (timestamps, ownership, links) are zero
/// on the wire and not represented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Metadata {
    pub size: u64,
    pub kind: FileKind,
    pub readonly: bool,
}

impl Metadata {
    /// Metadata for a read-only regular file of the given size.
    pub fn regular_readonly(size: u64) -> Self {
        Self {
            size,
            kind: FileKind::Regular,
            readonly: true,
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, FileKind::Regular)
    }
}

/// A random-access file handle.
#[async_trait]
pub trait File: Send + Sync {
    /// Size and mode of the file.
    async fn metadata(&self) -> Result<Metadata>;

    /// Read into a single buffer at `offset`. Returns the number of bytes
    /// read, which may be short; 0 at or past end of file.
    async fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Scatter read into `bufs` at `offset` (preadv).
    async fn read_vectored_at(&self, bufs: &mut [&mut [u8]], offset: u64) -> Result<usize>;

    /// Append-style write at `offset`. Only upload surfaces implement this.
    async fn write_at(&mut self, _buf: &[u8], _offset: u64) -> Result<usize> {
        Err(Error::Unsupported("write"))
    }

    /// Flush and finalize. A no-op for read-only files.
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A filesystem namespace addressed by blob URL.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Open a file. Write modes are rejected by read-only filesystems.
    async fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn File>>;

    /// Stat a path without keeping a file open.
    async fn stat(&self, path: &str) -> Result<Metadata>;

    async fn create(&self, _path: &str) -> Result<Box<dyn File>> {
        Err(Error::Unsupported("create"))
    }

    async fn remove(&self, _path: &str) -> Result<()> {
        Err(Error::Unsupported("remove"))
    }

    async fn rename(&self, _from: &str, _to: &str) -> Result<()> {
        Err(Error::Unsupported("rename"))
    }

    async fn read_dir(&self, _path: &str) -> Result<Vec<String>> {
        Err(Error::Unsupported("readdir"))
    }

    async fn symlink(&self, _target: &str, _link: &str) -> Result<()> {
        Err(Error::Unsupported("symlink"))
    }

    async fn read_link(&self, _path: &str) -> Result<String> {
        Err(Error::Unsupported("readlink"))
    }

    async fn truncate(&self, _path: &str, _len: u64) -> Result<()> {
        Err(Error::Unsupported("truncate"))
    }

    async fn set_times(&self, _path: &str) -> Result<()> {
        Err(Error::Unsupported("utimes"))
    }
}
