//! Filesystem abstraction shared by the importer and the exporter
//!
//! The walker and the write pipeline only need a small set of path-based
//! operations. They are expressed as the [`RemoteFs`] trait so the same
//! code drives an sftp session ([`crate::sftp::SftpClient`]) or a local
//! directory tree ([`LocalFs`]).
//!
//! Paths are absolute on the side they refer to and are carried as raw
//! bytes; a backend that cannot represent a name reports an error for that
//! path instead of altering it.

mod backend;
mod local;

pub use backend::{Backend, BackendWriter};
pub use local::{LocalFs, LocalWriter};

use crate::error::Result;
use crate::metadata::FileInfo;
use crate::record::ContentReader;
use std::future::Future;
use std::path::{Path, PathBuf};

/// Path-based filesystem operations used by import and export
pub trait RemoteFs: Send + Sync + 'static {
    /// Writable file handle returned by [`RemoteFs::create`]
    type Writer: RemoteWriter;

    /// Short backend name used in logs and `type_name()`
    fn name(&self) -> &'static str;

    /// Stat a path without following a final symlink
    fn lstat(&self, path: &Path) -> impl Future<Output = Result<FileInfo>> + Send;

    /// List a directory, excluding `.` and `..`
    fn read_dir(&self, path: &Path) -> impl Future<Output = Result<Vec<FileInfo>>> + Send;

    /// Read the target of a symlink
    fn read_link(&self, path: &Path) -> impl Future<Output = Result<PathBuf>> + Send;

    /// Open a file for sequential reading
    fn open(&self, path: &Path) -> impl Future<Output = Result<ContentReader>> + Send;

    /// Create (or truncate) a file for writing
    fn create(&self, path: &Path) -> impl Future<Output = Result<Self::Writer>> + Send;

    /// Create a single directory
    fn mkdir(&self, path: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Create a symlink at `link` pointing to `target`
    fn symlink(&self, target: &Path, link: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Create a hard link at `link` referring to `existing`
    fn hard_link(&self, existing: &Path, link: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Rename `from` over `to`, replacing `to` if it exists
    fn rename(&self, from: &Path, to: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Remove a file
    fn remove(&self, path: &Path) -> impl Future<Output = Result<()>> + Send;

    /// Set permission bits (including setuid/setgid/sticky)
    fn chmod(&self, path: &Path, mode: u32) -> impl Future<Output = Result<()>> + Send;

    /// Identifier of the filesystem holding `path`, if the backend knows it
    fn device_id(&self, path: &Path) -> impl Future<Output = Result<Option<u64>>> + Send;
}

/// Sequential writer for a file created through [`RemoteFs::create`]
pub trait RemoteWriter: Send + 'static {
    /// Write the whole buffer at the current offset
    fn write_all(&mut self, buf: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Flush and close the file
    fn close(self) -> impl Future<Output = Result<()>> + Send;
}
