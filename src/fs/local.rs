//! Local filesystem backend
//!
//! Implements [`RemoteFs`] on top of `tokio::fs` so that `file://`
//! locations can act as either side of a transfer. Unlike sftp, the local
//! backend reports real device, inode and link-count values, which is what
//! makes hardlink deduplication observable.

use super::{RemoteFs, RemoteWriter};
use crate::error::Result;
use crate::metadata::FileInfo;
use crate::record::ContentReader;
use std::ffi::OsStr;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// `RemoteFs` implementation for the local machine
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl LocalFs {
    /// Create a new local backend
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn file_info(name: &OsStr, metadata: &std::fs::Metadata) -> FileInfo {
    FileInfo {
        name: name.to_os_string(),
        size: metadata.size(),
        mode: metadata.mode(),
        uid: metadata.uid(),
        gid: metadata.gid(),
        mtime: u64::try_from(metadata.mtime()).unwrap_or(0),
        dev: metadata.dev(),
        ino: metadata.ino(),
        nlink: metadata.nlink(),
    }
}

/// Writer half of a locally created file
#[derive(Debug)]
pub struct LocalWriter {
    file: tokio::fs::File,
}

impl RemoteWriter for LocalWriter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf).await?;
        Ok(())
    }

    async fn close(mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

impl RemoteFs for LocalFs {
    type Writer = LocalWriter;

    fn name(&self) -> &'static str {
        "fs"
    }

    async fn lstat(&self, path: &Path) -> Result<FileInfo> {
        let metadata = tokio::fs::symlink_metadata(path).await?;
        Ok(file_info(crate::metadata::base_name(path), &metadata))
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<FileInfo>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            // DirEntry::metadata does not follow symlinks
            let metadata = entry.metadata().await?;
            entries.push(file_info(&entry.file_name(), &metadata));
        }
        Ok(entries)
    }

    async fn read_link(&self, path: &Path) -> Result<PathBuf> {
        Ok(tokio::fs::read_link(path).await?)
    }

    async fn open(&self, path: &Path) -> Result<ContentReader> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Box::new(file))
    }

    async fn create(&self, path: &Path) -> Result<LocalWriter> {
        let file = tokio::fs::File::create(path).await?;
        Ok(LocalWriter { file })
    }

    async fn mkdir(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir(path).await?;
        Ok(())
    }

    async fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        tokio::fs::symlink(target, link).await?;
        Ok(())
    }

    async fn hard_link(&self, existing: &Path, link: &Path) -> Result<()> {
        tokio::fs::hard_link(existing, link).await?;
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
        Ok(())
    }

    async fn device_id(&self, path: &Path) -> Result<Option<u64>> {
        let metadata = tokio::fs::symlink_metadata(path).await?;
        Ok(Some(metadata.dev()))
    }
}
