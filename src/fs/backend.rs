//! Backend selected from a location's scheme

use super::{LocalFs, LocalWriter, RemoteFs, RemoteWriter};
use crate::config::{ConnectionParams, Endpoint, Scheme};
use crate::error::Result;
use crate::metadata::FileInfo;
use crate::record::ContentReader;
use crate::sftp::{SftpClient, SftpFileWriter};
use std::path::{Path, PathBuf};
use crate::ssh;

/// Either an sftp session or the local filesystem
#[derive(Debug, Clone)]
pub enum Backend {
    Sftp(SftpClient),
    Local(LocalFs),
}

impl Backend {
    /// Open the backend an endpoint refers to
    ///
    /// `sftp://` locations connect through the shared ssh master;
    /// `file://` locations need no connection.
    ///
    /// # Errors
    ///
    /// Returns any configuration or connection error from
    /// [`ssh::connect`].
    pub async fn connect(endpoint: &Endpoint, params: &ConnectionParams) -> Result<Self> {
        match endpoint.scheme {
            Scheme::Sftp => Ok(Self::Sftp(ssh::connect(endpoint, params).await?)),
            Scheme::File => Ok(Self::Local(LocalFs::new())),
        }
    }
}

/// Writer for whichever backend created the file
#[derive(Debug)]
pub enum BackendWriter {
    Sftp(SftpFileWriter),
    Local(LocalWriter),
}

impl RemoteWriter for BackendWriter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self {
            Self::Sftp(w) => w.write_all(buf).await,
            Self::Local(w) => w.write_all(buf).await,
        }
    }

    async fn close(self) -> Result<()> {
        match self {
            Self::Sftp(w) => w.close().await,
            Self::Local(w) => w.close().await,
        }
    }
}

impl RemoteFs for Backend {
    type Writer = BackendWriter;

    fn name(&self) -> &'static str {
        match self {
            Self::Sftp(fs) => fs.name(),
            Self::Local(fs) => fs.name(),
        }
    }

    async fn lstat(&self, path: &Path) -> Result<FileInfo> {
        match self {
            Self::Sftp(fs) => RemoteFs::lstat(fs, path).await,
            Self::Local(fs) => fs.lstat(path).await,
        }
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<FileInfo>> {
        match self {
            Self::Sftp(fs) => RemoteFs::read_dir(fs, path).await,
            Self::Local(fs) => fs.read_dir(path).await,
        }
    }

    async fn read_link(&self, path: &Path) -> Result<PathBuf> {
        match self {
            Self::Sftp(fs) => RemoteFs::read_link(fs, path).await,
            Self::Local(fs) => fs.read_link(path).await,
        }
    }

    async fn open(&self, path: &Path) -> Result<ContentReader> {
        match self {
            Self::Sftp(fs) => RemoteFs::open(fs, path).await,
            Self::Local(fs) => fs.open(path).await,
        }
    }

    async fn create(&self, path: &Path) -> Result<BackendWriter> {
        match self {
            Self::Sftp(fs) => RemoteFs::create(fs, path).await.map(BackendWriter::Sftp),
            Self::Local(fs) => fs.create(path).await.map(BackendWriter::Local),
        }
    }

    async fn mkdir(&self, path: &Path) -> Result<()> {
        match self {
            Self::Sftp(fs) => RemoteFs::mkdir(fs, path).await,
            Self::Local(fs) => fs.mkdir(path).await,
        }
    }

    async fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        match self {
            Self::Sftp(fs) => RemoteFs::symlink(fs, target, link).await,
            Self::Local(fs) => fs.symlink(target, link).await,
        }
    }

    async fn hard_link(&self, existing: &Path, link: &Path) -> Result<()> {
        match self {
            Self::Sftp(fs) => RemoteFs::hard_link(fs, existing, link).await,
            Self::Local(fs) => fs.hard_link(existing, link).await,
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        match self {
            Self::Sftp(fs) => RemoteFs::rename(fs, from, to).await,
            Self::Local(fs) => fs.rename(from, to).await,
        }
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        match self {
            Self::Sftp(fs) => RemoteFs::remove(fs, path).await,
            Self::Local(fs) => fs.remove(path).await,
        }
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        match self {
            Self::Sftp(fs) => RemoteFs::chmod(fs, path, mode).await,
            Self::Local(fs) => fs.chmod(path, mode).await,
        }
    }

    async fn device_id(&self, path: &Path) -> Result<Option<u64>> {
        match self {
            Self::Sftp(fs) => fs.device_id(path).await,
            Self::Local(fs) => fs.device_id(path).await,
        }
    }
}
