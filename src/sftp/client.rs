//! `RemoteFs` adapter over `russh_sftp::client::SftpSession`

use crate::error::{Result, SyncError};
use crate::fs::{RemoteFs, RemoteWriter};
use crate::metadata::{base_name, FileInfo};
use crate::record::ContentReader;
use russh_sftp::client::fs::File;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, StatusCode};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Handle to one sftp session
///
/// Cloning is cheap and every clone shares the same session; the session
/// multiplexes concurrent requests over its one stream.
#[derive(Clone)]
pub struct SftpClient {
    session: Arc<SftpSession>,
}

impl std::fmt::Debug for SftpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpClient").finish_non_exhaustive()
    }
}

/// The sftp wire format carries names as strings
fn remote_path(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| SyncError::NonUtf8Path(path.to_path_buf()))
}

fn file_info(name: OsString, attrs: &FileAttributes) -> FileInfo {
    FileInfo {
        name,
        size: attrs.size.unwrap_or(0),
        mode: attrs.permissions.unwrap_or(0),
        uid: attrs.uid.unwrap_or(0),
        gid: attrs.gid.unwrap_or(0),
        mtime: attrs.mtime.map_or(0, u64::from),
        // SFTP v3 has no device, inode or link count
        dev: 0,
        ino: 0,
        nlink: 1,
    }
}

impl SftpClient {
    /// Negotiate a session over `stream`
    ///
    /// # Errors
    ///
    /// Returns an error if the stream closes before the server answers the
    /// version exchange.
    pub async fn new<S>(stream: S) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session = SftpSession::new(stream).await?;
        debug!("sftp session negotiated");
        Ok(Self {
            session: Arc::new(session),
        })
    }
}

/// Writer for a file created over sftp
pub struct SftpFileWriter {
    file: File,
}

impl std::fmt::Debug for SftpFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpFileWriter").finish_non_exhaustive()
    }
}

impl RemoteWriter for SftpFileWriter {
    async fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.file.write_all(buf).await?;
        Ok(())
    }

    async fn close(mut self) -> Result<()> {
        // Shutdown flushes pending writes and sends CLOSE for the handle
        self.file.shutdown().await?;
        Ok(())
    }
}

impl RemoteFs for SftpClient {
    type Writer = SftpFileWriter;

    fn name(&self) -> &'static str {
        "sftp"
    }

    async fn lstat(&self, path: &Path) -> Result<FileInfo> {
        let attrs = self.session.symlink_metadata(remote_path(path)?).await?;
        Ok(file_info(base_name(path).to_os_string(), &attrs))
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<FileInfo>> {
        let entries = self.session.read_dir(remote_path(path)?).await?;
        Ok(entries
            .filter(|entry| entry.file_name() != "." && entry.file_name() != "..")
            .map(|entry| file_info(entry.file_name().into(), &entry.metadata()))
            .collect())
    }

    async fn read_link(&self, path: &Path) -> Result<PathBuf> {
        let target = self.session.read_link(remote_path(path)?).await?;
        Ok(PathBuf::from(target))
    }

    async fn open(&self, path: &Path) -> Result<ContentReader> {
        let file = self.session.open(remote_path(path)?).await?;
        Ok(Box::new(file))
    }

    async fn create(&self, path: &Path) -> Result<SftpFileWriter> {
        let file = self.session.create(remote_path(path)?).await?;
        Ok(SftpFileWriter { file })
    }

    async fn mkdir(&self, path: &Path) -> Result<()> {
        self.session.create_dir(remote_path(path)?).await?;
        Ok(())
    }

    async fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        // OpenSSH reads SYMLINK arguments in reverse of the draft: target first
        self.session
            .symlink(remote_path(target)?, remote_path(link)?)
            .await?;
        Ok(())
    }

    async fn hard_link(&self, existing: &Path, link: &Path) -> Result<()> {
        let supported = self
            .session
            .hardlink(remote_path(existing)?, remote_path(link)?)
            .await?;
        if supported {
            Ok(())
        } else {
            Err(SyncError::Sftp {
                code: StatusCode::OpUnsupported,
                message: "server does not support hardlink@openssh.com".to_string(),
            })
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let (from, to) = (remote_path(from)?, remote_path(to)?);
        let err = match self.session.rename(from, to).await {
            Ok(()) => return Ok(()),
            Err(err) => SyncError::from(err),
        };
        // Plain v3 RENAME refuses to replace an existing destination
        if !err.may_already_exist() || self.session.symlink_metadata(to).await.is_err() {
            return Err(err);
        }
        trace!("replacing existing {} by remove and rename", to);
        self.session.remove_file(to).await?;
        self.session.rename(from, to).await?;
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        self.session.remove_file(remote_path(path)?).await?;
        Ok(())
    }

    async fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        let attrs = FileAttributes {
            permissions: Some(mode),
            ..FileAttributes::empty()
        };
        self.session.set_metadata(remote_path(path)?, attrs).await?;
        Ok(())
    }

    async fn device_id(&self, path: &Path) -> Result<Option<u64>> {
        let info = self.session.fs_info(remote_path(path)?).await?;
        Ok(info.map(|statvfs| statvfs.fs_id))
    }
}
