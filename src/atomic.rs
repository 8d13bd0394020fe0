//! All-or-nothing file writes
//!
//! Content is streamed into a sibling temporary file which is renamed over
//! the destination once complete. Readers of the destination see either the
//! old file or the new one, never a partial write.

use crate::error::{Result, SyncError};
use crate::fs::{RemoteFs, RemoteWriter};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

/// Size of each read from the content source
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Name of the temporary sibling used while writing `dest`
#[must_use]
pub fn temp_name(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(format!(".tmp.{}", rand::random::<u64>()));
    PathBuf::from(name)
}

async fn stream_into<W, R>(writer: &mut W, reader: &mut R) -> Result<u64>
where
    W: RemoteWriter,
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(total);
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
}

/// Write everything from `reader` to `dest` atomically
///
/// After the rename, `mode` (permission bits including setuid, setgid and
/// sticky) is applied if given. Returns the number of bytes written.
///
/// # Errors
///
/// Any failure up to and including the rename removes the temporary file and
/// leaves `dest` untouched. A chmod failure after the rename is reported as
/// [`SyncError::ModeNotApplied`]; the new content is in place regardless.
pub async fn write_atomic<F, R>(fs: &F, dest: &Path, reader: &mut R, mode: Option<u32>) -> Result<u64>
where
    F: RemoteFs,
    R: AsyncRead + Unpin + Send + ?Sized,
{
    let tmp = temp_name(dest);
    let mut writer = fs.create(&tmp).await?;

    let written = match stream_into(&mut writer, reader).await {
        Ok(n) => n,
        Err(e) => {
            if let Err(close_err) = writer.close().await {
                debug!("closing {} after failed write: {}", tmp.display(), close_err);
            }
            discard(fs, &tmp).await;
            return Err(e);
        }
    };

    if let Err(e) = writer.close().await {
        discard(fs, &tmp).await;
        return Err(e);
    }

    if let Err(e) = fs.rename(&tmp, dest).await {
        discard(fs, &tmp).await;
        return Err(e);
    }

    if let Some(mode) = mode {
        if let Err(e) = fs.chmod(dest, mode).await {
            return Err(SyncError::ModeNotApplied {
                path: dest.to_path_buf(),
                bytes: written,
                source: Box::new(e),
            });
        }
    }

    Ok(written)
}

async fn discard<F: RemoteFs>(fs: &F, tmp: &Path) {
    if let Err(e) = fs.remove(tmp).await {
        if !e.is_not_found() {
            warn!("could not remove temporary file {}: {}", tmp.display(), e);
        }
    }
}
