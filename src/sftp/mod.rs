//! SFTP backend
//!
//! [`SftpClient`] adapts a `russh_sftp` session to [`crate::fs::RemoteFs`].
//! The session runs over any `AsyncRead + AsyncWrite` stream; in production
//! that is the stdout/stdin pair of an `ssh -s sftp` child joined with
//! `tokio::io::join`.

mod client;
#[cfg(test)]
mod test_server;

pub use client::{SftpClient, SftpFileWriter};
