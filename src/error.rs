//! Error types for sftpsync
//!
//! A single error enum covers configuration, connection setup, the sftp
//! sub-protocol and per-path filesystem failures. Callers that only care
//! about "does this path exist" can use [`SyncError::is_not_found`].

use russh_sftp::protocol::StatusCode;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors produced by the import/export machinery
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid or ambiguous configuration, fatal at construction time
    #[error("configuration error: {0}")]
    Config(String),

    /// The shared ssh master could not be started or verified
    #[error("connection error: {0}")]
    Connection(String),

    /// A diagnostic line reported by the ssh client on stderr
    #[error("ssh command error: {0:?}")]
    Ssh(String),

    /// The private key could not be loaded into the agent
    #[error("failed to add key: {0}")]
    Agent(String),

    /// Status reply from the sftp server
    #[error("sftp error ({code}): {message}")]
    Sftp {
        /// Status code returned by the server
        code: StatusCode,
        /// Human readable message returned by the server
        message: String,
    },

    /// Session-level sftp failure: handshake, timeout or unexpected reply
    #[error("sftp protocol error: {0}")]
    Protocol(String),

    /// The sftp client only carries UTF-8 names
    #[error("path is not valid UTF-8 and cannot be sent over sftp: {}", .0.display())]
    NonUtf8Path(PathBuf),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Content was renamed into place but the final mode could not be applied
    #[error("could not chmod {}: {source}", .path.display())]
    ModeNotApplied {
        /// Destination path whose content is committed
        path: PathBuf,
        /// Number of bytes written before the chmod failure
        bytes: u64,
        /// Underlying chmod failure
        #[source]
        source: Box<SyncError>,
    },

    /// The operation was stopped by a cancellation request
    #[error("operation cancelled")]
    Cancelled,

    /// Per-path filesystem failure with context
    #[error("filesystem error: {0}")]
    FileSystem(String),
}

impl From<russh_sftp::client::error::Error> for SyncError {
    fn from(err: russh_sftp::client::error::Error) -> Self {
        match err {
            russh_sftp::client::error::Error::Status(status) => Self::Sftp {
                code: status.status_code,
                message: status.error_message,
            },
            other => Self::Protocol(other.to_string()),
        }
    }
}

impl SyncError {
    /// Check whether the error means "no such file or directory"
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            Self::Sftp { code, .. } => matches!(code, StatusCode::NoSuchFile),
            _ => false,
        }
    }

    /// Check whether the error means the target already exists
    ///
    /// SFTP v3 has no dedicated status for this, so a generic failure is
    /// treated as "maybe exists" and callers confirm with a stat.
    #[must_use]
    pub fn may_already_exist(&self) -> bool {
        match self {
            Self::Io(e) => e.kind() == std::io::ErrorKind::AlreadyExists,
            Self::Sftp { code, .. } => matches!(code, StatusCode::Failure),
            _ => false,
        }
    }

    /// Build a [`SyncError::FileSystem`] error with path context
    pub fn with_path(action: &str, path: &Path, err: impl std::fmt::Display) -> Self {
        Self::FileSystem(format!("{action} {}: {err}", path.display()))
    }
}
