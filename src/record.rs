//! Records and results exchanged between importer and exporter
//!
//! The importer emits one [`Record`] per discovered entry; the exporter
//! answers every record with exactly one [`RecordResult`]. Content is never
//! read during discovery: a record only carries an opener that the consumer
//! invokes when it actually needs the bytes.

use crate::error::{Result, SyncError};
use crate::metadata::FileInfo;
use futures::future::BoxFuture;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Readable content stream for a record
pub type ContentReader = Box<dyn AsyncRead + Send + Unpin>;

/// Lazy accessor producing a fresh content stream on every call
pub type ContentOpener = Arc<dyn Fn() -> BoxFuture<'static, Result<ContentReader>> + Send + Sync>;

/// One discovered filesystem entry
#[derive(Clone)]
pub struct Record {
    /// Absolute path on the source side
    pub pathname: PathBuf,
    /// Symlink target, empty for anything that is not a symlink
    pub target: PathBuf,
    /// Entry metadata
    pub info: FileInfo,
    /// Discovery error for this path, if any
    pub error: Option<Arc<SyncError>>,
    /// Whether this record describes an extended attribute instead of a file
    pub is_xattr: bool,
    opener: Option<ContentOpener>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("pathname", &self.pathname)
            .field("target", &self.target)
            .field("info", &self.info)
            .field("error", &self.error)
            .field("is_xattr", &self.is_xattr)
            .finish_non_exhaustive() // Omitting the content opener
    }
}

impl Record {
    /// Create a record for a discovered entry
    #[must_use]
    pub fn new(
        pathname: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        info: FileInfo,
        opener: Option<ContentOpener>,
    ) -> Self {
        Self {
            pathname: pathname.into(),
            target: target.into(),
            info,
            error: None,
            is_xattr: false,
            opener,
        }
    }

    /// Create an error record for a path that could not be processed
    #[must_use]
    pub fn error(pathname: impl Into<PathBuf>, err: SyncError) -> Self {
        let pathname = pathname.into();
        Self {
            info: FileInfo {
                name: crate::metadata::base_name(&pathname).to_os_string(),
                ..FileInfo::default()
            },
            pathname,
            target: PathBuf::new(),
            error: Some(Arc::new(err)),
            is_xattr: false,
            opener: None,
        }
    }

    /// Check whether the record carries a content opener
    #[must_use]
    pub fn has_content(&self) -> bool {
        self.opener.is_some()
    }

    /// Open the record's content
    ///
    /// # Errors
    ///
    /// Returns an error if the record has no content accessor or if opening
    /// the underlying file fails.
    pub async fn open(&self) -> Result<ContentReader> {
        match &self.opener {
            Some(opener) => opener().await,
            None => Err(SyncError::with_path(
                "no content available for",
                &self.pathname,
                "not a regular file",
            )),
        }
    }

    /// Build a successful result for this record
    #[must_use]
    pub fn ok(&self) -> RecordResult {
        RecordResult {
            pathname: self.pathname.clone(),
            error: None,
        }
    }

    /// Build a failed result for this record
    #[must_use]
    pub fn failed(&self, err: impl Into<Arc<SyncError>>) -> RecordResult {
        RecordResult {
            pathname: self.pathname.clone(),
            error: Some(err.into()),
        }
    }
}

/// Terminal outcome for one record
#[derive(Debug, Clone)]
pub struct RecordResult {
    /// Path of the record this result answers
    pub pathname: PathBuf,
    /// Failure, `None` on success
    pub error: Option<Arc<SyncError>>,
}

impl RecordResult {
    /// Check if the record was handled successfully
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
