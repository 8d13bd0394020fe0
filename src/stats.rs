//! Statistics tracking for export operations
//!
//! This module provides lock-free atomic statistics tracking using `SharedStats`.
//! Statistics can be safely shared across pipeline workers without requiring mutexes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters gathered while exporting a record stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    /// Regular files written with content
    pub files: u64,
    /// Bytes of file content written
    pub bytes: u64,
    /// Directories created (or found already present)
    pub directories: u64,
    /// Symlinks created
    pub symlinks: u64,
    /// Files materialized as hardlinks to an earlier copy
    pub hardlinks: u64,
    /// Records answered with an error, plus failed directory mode updates
    pub errors: u64,
}

impl fmt::Display for ExportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files ({} bytes), {} directories, {} symlinks, {} hardlinks, {} errors",
            self.files, self.bytes, self.directories, self.symlinks, self.hardlinks, self.errors
        )
    }
}

/// Statistics tracking with interior mutability via atomics
///
/// Wrap in `Arc<SharedStats>` to share across tasks. Counters use
/// `Ordering::Relaxed`; they are only read once all workers have finished.
#[derive(Debug, Default)]
pub struct SharedStats {
    files: AtomicU64,
    bytes: AtomicU64,
    directories: AtomicU64,
    symlinks: AtomicU64,
    hardlinks: AtomicU64,
    errors: AtomicU64,
}

impl SharedStats {
    /// Create zeroed counters
    #[must_use]
    pub const fn new() -> Self {
        Self {
            files: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            directories: AtomicU64::new(0),
            symlinks: AtomicU64::new(0),
            hardlinks: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Record one written file of `bytes` bytes
    pub fn add_file(&self, bytes: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_directory(&self) {
        self.directories.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_symlink(&self) {
        self.symlinks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_hardlink(&self) {
        self.hardlinks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Current number of errors
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Snapshot all counters
    #[must_use]
    pub fn snapshot(&self) -> ExportStats {
        ExportStats {
            files: self.files.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            directories: self.directories.load(Ordering::Relaxed),
            symlinks: self.symlinks.load(Ordering::Relaxed),
            hardlinks: self.hardlinks.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
