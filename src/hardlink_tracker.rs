//! Hardlink tracking for race-free hardlink materialization
//!
//! Files sharing a (device, inode) pair must end up as one piece of content
//! with several names. [`HardlinkTracker`] keeps a promise per key:
//! - The first task to ask for a key becomes the leader and runs the write
//! - Every other task for that key, concurrent or later, awaits the same
//!   promise and gets the leader's destination back without writing
//! - Followers whose own destination differs then create a hardlink to it
//!
//! The promise also caches failures, so a key whose content could not be
//! written is never retried by a follower.

use crate::error::{Result, SyncError};
use crate::metadata::FileInfo;
use dashmap::DashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

/// Identity of a hardlink group
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct HardlinkKey {
    /// Device ID
    pub dev: u64,
    /// Inode number
    pub ino: u64,
}

impl HardlinkKey {
    /// Key for a record that should be deduplicated
    ///
    /// Returns `None` for anything but a regular file with more than one
    /// link, and for sources that do not report inode numbers.
    #[must_use]
    pub const fn of(info: &FileInfo) -> Option<Self> {
        if info.is_hardlink_candidate() && info.ino != 0 {
            Some(Self {
                dev: info.dev,
                ino: info.ino,
            })
        } else {
            None
        }
    }
}

impl fmt::Display for HardlinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

/// Outcome published for a key: the canonical path, or why there is none
pub type Canonical = std::result::Result<PathBuf, String>;

/// What a caller of [`HardlinkTracker::resolve`] has to do next
#[derive(Debug)]
pub enum Resolution {
    /// This caller ran the write; its own result
    Leader(Result<u64>),
    /// Another caller ran the write; what it published
    Follower(Canonical),
}

/// Statistics about hardlink tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HardlinkStats {
    /// Number of distinct keys seen
    pub groups: usize,
    /// Number of writes executed (one per key)
    pub writes: u64,
    /// Number of callers that reused another caller's write
    pub followers: u64,
}

/// Promise cache from hardlink key to canonical destination
#[derive(Debug, Default)]
pub struct HardlinkTracker {
    entries: DashMap<HardlinkKey, Arc<OnceCell<Canonical>>>,
    writes: AtomicU64,
    followers: AtomicU64,
}

impl HardlinkTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, key: HardlinkKey) -> Arc<OnceCell<Canonical>> {
        Arc::clone(self.entries.entry(key).or_default().value())
    }

    /// Run `write` for the first caller of `key`, share its outcome with the rest
    ///
    /// The leader publishes `dest` as canonical when the content was
    /// committed, which includes a write whose only failure was applying the
    /// final mode.
    pub async fn resolve<F, Fut>(&self, key: HardlinkKey, dest: &Path, write: F) -> Resolution
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64>>,
    {
        let cell = self.cell(key);
        let mut own: Option<Result<u64>> = None;
        let slot = &mut own;
        let writes = &self.writes;

        let canonical = cell
            .get_or_init(move || async move {
                writes.fetch_add(1, Ordering::Relaxed);
                let result = write().await;
                let canonical = match &result {
                    Ok(_) | Err(SyncError::ModeNotApplied { .. }) => Ok(dest.to_path_buf()),
                    Err(e) => Err(e.to_string()),
                };
                *slot = Some(result);
                canonical
            })
            .await
            .clone();

        match own {
            Some(result) => {
                debug!("hardlink group {} materialized at {}", key, dest.display());
                Resolution::Leader(result)
            }
            None => {
                self.followers.fetch_add(1, Ordering::Relaxed);
                Resolution::Follower(canonical)
            }
        }
    }

    /// Canonical outcome for a key, if it has been published
    #[must_use]
    pub fn canonical(&self, key: &HardlinkKey) -> Option<Canonical> {
        self.entries
            .get(key)
            .and_then(|cell| cell.value().get().cloned())
    }

    /// Snapshot of the tracking counters
    #[must_use]
    pub fn stats(&self) -> HardlinkStats {
        HardlinkStats {
            groups: self.entries.len(),
            writes: self.writes.load(Ordering::Relaxed),
            followers: self.followers.load(Ordering::Relaxed),
        }
    }
}
