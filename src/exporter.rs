//! Write pipeline materializing a record stream
//!
//! An [`Exporter`] consumes [`Record`]s and recreates them under its root on
//! any [`RemoteFs`], answering every record with exactly one
//! [`RecordResult`].
//!
//! # Ordering
//!
//! - Directories are created inline by the dispatch loop, so they exist
//!   before any later record can be placed inside them
//! - Files and symlinks run on a bounded pool in no particular order
//! - Directory modes are applied last, deepest-created first, so a
//!   read-only directory never blocks writes beneath it
//!
//! # Hardlinks
//!
//! Regular files with a link count above one are keyed by (device, inode).
//! The first record for a key writes the content; every other record for
//! the key becomes a hardlink to that first destination.

use crate::atomic::write_atomic;
use crate::config::{endpoint_from_config, ConfigMap, ConnectionParams, Endpoint, ExportOptions};
use crate::error::{Result, SyncError};
use crate::fs::{Backend, RemoteFs};
use crate::hardlink_tracker::{HardlinkKey, HardlinkStats, HardlinkTracker, Resolution};
use crate::metadata::{join_path, parent_dir};
use crate::record::{Record, RecordResult};
use crate::stats::{ExportStats, SharedStats};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Final mode of a directory, applied after everything inside it is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredPermission {
    /// Destination path of the directory
    pub path: PathBuf,
    /// Permission bits, including setuid/setgid/sticky
    pub mode: u32,
}

/// Shared state handed to every pipeline worker
struct WorkerContext<F> {
    fs: Arc<F>,
    hardlinks: Arc<HardlinkTracker>,
    stats: Arc<SharedStats>,
}

impl<F> Clone for WorkerContext<F> {
    fn clone(&self) -> Self {
        Self {
            fs: Arc::clone(&self.fs),
            hardlinks: Arc::clone(&self.hardlinks),
            stats: Arc::clone(&self.stats),
        }
    }
}

/// Materializes records under a root directory
#[derive(Debug)]
pub struct Exporter<F: RemoteFs = Backend> {
    fs: Arc<F>,
    endpoint: Endpoint,
    options: ExportOptions,
    hardlinks: Arc<HardlinkTracker>,
}

impl Exporter<Backend> {
    /// Build an exporter from connector configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing or invalid location or
    /// malformed options, and any error from connecting to the endpoint.
    pub async fn connect(config: &ConfigMap, options: ExportOptions) -> Result<Self> {
        let endpoint = endpoint_from_config(config)?;
        let params = ConnectionParams::from_config(config)?;
        let fs = Backend::connect(&endpoint, &params).await?;
        Ok(Self::with_fs(fs, endpoint, options))
    }
}

impl<F: RemoteFs> Exporter<F> {
    /// Build an exporter over an already connected filesystem
    pub fn with_fs(fs: F, endpoint: Endpoint, options: ExportOptions) -> Self {
        Self {
            fs: Arc::new(fs),
            endpoint,
            options,
            hardlinks: Arc::new(HardlinkTracker::new()),
        }
    }

    /// Host the exporter writes to
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.endpoint.host
    }

    /// Directory records are materialized under
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.endpoint.path
    }

    /// Backend name, `"sftp"` or `"fs"`
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.fs.name()
    }

    /// Hardlink groups seen so far
    #[must_use]
    pub fn hardlink_stats(&self) -> HardlinkStats {
        self.hardlinks.stats()
    }

    /// Consume `records` until the channel closes, answering each on `results`
    ///
    /// Per-record failures are reported through `results` and counted; they
    /// do not stop the export.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if `cancel` fired. Records arriving
    /// after that are answered with a cancellation error; work already
    /// dispatched finishes and directory modes are still applied.
    pub async fn export(
        &self,
        mut records: mpsc::Receiver<Record>,
        results: mpsc::Sender<RecordResult>,
        cancel: CancellationToken,
    ) -> Result<ExportStats> {
        let ctx = WorkerContext {
            fs: Arc::clone(&self.fs),
            hardlinks: Arc::clone(&self.hardlinks),
            stats: Arc::new(SharedStats::new()),
        };
        let permits = Arc::new(Semaphore::new(self.options.max_concurrency()));
        let mut workers = JoinSet::new();
        let mut deferred: Vec<DeferredPermission> = Vec::with_capacity(1024);
        let mut cancelled = false;

        loop {
            let record = tokio::select! {
                biased;
                () = cancel.cancelled(), if !cancelled => {
                    debug!("export to {} cancelled, draining records", self.endpoint);
                    cancelled = true;
                    continue;
                }
                record = records.recv() => record,
            };
            let Some(record) = record else {
                break;
            };

            if cancelled {
                ctx.stats.add_error();
                send(&results, record.failed(SyncError::Cancelled)).await;
                continue;
            }

            if let Some(err) = &record.error {
                ctx.stats.add_error();
                send(&results, record.failed(Arc::clone(err))).await;
                continue;
            }

            if record.is_xattr {
                send(&results, record.ok()).await;
                continue;
            }

            let dest = join_path(self.root(), &record.pathname);

            if record.info.is_dir() {
                match make_dir(&*self.fs, &dest).await {
                    Ok(()) => {
                        ctx.stats.add_directory();
                        deferred.push(DeferredPermission {
                            path: dest,
                            mode: record.info.permissions(),
                        });
                        send(&results, record.ok()).await;
                    }
                    Err(e) => {
                        warn!("could not create directory {}: {}", dest.display(), e);
                        ctx.stats.add_error();
                        send(&results, record.failed(e)).await;
                    }
                }
                continue;
            }

            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    cancelled = true;
                    ctx.stats.add_error();
                    send(&results, record.failed(SyncError::Cancelled)).await;
                    continue;
                }
                permit = Arc::clone(&permits).acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                ctx.stats.add_error();
                send(&results, record.failed(SyncError::Cancelled)).await;
                continue;
            };

            let worker = ctx.clone();
            let results = results.clone();
            workers.spawn(async move {
                let _permit = permit;
                let result = match write_entry(&worker, &record, &dest).await {
                    Ok(()) => record.ok(),
                    Err(e) => {
                        warn!("could not export {}: {}", dest.display(), e);
                        worker.stats.add_error();
                        record.failed(e)
                    }
                };
                send(&results, result).await;
            });

            while let Some(done) = workers.try_join_next() {
                reap(done, &ctx.stats);
            }
        }

        while let Some(done) = workers.join_next().await {
            reap(done, &ctx.stats);
        }

        for perm in deferred.iter().rev() {
            if let Err(e) = self.fs.chmod(&perm.path, perm.mode).await {
                warn!("could not chmod {} to {:o}: {}", perm.path.display(), perm.mode, e);
                ctx.stats.add_error();
            }
        }

        let stats = ctx.stats.snapshot();
        if cancelled {
            info!("export to {} cancelled: {}", self.endpoint, stats);
            return Err(SyncError::Cancelled);
        }
        info!("export to {} finished: {}", self.endpoint, stats);
        Ok(stats)
    }
}

async fn send(results: &mpsc::Sender<RecordResult>, result: RecordResult) {
    if results.send(result).await.is_err() {
        trace!("result receiver dropped");
    }
}

fn reap(done: std::result::Result<(), tokio::task::JoinError>, stats: &SharedStats) {
    if let Err(e) = done {
        warn!("export worker failed: {}", e);
        stats.add_error();
    }
}

/// Create a directory, accepting one that already exists
async fn make_dir<F: RemoteFs>(fs: &F, dest: &Path) -> Result<()> {
    match fs.mkdir(dest).await {
        Ok(()) => Ok(()),
        Err(e) => match fs.lstat(dest).await {
            Ok(info) if info.is_dir() => Ok(()),
            _ => Err(e),
        },
    }
}

/// Create `dir` and any missing directories above it
async fn make_parents<F: RemoteFs>(fs: &F, dir: &Path) -> Result<()> {
    let mut missing = Vec::new();
    let mut current = dir.to_path_buf();
    while current != Path::new("/") && fs.lstat(&current).await.is_err() {
        let parent = parent_dir(&current);
        missing.push(current);
        current = parent;
    }
    for dir in missing.iter().rev() {
        make_dir(fs, dir).await?;
    }
    Ok(())
}

async fn write_entry<F: RemoteFs>(ctx: &WorkerContext<F>, record: &Record, dest: &Path) -> Result<()> {
    let info = &record.info;

    if info.is_symlink() {
        let fs = &*ctx.fs;
        let target = record.target.as_path();
        match replacing(fs, dest, move || fs.symlink(target, dest)).await {
            // A symlinked import root arrives without its own parent chain
            Err(e) if e.is_not_found() => {
                debug!("creating parents of symlink {}", dest.display());
                make_parents(fs, &parent_dir(dest)).await?;
                replacing(fs, dest, move || fs.symlink(target, dest)).await?;
            }
            created => created?,
        }
        ctx.stats.add_symlink();
        return Ok(());
    }

    if !info.is_regular() {
        debug!("not materializing special file {}", record.pathname.display());
        return Ok(());
    }

    let Some(key) = HardlinkKey::of(info) else {
        return commit(ctx, write_file(&*ctx.fs, record, dest).await);
    };

    match ctx
        .hardlinks
        .resolve(key, dest, || write_file(&*ctx.fs, record, dest))
        .await
    {
        Resolution::Leader(written) => commit(ctx, written),
        Resolution::Follower(Ok(canonical)) => {
            if canonical != dest {
                let fs = &*ctx.fs;
                let canonical = canonical.as_path();
                replacing(fs, dest, move || fs.hard_link(canonical, dest)).await?;
                ctx.stats.add_hardlink();
            }
            Ok(())
        }
        Resolution::Follower(Err(reason)) => Err(SyncError::with_path(
            "no content for hardlink",
            dest,
            reason,
        )),
    }
}

/// Count a finished write; content committed despite a mode failure counts too
fn commit<F>(ctx: &WorkerContext<F>, written: Result<u64>) -> Result<()> {
    match written {
        Ok(bytes) => {
            ctx.stats.add_file(bytes);
            Ok(())
        }
        Err(e) => {
            if let SyncError::ModeNotApplied { bytes, .. } = &e {
                ctx.stats.add_file(*bytes);
            }
            Err(e)
        }
    }
}

async fn write_file<F: RemoteFs>(fs: &F, record: &Record, dest: &Path) -> Result<u64> {
    let mut reader = record.open().await?;
    write_atomic(fs, dest, &mut reader, Some(record.info.permissions())).await
}

/// Run `create`, replacing a stale entry at `dest` if one is in the way
async fn replacing<F, C, Fut>(fs: &F, dest: &Path, create: C) -> Result<()>
where
    F: RemoteFs,
    C: Fn() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    match create().await {
        Ok(()) => Ok(()),
        Err(e) if e.may_already_exist() => {
            debug!("replacing existing {}", dest.display());
            fs.remove(dest).await?;
            create().await
        }
        Err(e) => Err(e),
    }
}
