//! Tree walker producing a record stream
//!
//! An [`Importer`] walks a tree on any [`RemoteFs`] and sends one [`Record`]
//! per entry into a bounded channel. The consumer sees a directory's record
//! before the record of anything inside it.
//!
//! # Architecture
//!
//! ```text
//! walk loop (explicit stack, one task)
//!     ├─ directories ──────────────────────────→ records
//!     └─ files/symlinks → job queue (4 × workers)
//!                            ↓
//!                      N workers: readlink, bind content opener
//!                            ↓
//!                         records
//! ```
//!
//! Backpressure flows from the record channel to the workers to the job
//! queue, so the walk advances at the pace the consumer drains records.

use crate::config::{endpoint_from_config, ConfigMap, ConnectionParams, Endpoint, ImportOptions};
use crate::error::{Result, SyncError};
use crate::fs::{Backend, RemoteFs};
use crate::metadata::{base_name, join_path, parent_dir, FileInfo};
use crate::record::{ContentOpener, ContentReader, Record};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One entry handed from the walk loop to a worker
#[derive(Debug)]
struct Job {
    path: PathBuf,
    info: FileInfo,
}

/// Walks a tree and emits records
///
/// When the root is a symlink, the link itself is emitted followed by the
/// ancestry and subtree of its resolved target. The link's own parent
/// directories are not emitted; consumers recreating the link must create
/// them (the [`crate::exporter::Exporter`] does).
#[derive(Debug)]
pub struct Importer<F: RemoteFs = Backend> {
    fs: Arc<F>,
    endpoint: Endpoint,
    root: Mutex<PathBuf>,
    dont_traverse_fs: bool,
    options: ImportOptions,
}

impl Importer<Backend> {
    /// Build an importer from connector configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a missing or invalid location or
    /// malformed options, and any error from connecting to the endpoint.
    pub async fn connect(config: &ConfigMap, options: ImportOptions) -> Result<Self> {
        let endpoint = endpoint_from_config(config)?;
        let params = ConnectionParams::from_config(config)?;
        let fs = Backend::connect(&endpoint, &params).await?;
        Ok(Self::with_fs(fs, endpoint, &params, options))
    }
}

impl<F: RemoteFs> Importer<F> {
    /// Build an importer over an already connected filesystem
    pub fn with_fs(fs: F, endpoint: Endpoint, params: &ConnectionParams, options: ImportOptions) -> Self {
        Self {
            fs: Arc::new(fs),
            root: Mutex::new(endpoint.path.clone()),
            endpoint,
            dont_traverse_fs: params.dont_traverse_fs,
            options,
        }
    }

    /// Host the importer reads from
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.endpoint.host
    }

    /// Root of the import
    ///
    /// If the configured root turned out to be a regular file, this is its
    /// parent directory once the walk has visited it.
    #[must_use]
    pub fn root(&self) -> PathBuf {
        self.root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_root(&self, root: PathBuf) {
        *self.root.lock().unwrap_or_else(PoisonError::into_inner) = root;
    }

    /// Backend name, `"sftp"` or `"fs"`
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.fs.name()
    }

    /// Walk the tree, sending every record into `records`
    ///
    /// The channel is closed when this returns (all senders are dropped).
    /// Per-path failures become error records; they never abort the walk.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if `cancel` fired before the walk
    /// completed. Records already queued are still delivered.
    pub async fn import(&self, records: mpsc::Sender<Record>, cancel: CancellationToken) -> Result<()> {
        let workers = self.options.max_concurrency();
        let (jobs_tx, jobs_rx) = async_channel::bounded::<Job>(workers * 4);

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let jobs = jobs_rx.clone();
            let records = records.clone();
            let fs = Arc::clone(&self.fs);
            pool.spawn(async move {
                while let Ok(job) = jobs.recv().await {
                    let record = build_record(&fs, job).await;
                    if records.send(record).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(jobs_rx);

        self.walk(&records, &jobs_tx, &cancel).await;
        jobs_tx.close();
        drop(records);

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!("walker worker failed: {}", e);
            }
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        info!("import of {} finished", self.endpoint);
        Ok(())
    }

    /// Resolve the root, emit ancestors, then walk with an explicit stack
    async fn walk(
        &self,
        records: &mpsc::Sender<Record>,
        jobs: &async_channel::Sender<Job>,
        cancel: &CancellationToken,
    ) {
        let root = self.root();
        let emit = |record: Record| async move { records.send(record).await.is_ok() };

        let root_info = match self.fs.lstat(&root).await {
            Ok(info) => info,
            Err(e) => {
                warn!("cannot stat root {}: {}", root.display(), e);
                self.emit_ancestors(&parent_dir(&root), records).await;
                emit(Record::error(root.clone(), e)).await;
                return;
            }
        };

        let (walk_root, walk_info) = if root_info.is_symlink() {
            let target = match self.fs.read_link(&root).await {
                Ok(target) => target,
                Err(e) => {
                    emit(Record::error(root.clone(), e)).await;
                    return;
                }
            };
            // An absolute target is cleaned as-is; a relative one is
            // resolved against the link's directory
            let resolved = if target.is_absolute() {
                join_path(Path::new("/"), &target)
            } else {
                join_path(&parent_dir(&root), &target)
            };
            debug!("root {} is a symlink to {}", root.display(), resolved.display());
            if !emit(Record::new(root.clone(), target, root_info, None)).await {
                return;
            }
            match self.fs.lstat(&resolved).await {
                Ok(info) => (resolved, info),
                Err(e) => {
                    self.emit_ancestors(&parent_dir(&resolved), records).await;
                    emit(Record::error(resolved, e)).await;
                    return;
                }
            }
        } else {
            (root.clone(), root_info)
        };

        if !walk_info.is_dir() && walk_root == root {
            self.set_root(parent_dir(&root));
        }

        let root_dev = if self.dont_traverse_fs && walk_info.is_dir() {
            self.fs.device_id(&walk_root).await.ok().flatten()
        } else {
            None
        };

        if walk_root != Path::new("/") {
            self.emit_ancestors(&parent_dir(&walk_root), records).await;
        }

        let excludes = self.options.excludes();
        let mut stack = vec![(walk_root.clone(), walk_info)];
        while let Some((path, info)) = stack.pop() {
            if cancel.is_cancelled() {
                debug!("walk of {} cancelled", walk_root.display());
                break;
            }

            if path != Path::new("/") && excludes.is_excluded(&path, info.is_dir()) {
                debug!("excluded {}", path.display());
                continue;
            }

            if !info.is_dir() {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    sent = jobs.send(Job { path, info }) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            if let Some(root_dev) = root_dev {
                if path != walk_root && self.crosses_fs(&path, root_dev).await {
                    debug!("not crossing into filesystem at {}", path.display());
                    continue;
                }
            }

            if !emit(Record::new(path.clone(), PathBuf::new(), info, None)).await {
                break;
            }

            match self.fs.read_dir(&path).await {
                Ok(mut entries) => {
                    // Reverse order so the stack pops names in ascending order
                    entries.sort_by(|a, b| b.name.cmp(&a.name));
                    for entry in entries {
                        stack.push((path.join(&entry.name), entry));
                    }
                }
                Err(e) => {
                    warn!("cannot list {}: {}", path.display(), e);
                    if !emit(Record::error(path, e)).await {
                        break;
                    }
                }
            }
        }
    }

    async fn crosses_fs(&self, path: &Path, root_dev: u64) -> bool {
        match self.fs.device_id(path).await {
            Ok(Some(dev)) => dev != root_dev,
            Ok(None) => false,
            Err(e) => {
                debug!("cannot identify filesystem of {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Emit directory records from `/` down to `dir`
    ///
    /// An ancestor that cannot be stat'ed yields an error record followed by
    /// a synthetic `0755` directory so the chain stays complete.
    async fn emit_ancestors(&self, dir: &Path, records: &mpsc::Sender<Record>) {
        let mut chain = vec![dir.to_path_buf()];
        let mut current = dir.to_path_buf();
        while current != Path::new("/") && current != Path::new(".") {
            current = parent_dir(&current);
            chain.push(current.clone());
        }

        for ancestor in chain.into_iter().rev() {
            let info = match self.fs.lstat(&ancestor).await {
                Ok(info) => info,
                Err(e) => {
                    debug!("cannot stat ancestor {}: {}", ancestor.display(), e);
                    if records.send(Record::error(ancestor.clone(), e)).await.is_err() {
                        return;
                    }
                    FileInfo::synthetic_directory(base_name(&ancestor))
                }
            };
            if records
                .send(Record::new(ancestor, PathBuf::new(), info, None))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

/// Turn a job into its record, resolving symlinks and binding content
async fn build_record<F: RemoteFs>(fs: &Arc<F>, job: Job) -> Record {
    let Job { path, info } = job;

    if info.is_symlink() {
        return match fs.read_link(&path).await {
            Ok(target) => Record::new(path, target, info, None),
            Err(e) => {
                warn!("cannot read link {}: {}", path.display(), e);
                Record::error(path, e)
            }
        };
    }

    if !info.is_regular() {
        return Record::new(path, PathBuf::new(), info, None);
    }

    let opener: ContentOpener = {
        let fs = Arc::clone(fs);
        let path = path.clone();
        Arc::new(move || -> BoxFuture<'static, Result<ContentReader>> {
            let fs = Arc::clone(&fs);
            let path = path.clone();
            Box::pin(async move { fs.open(&path).await })
        })
    };
    Record::new(path, PathBuf::new(), info, Some(opener))
}
