//! Shared ssh control masters
//!
//! One ssh master per control socket is kept alive across sessions. Starting
//! a master is serialized per socket path: concurrent callers for the same
//! endpoint wait on a lock, and whichever runs first starts the master while
//! the rest find it alive on their check.

use super::args::SshTarget;
use crate::error::{Result, SyncError};
use dashmap::DashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Operations on an ssh control master
///
/// Implemented by [`SshMaster`] for real ssh, and by fakes in tests.
pub trait MasterControl: Send + Sync + 'static {
    /// Check whether a master is listening on the target's socket
    fn check(&self, target: &SshTarget) -> impl Future<Output = Result<()>> + Send;

    /// Start a backgrounded master for the target
    fn start(&self, target: &SshTarget) -> impl Future<Output = Result<()>> + Send;
}

/// [`MasterControl`] backed by the ssh binary
#[derive(Debug, Clone)]
pub struct SshMaster {
    program: PathBuf,
}

impl SshMaster {
    /// Use the given ssh binary
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Path of the ssh binary in use
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, target: &SshTarget, args: Vec<String>) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(sock) = &target.auth_sock {
            cmd.env("SSH_AUTH_SOCK", sock);
        }
        cmd
    }
}

impl Default for SshMaster {
    fn default() -> Self {
        Self::new("ssh")
    }
}

/// Combined, trimmed stdout + stderr of a finished command
fn combined_output(output: &std::process::Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text.trim().to_string()
}

impl MasterControl for SshMaster {
    async fn check(&self, target: &SshTarget) -> Result<()> {
        let output = self.command(target, target.check_args()).output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SyncError::Connection(format!(
                "ssh master did not come up: {}: {}",
                output.status,
                combined_output(&output)
            )))
        }
    }

    async fn start(&self, target: &SshTarget) -> Result<()> {
        // `-f` forks the master into the background once authenticated, so
        // the foreground process exits and output() returns.
        let output = self.command(target, target.master_args()).output().await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(SyncError::Connection(format!(
                "failed to start ssh master: {}: {}",
                output.status,
                combined_output(&output)
            )))
        }
    }
}

/// Ensures a live master exists for each control socket
///
/// # Example
///
/// ```rust,no_run
/// use sftpsync::config::{ConnectionParams, Endpoint};
/// use sftpsync::ssh::{ControlSocketManager, SshTarget};
///
/// # async fn example() -> sftpsync::error::Result<()> {
/// let endpoint = Endpoint::parse("sftp://backup.example.com/srv")?;
/// let target = SshTarget::new(&endpoint, &ConnectionParams::default())?;
/// let sock = ControlSocketManager::global().ensure_master(&target).await?;
/// println!("master listening on {}", sock.display());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ControlSocketManager<M = SshMaster> {
    control: M,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl<M: MasterControl> ControlSocketManager<M> {
    /// Create a manager driving the given master control
    #[must_use]
    pub fn new(control: M) -> Self {
        Self {
            control,
            locks: DashMap::new(),
        }
    }

    /// Access the underlying master control
    pub const fn control(&self) -> &M {
        &self.control
    }

    fn lock_for(&self, sock: &Path) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(sock.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Make sure a master is running for `target` and return its socket
    ///
    /// Runs check, then start and a verifying check only if the first check
    /// failed. The whole sequence holds the per-socket lock.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the master cannot be started or does
    /// not answer the verifying check.
    pub async fn ensure_master(&self, target: &SshTarget) -> Result<PathBuf> {
        let sock = target.control_path.clone();
        let lock = self.lock_for(&sock);
        let _guard = lock.lock().await;

        if self.control.check(target).await.is_ok() {
            debug!("reusing ssh master at {}", sock.display());
            return Ok(sock);
        }

        info!("starting ssh master for {} at {}", target.host, sock.display());
        self.control.start(target).await?;
        self.control.check(target).await?;
        Ok(sock)
    }
}

impl ControlSocketManager<SshMaster> {
    /// Process-wide manager using the `ssh` found on `PATH`
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<ControlSocketManager<SshMaster>> = OnceLock::new();
        GLOBAL.get_or_init(|| Self::new(SshMaster::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionParams, Endpoint};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fake master that comes alive after the first start
    #[derive(Default)]
    struct FakeMaster {
        alive: AtomicBool,
        starts: AtomicUsize,
        checks: AtomicUsize,
        fail_start: bool,
    }

    impl MasterControl for FakeMaster {
        async fn check(&self, _target: &SshTarget) -> Result<()> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if self.alive.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(SyncError::Connection("no master".to_string()))
            }
        }

        async fn start(&self, _target: &SshTarget) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            // Widen the race window
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_start {
                return Err(SyncError::Connection("failed to start ssh master".to_string()));
            }
            self.alive.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn target(location: &str) -> SshTarget {
        let endpoint = Endpoint::parse(location).expect("valid location");
        SshTarget::new(&endpoint, &ConnectionParams::default()).expect("target")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ensure_starts_one_master() {
        let manager = Arc::new(ControlSocketManager::new(FakeMaster::default()));
        let target = target("sftp://host/data");

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let manager = Arc::clone(&manager);
            let target = target.clone();
            tasks.push(tokio::spawn(async move {
                manager.ensure_master(&target).await
            }));
        }
        for task in tasks {
            let sock = task.await.expect("task").expect("ensure_master");
            assert_eq!(sock, target.control_path);
        }

        assert_eq!(manager.control().starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_live_master_is_reused() {
        let fake = FakeMaster::default();
        fake.alive.store(true, Ordering::SeqCst);
        let manager = ControlSocketManager::new(fake);

        manager
            .ensure_master(&target("sftp://host/"))
            .await
            .expect("ensure_master");
        assert_eq!(manager.control().starts.load(Ordering::SeqCst), 0);
        assert_eq!(manager.control().checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let manager = ControlSocketManager::new(FakeMaster {
            fail_start: true,
            ..FakeMaster::default()
        });
        let err = manager
            .ensure_master(&target("sftp://host/"))
            .await
            .expect_err("start should fail");
        assert!(matches!(err, SyncError::Connection(_)));
    }

    #[tokio::test]
    async fn test_distinct_endpoints_get_distinct_masters() {
        let manager = ControlSocketManager::new(FakeMaster::default());
        let a = manager
            .ensure_master(&target("sftp://host-a/"))
            .await
            .expect("a");
        // The fake is shared, so the second endpoint finds it alive; what
        // matters is that the sockets differ.
        let b = manager
            .ensure_master(&target("sftp://host-b/"))
            .await
            .expect("b");
        assert_ne!(a, b);
        assert_eq!(manager.locks.len(), 2);
    }

    /// ssh stand-in that logs its arguments and plays a master
    ///
    /// `-O check` succeeds once `-M` has created the marker file, unless
    /// `check_ok` is false, in which case it always fails with a diagnostic.
    fn scripted_ssh(dir: &tempfile::TempDir, check_ok: bool) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let log = dir.path().join("args.log");
        let marker = dir.path().join("master.up");
        let check = if check_ok {
            format!("[ -f '{}' ] && exit 0\n    ", marker.display())
        } else {
            String::new()
        };
        let script = format!(
            "#!/bin/sh\n\
             echo \"$*\" >> '{log}'\n\
             case \" $* \" in\n\
             *' -O check '*)\n    {check}echo 'Control socket connect: No such file or directory' >&2\n    exit 255 ;;\n\
             *' -M '*)\n    touch '{marker}'\n    exit 0 ;;\n\
             esac\n\
             exit 2\n",
            log = log.display(),
            marker = marker.display(),
        );
        let path = dir.path().join("ssh");
        std::fs::write(&path, script).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");
        (path, log)
    }

    fn logged(log: &Path) -> Vec<String> {
        std::fs::read_to_string(log)
            .expect("read log")
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_ssh_master_starts_and_verifies() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let (ssh, log) = scripted_ssh(&dir, true);
        let manager = ControlSocketManager::new(SshMaster::new(ssh));
        let target = target("sftp://backup.example.com/srv");

        let sock = manager.ensure_master(&target).await.expect("ensure_master");
        assert_eq!(sock, target.control_path);

        let calls = logged(&log);
        assert_eq!(calls.len(), 3, "{calls:?}");
        assert!(calls.iter().all(|c| c.starts_with("-o BatchMode=yes")));

        assert!(calls[0].contains(" -O check backup.example.com"));
        assert!(calls[1].contains("-M -N -f -o ControlMaster=yes -o ControlPersist=10m"));
        assert!(calls[1].contains(&format!("ControlPath={}", sock.display())));
        assert!(calls[1].ends_with(" backup.example.com"));
        assert_eq!(calls[2], calls[0]);

        // A second caller finds the master alive and starts nothing
        manager.ensure_master(&target).await.expect("reuse");
        let calls = logged(&log);
        assert_eq!(calls.len(), 4);
        assert!(calls[3].contains(" -O check "));
    }

    #[tokio::test]
    async fn test_ssh_master_verify_failure_carries_output() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let (ssh, log) = scripted_ssh(&dir, false);
        let manager = ControlSocketManager::new(SshMaster::new(ssh));

        let err = manager
            .ensure_master(&target("sftp://backup.example.com/srv"))
            .await
            .expect_err("verify should fail");
        match err {
            SyncError::Connection(msg) => {
                assert!(msg.starts_with("ssh master did not come up"), "{msg}");
                assert!(msg.contains("Control socket connect: No such file or directory"));
            }
            other => panic!("expected connection error, got {other:?}"),
        }
        // check, start, verifying check
        assert_eq!(logged(&log).len(), 3);
    }

    #[tokio::test]
    async fn test_ssh_master_start_failure_carries_output() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let ssh = dir.path().join("ssh");
        std::fs::write(&ssh, "#!/bin/sh\necho 'ssh: Could not resolve hostname nowhere' >&2\nexit 255\n")
            .expect("write script");
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&ssh, std::fs::Permissions::from_mode(0o755))
                .expect("chmod script");
        }
        let master = SshMaster::new(ssh);

        let err = master
            .start(&target("sftp://nowhere/"))
            .await
            .expect_err("start should fail");
        assert!(matches!(
            err,
            SyncError::Connection(msg) if msg.starts_with("failed to start ssh master")
                && msg.contains("Could not resolve hostname nowhere")
        ));
    }
}
