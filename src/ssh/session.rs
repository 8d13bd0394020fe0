//! Opening sftp sessions over a shared master
//!
//! Each session is a short-lived `ssh -S <sock> host -s sftp` child whose
//! stdio carries the file-transfer sub-protocol. Authentication happens once,
//! in the master; sessions only multiplex over it.

use super::agent::add_private_key;
use super::args::SshTarget;
use super::control::{ControlSocketManager, MasterControl, SshMaster};
use crate::config::{ConnectionParams, Endpoint};
use crate::error::{Result, SyncError};
use crate::sftp::SftpClient;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// How long a failed handshake waits for ssh's last diagnostic line
const DIAGNOSTIC_GRACE: Duration = Duration::from_millis(500);

/// Drain ssh's stderr, keeping the last line that is not a warning
fn drain_diagnostics<R>(stderr: R) -> JoinHandle<Option<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut last = None;
        while let Ok(Some(line)) = lines.next_line().await {
            if line.starts_with("Warning:") {
                trace!("ssh: {}", line);
                continue;
            }
            debug!("ssh: {}", line);
            last = Some(line);
        }
        last
    })
}

/// Opens sftp sessions, starting the shared master on demand
#[derive(Debug)]
pub struct SessionFactory<'a, M = SshMaster> {
    manager: &'a ControlSocketManager<M>,
    ssh: PathBuf,
    ssh_add: PathBuf,
}

impl SessionFactory<'static, SshMaster> {
    /// Factory using the process-wide master table and the ssh tools on `PATH`
    #[must_use]
    pub fn new() -> Self {
        Self::with_manager(ControlSocketManager::global())
    }
}

impl Default for SessionFactory<'static, SshMaster> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, M: MasterControl> SessionFactory<'a, M> {
    /// Factory driving a specific master table
    #[must_use]
    pub fn with_manager(manager: &'a ControlSocketManager<M>) -> Self {
        Self {
            manager,
            ssh: PathBuf::from("ssh"),
            ssh_add: PathBuf::from("ssh-add"),
        }
    }

    /// Override the ssh binary used for sessions
    #[must_use]
    pub fn ssh_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.ssh = program.into();
        self
    }

    /// Override the ssh-add binary used to load inline keys
    #[must_use]
    pub fn ssh_add_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.ssh_add = program.into();
        self
    }

    /// Connect to an endpoint and negotiate an sftp session
    ///
    /// # Errors
    ///
    /// - [`SyncError::Config`] for an ambiguous username or a missing host,
    ///   before anything is spawned
    /// - [`SyncError::Agent`] if inline key material cannot be loaded
    /// - [`SyncError::Connection`] if the master cannot be brought up
    /// - [`SyncError::Ssh`] with ssh's diagnostic if the handshake fails and
    ///   ssh said why; otherwise the handshake's own error
    pub async fn connect(&self, endpoint: &Endpoint, params: &ConnectionParams) -> Result<SftpClient> {
        let target = SshTarget::new(endpoint, params)?;

        add_private_key(&self.ssh_add, params).await?;
        let sock = self.manager.ensure_master(&target).await?;

        let mut cmd = Command::new(&self.ssh);
        cmd.args(target.session_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(auth_sock) = &target.auth_sock {
            cmd.env("SSH_AUTH_SOCK", auth_sock);
        }

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SyncError::Connection("ssh stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::Connection("ssh stdout not captured".to_string()))?;
        let diagnostics = child.stderr.take().map(drain_diagnostics);

        let host = target.host.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("ssh session to {} exited: {}", host, status),
                Err(e) => debug!("ssh session to {} could not be reaped: {}", host, e),
            }
        });

        match SftpClient::new(tokio::io::join(stdout, stdin)).await {
            Ok(client) => {
                info!("sftp session opened to {} via {}", target.host, sock.display());
                Ok(client)
            }
            Err(err) => {
                let line = match diagnostics {
                    Some(handle) => tokio::time::timeout(DIAGNOSTIC_GRACE, handle)
                        .await
                        .ok()
                        .and_then(|joined| joined.ok())
                        .flatten(),
                    None => None,
                };
                Err(line.map_or(err, SyncError::Ssh))
            }
        }
    }
}

/// Connect with the process-wide master table
///
/// # Errors
///
/// See [`SessionFactory::connect`].
pub async fn connect(endpoint: &Endpoint, params: &ConnectionParams) -> Result<SftpClient> {
    SessionFactory::new().connect(endpoint, params).await
}
