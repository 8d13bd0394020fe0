//! ssh command-line construction
//!
//! Every ssh invocation (master check, master start, sftp session) shares
//! the same option prefix so that they all resolve to the same connection.

use crate::config::{ConnectionParams, Endpoint};
use crate::error::{Result, SyncError};
use std::path::PathBuf;

/// Prefix of the control socket file name in the temp directory
const SOCKET_PREFIX: &str = "sftpsync-ssh-";

/// Everything needed to build ssh arguments for one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Host name passed as the final ssh destination
    pub host: String,
    /// Optional port (`-p`)
    pub port: Option<u16>,
    /// Resolved login name (`-l`)
    pub user: Option<String>,
    /// Identity file (`-i`)
    pub identity: Option<String>,
    /// Disable host key checking
    pub insecure_ignore_host_key: bool,
    /// Agent socket exported as `SSH_AUTH_SOCK`
    pub auth_sock: Option<String>,
    /// Control socket path shared with the master
    pub control_path: PathBuf,
}

impl SshTarget {
    /// Resolve the ssh target for an endpoint
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the endpoint has no host or if the
    /// login name is given both in the location and as a parameter.
    pub fn new(endpoint: &Endpoint, params: &ConnectionParams) -> Result<Self> {
        if endpoint.host.is_empty() {
            return Err(SyncError::Config(format!(
                "missing hostname in endpoint: {:?}",
                endpoint.to_string()
            )));
        }
        let user = params.resolve_user(endpoint)?;
        Ok(Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            user,
            identity: params.identity.clone(),
            insecure_ignore_host_key: params.insecure_ignore_host_key,
            auth_sock: params.auth_sock.clone(),
            control_path: control_path(endpoint, params),
        })
    }

    /// Options shared by every ssh invocation for this target
    #[must_use]
    pub fn common_args(&self) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if self.insecure_ignore_host_key {
            args.push("-o".to_string());
            args.push("StrictHostKeyChecking=no".to_string());
        }
        if let Some(identity) = &self.identity {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        if let Some(user) = &self.user {
            args.push("-l".to_string());
            args.push(user.clone());
        }
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args
    }

    /// Arguments asking an existing master whether it is alive
    #[must_use]
    pub fn check_args(&self) -> Vec<String> {
        let mut args = self.common_args();
        args.push("-S".to_string());
        args.push(self.control_path.display().to_string());
        args.push("-O".to_string());
        args.push("check".to_string());
        args.push(self.host.clone());
        args
    }

    /// Arguments starting a backgrounded, persistent master
    #[must_use]
    pub fn master_args(&self) -> Vec<String> {
        let mut args = self.common_args();
        args.extend(
            [
                "-M",
                "-N",
                "-f",
                "-o",
                "ControlMaster=yes",
                "-o",
                "ControlPersist=10m",
            ]
            .map(str::to_string),
        );
        args.push("-o".to_string());
        args.push(format!("ControlPath={}", self.control_path.display()));
        args.push(self.host.clone());
        args
    }

    /// Arguments opening an sftp subsystem through the master
    #[must_use]
    pub fn session_args(&self) -> Vec<String> {
        let mut args = self.common_args();
        args.push("-S".to_string());
        args.push(self.control_path.display().to_string());
        args.push(self.host.clone());
        args.push("-s".to_string());
        args.push("sftp".to_string());
        args
    }
}

/// Deterministic control socket path for an endpoint and credentials
///
/// The same location, username and identity always map to the same socket,
/// so independent connects share one master.
#[must_use]
pub fn control_path(endpoint: &Endpoint, params: &ConnectionParams) -> PathBuf {
    let key = format!(
        "{}|{}|{}",
        endpoint,
        params.username.as_deref().unwrap_or_default(),
        params.identity.as_deref().unwrap_or_default()
    );
    let digest = format!("{:x}", md5::compute(key.as_bytes()));
    std::env::temp_dir().join(format!("{SOCKET_PREFIX}{}.sock", &digest[..16]))
}
