//! Loading private keys into ssh-agent
//!
//! Key material supplied inline in the configuration is handed to
//! `ssh-add -t <ttl> -` on stdin so it never touches the disk. The short
//! lifetime keeps the key in the agent only long enough for the master to
//! authenticate.

use crate::config::ConnectionParams;
use crate::error::{Result, SyncError};
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Add `params.private_key` to the agent, if one was configured
///
/// # Errors
///
/// Returns [`SyncError::Agent`] with ssh-add's output if it fails.
pub async fn add_private_key(program: &Path, params: &ConnectionParams) -> Result<()> {
    let Some(key) = params.private_key.as_deref() else {
        return Ok(());
    };

    let mut cmd = Command::new(program);
    cmd.arg("-t")
        .arg(&params.private_key_ttl)
        .arg("-")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(sock) = &params.auth_sock {
        cmd.env("SSH_AUTH_SOCK", sock);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| SyncError::Agent(format!("{}: {e}", program.display())))?;

    // Feed the key concurrently so a chatty ssh-add cannot deadlock us
    if let Some(mut stdin) = child.stdin.take() {
        let material = format!("{key}\n");
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(material.as_bytes()).await {
                warn!("failed to pass key to ssh-add: {}", e);
            }
        });
    }

    let output = child.wait_with_output().await?;
    if output.status.success() {
        debug!("private key added to agent for {}", params.private_key_ttl);
        return Ok(());
    }

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Err(SyncError::Agent(format!(
        "{}: {}",
        output.status,
        text.trim()
    )))
}
