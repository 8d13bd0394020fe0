//! Connector configuration
//!
//! Importers and exporters are configured with a flat string map, the same
//! shape a host application hands to every connector. This module turns that
//! map into typed values and rejects anything ambiguous up front.
//!
//! Recognised keys:
//!
//! | key                        | meaning                                     |
//! |----------------------------|---------------------------------------------|
//! | `location`                 | `sftp://[user@]host[:port]/path` or `file:///path` |
//! | `username`                 | login name (conflicts with `user@` in location) |
//! | `identity`                 | private key file passed to `ssh -i`         |
//! | `ssh_private_key`          | raw key material loaded into the agent      |
//! | `ssh_private_key_ttl`      | agent lifetime of that key, default `5s`    |
//! | `ssh_auth_sock`            | agent socket override                       |
//! | `insecure_ignore_host_key` | disable host key checking                   |
//! | `dont_traverse_fs`         | stay on the root's filesystem when walking  |

use crate::error::{Result, SyncError};
use crate::exclude::{Exclude, NoExcludes};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// Default agent lifetime for a key passed through `ssh_private_key`
pub const DEFAULT_PRIVATE_KEY_TTL: &str = "5s";

/// Raw connector configuration
pub type ConfigMap = HashMap<String, String>;

/// Parse a boolean configuration value
///
/// # Errors
///
/// Returns a configuration error for anything other than the usual
/// true/false spellings.
pub fn parse_bool(key: &str, value: Option<&String>) -> Result<bool> {
    let Some(value) = value else {
        return Ok(false);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" | "off" => Ok(false),
        "true" | "1" | "yes" | "on" => Ok(true),
        other => Err(SyncError::Config(format!(
            "invalid boolean value for {key}: {other:?}"
        ))),
    }
}

/// Which backend a location refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Remote host reached through ssh + sftp
    Sftp,
    /// Local filesystem
    File,
}

/// Parsed `location`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Backend selected by the URL scheme
    pub scheme: Scheme,
    /// Host name (empty for `file://`)
    pub host: String,
    /// Optional port
    pub port: Option<u16>,
    /// User embedded in the location (`user@host`)
    pub user: Option<String>,
    /// Absolute path on the target, percent-decoded to raw bytes
    pub path: PathBuf,
}

impl Endpoint {
    /// Parse a location URL
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the location is empty, is not a
    /// valid URL, uses an unknown scheme, or lacks a host for `sftp://`.
    pub fn parse(location: &str) -> Result<Self> {
        if location.trim().is_empty() {
            return Err(SyncError::Config("missing location".to_string()));
        }
        let url = Url::parse(location)
            .map_err(|e| SyncError::Config(format!("invalid location {location:?}: {e}")))?;

        let scheme = match url.scheme() {
            "sftp" | "ssh" => Scheme::Sftp,
            "file" => Scheme::File,
            other => {
                return Err(SyncError::Config(format!(
                    "unsupported location scheme {other:?}"
                )))
            }
        };

        let host = url.host_str().unwrap_or_default().to_string();
        if scheme == Scheme::Sftp && host.is_empty() {
            return Err(SyncError::Config(format!(
                "missing hostname in endpoint: {location:?}"
            )));
        }

        let user = match url.username() {
            "" => None,
            name => Some(String::from_utf8(decode(name)).map_err(|_| {
                SyncError::Config(format!("username in {location:?} is not valid UTF-8"))
            })?),
        };

        let path = decode(url.path());
        let path = if path.is_empty() {
            PathBuf::from("/")
        } else {
            PathBuf::from(OsString::from_vec(path))
        };

        Ok(Self {
            scheme,
            host,
            port: url.port(),
            user,
            path,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::File => write!(f, "file://{}", self.path.display()),
            Scheme::Sftp => {
                f.write_str("sftp://")?;
                if let Some(user) = &self.user {
                    write!(f, "{user}@")?;
                }
                f.write_str(&self.host)?;
                if let Some(port) = self.port {
                    write!(f, ":{port}")?;
                }
                write!(f, "{}", self.path.display())
            }
        }
    }
}

/// Percent-decode a URL component into raw bytes
fn decode(component: &str) -> Vec<u8> {
    let bytes = component.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(v) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

/// Credential and policy settings for an ssh connection
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Explicit login name
    pub username: Option<String>,
    /// Private key file for `ssh -i`
    pub identity: Option<String>,
    /// Raw private key material to load into the agent
    pub private_key: Option<String>,
    /// Agent lifetime for `private_key`
    pub private_key_ttl: String,
    /// Agent socket override
    pub auth_sock: Option<String>,
    /// Skip host key verification
    pub insecure_ignore_host_key: bool,
    /// Do not cross filesystem boundaries while walking
    pub dont_traverse_fs: bool,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("username", &self.username)
            .field("identity", &self.identity)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("private_key_ttl", &self.private_key_ttl)
            .field("auth_sock", &self.auth_sock)
            .field("insecure_ignore_host_key", &self.insecure_ignore_host_key)
            .field("dont_traverse_fs", &self.dont_traverse_fs)
            .finish()
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            username: None,
            identity: None,
            private_key: None,
            private_key_ttl: DEFAULT_PRIVATE_KEY_TTL.to_string(),
            auth_sock: None,
            insecure_ignore_host_key: false,
            dont_traverse_fs: false,
        }
    }
}

fn non_empty(config: &ConfigMap, key: &str) -> Option<String> {
    config
        .get(key)
        .filter(|value| !value.is_empty())
        .cloned()
}

impl ConnectionParams {
    /// Collect connection settings from a configuration map
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed boolean values.
    pub fn from_config(config: &ConfigMap) -> Result<Self> {
        Ok(Self {
            username: non_empty(config, "username"),
            identity: non_empty(config, "identity"),
            private_key: non_empty(config, "ssh_private_key"),
            private_key_ttl: non_empty(config, "ssh_private_key_ttl")
                .unwrap_or_else(|| DEFAULT_PRIVATE_KEY_TTL.to_string()),
            auth_sock: non_empty(config, "ssh_auth_sock"),
            insecure_ignore_host_key: parse_bool(
                "insecure_ignore_host_key",
                config.get("insecure_ignore_host_key"),
            )?,
            dont_traverse_fs: parse_bool("dont_traverse_fs", config.get("dont_traverse_fs"))?,
        })
    }

    /// Resolve the login name for an endpoint
    ///
    /// Returns `None` when neither the location nor the parameters name a
    /// user, leaving the choice to ssh's own configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the location embeds a user *and*
    /// the `username` parameter is set. The two are never reconciled.
    pub fn resolve_user(&self, endpoint: &Endpoint) -> Result<Option<String>> {
        match (&endpoint.user, &self.username) {
            (Some(_), Some(_)) => Err(SyncError::Config(
                "can not use user@host syntax and username parameter".to_string(),
            )),
            (Some(user), None) | (None, Some(user)) => Ok(Some(user.clone())),
            (None, None) => Ok(None),
        }
    }
}

/// Parse `location` from a configuration map
///
/// # Errors
///
/// Returns a configuration error if the key is missing or invalid.
pub fn endpoint_from_config(config: &ConfigMap) -> Result<Endpoint> {
    let location = config
        .get("location")
        .ok_or_else(|| SyncError::Config("missing location".to_string()))?;
    Endpoint::parse(location)
}

fn default_concurrency() -> usize {
    num_cpus::get() * 8
}

/// Runtime options for an import (tree walk)
#[derive(Clone)]
pub struct ImportOptions {
    max_concurrency: usize,
    excludes: Arc<dyn Exclude>,
}

impl ImportOptions {
    /// Create options with the given worker count (clamped to at least 1)
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            excludes: Arc::new(NoExcludes),
        }
    }

    /// Use an exclusion evaluator
    #[must_use]
    pub fn with_excludes(mut self, excludes: impl Exclude + 'static) -> Self {
        self.excludes = Arc::new(excludes);
        self
    }

    /// Number of walker workers
    #[must_use]
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Exclusion evaluator consulted for every path below `/`
    #[must_use]
    pub fn excludes(&self) -> Arc<dyn Exclude> {
        Arc::clone(&self.excludes)
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self::new(default_concurrency())
    }
}

impl fmt::Debug for ImportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportOptions")
            .field("max_concurrency", &self.max_concurrency)
            .finish_non_exhaustive()
    }
}

/// Runtime options for an export (write pipeline)
#[derive(Debug, Clone)]
pub struct ExportOptions {
    max_concurrency: usize,
}

impl ExportOptions {
    /// Create options with the given worker count (clamped to at least 1)
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Number of concurrent file and symlink writes
    #[must_use]
    pub const fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::new(default_concurrency())
    }
}
