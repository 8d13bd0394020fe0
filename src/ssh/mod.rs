//! ssh transport
//!
//! Sessions are opened by running the system `ssh` client in batch mode and
//! speaking sftp over its stdio. A persistent control master per endpoint
//! carries authentication, so opening further sessions is cheap.
//!
//! # Architecture
//!
//! ```text
//! SessionFactory::connect
//!     ↓ ssh-add -t <ttl> -          (only with inline key material)
//! ControlSocketManager::ensure_master
//!     ↓ ssh -O check / ssh -M -N -f  (serialized per control socket)
//! ssh -S <sock> host -s sftp
//!     ↓ stdin/stdout
//! SftpClient
//! ```

mod agent;
mod args;
mod control;
mod session;

pub use agent::add_private_key;
pub use args::{control_path, SshTarget};
pub use control::{ControlSocketManager, MasterControl, SshMaster};
pub use session::{connect, SessionFactory};
