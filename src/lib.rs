//! sftpsync - concurrent import and export of directory trees over ssh/sftp
//!
//! An [`importer::Importer`] walks a remote (or local) tree and streams one
//! [`record::Record`] per entry. An [`exporter::Exporter`] consumes such a
//! stream and recreates the tree on another target, answering every record
//! with exactly one [`record::RecordResult`]. Both share a single ssh master
//! connection per target through [`ssh::ControlSocketManager`].

pub mod atomic;
pub mod cli;
pub mod config;
pub mod error;
pub mod exclude;
pub mod exporter;
pub mod fs;
pub mod hardlink_tracker;
pub mod importer;
pub mod metadata;
pub mod record;
pub mod sftp;
pub mod ssh;
pub mod stats;
