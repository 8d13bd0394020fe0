//! Command-line interface definitions
//!
//! This module organizes CLI arguments by **functional usage** - each group
//! contains the options needed by a specific component or subsystem.

use crate::config::{ConfigMap, ExportOptions, ImportOptions};
use crate::exclude::PathExcludes;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

/// Import and export directory trees over multiplexed ssh/sftp sessions
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// What to do
    #[command(subcommand)]
    pub command: Command,

    /// Concurrency control configuration
    #[command(flatten)]
    pub concurrency: ConcurrencyConfig,

    /// Output and logging configuration
    #[command(flatten)]
    pub output: OutputConfig,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Walk LOCATION and print one line per discovered entry
    Import {
        /// `sftp://[user@]host[:port]/path` or `file:///path`
        #[arg(value_name = "LOCATION")]
        location: String,

        /// Connector options and exclusions for LOCATION
        #[command(flatten)]
        source: SourceConfig,
    },

    /// Walk SOURCE and recreate the tree under DESTINATION
    Export {
        /// Location to walk
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Location to write into
        #[arg(value_name = "DESTINATION")]
        destination: String,

        /// Connector options and exclusions for SOURCE
        #[command(flatten)]
        source_config: SourceConfig,

        /// Connector option for DESTINATION (repeatable)
        #[arg(
            short = 'O',
            long = "dest-option",
            value_name = "KEY=VALUE",
            value_parser = parse_key_value
        )]
        dest_options: Vec<(String, String)>,
    },
}

// ============================================================================
// FUNCTIONAL GROUPS: Organized by what component consumes them
// ============================================================================

/// Source side connector configuration
///
/// Used by: `Importer::connect()`
#[derive(clap::Args, Debug, Clone, Default)]
#[command(next_help_heading = "Connector Options")]
pub struct SourceConfig {
    /// Connector option such as `username=alice` or `dont_traverse_fs=true` (repeatable)
    #[arg(
        short = 'o',
        long = "option",
        value_name = "KEY=VALUE",
        value_parser = parse_key_value
    )]
    pub options: Vec<(String, String)>,

    /// Skip an absolute path and everything beneath it (repeatable)
    #[arg(long, value_name = "PATH")]
    pub exclude: Vec<PathBuf>,
}

/// Concurrency control configuration
///
/// Used by: `Importer` walker pool, `Exporter` write pipeline
#[derive(clap::Args, Debug, Clone, Default)]
#[command(next_help_heading = "Concurrency Control")]
pub struct ConcurrencyConfig {
    /// Maximum concurrent walker workers and in-flight writes
    ///
    /// Default: 8 per CPU core
    #[arg(long, global = true, value_name = "N")]
    pub max_concurrency: Option<usize>,
}

impl ConcurrencyConfig {
    /// Walker options for a source with the given exclusions
    #[must_use]
    pub fn import_options(&self, source: &SourceConfig) -> ImportOptions {
        let options = self
            .max_concurrency
            .map_or_else(ImportOptions::default, ImportOptions::new);
        let excludes = PathExcludes::new(&source.exclude);
        if excludes.is_empty() {
            options
        } else {
            options.with_excludes(excludes)
        }
    }

    /// Write pipeline options
    #[must_use]
    pub fn export_options(&self) -> ExportOptions {
        self.max_concurrency
            .map_or_else(ExportOptions::default, ExportOptions::new)
    }
}

/// Output and logging configuration
///
/// Used by: `main()`, logging initialization, progress display
#[derive(clap::Args, Debug, Clone, Default)]
#[command(next_help_heading = "Output Options")]
pub struct OutputConfig {
    /// Show a progress spinner while exporting
    #[arg(long, global = true)]
    pub progress: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress all output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

impl OutputConfig {
    /// Log level implied by `-v` / `-q`
    #[must_use]
    pub const fn level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::ERROR;
        }
        match self.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

/// Parse a `key=value` connector option
fn parse_key_value(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Build a connector configuration map for `location`
///
/// Later options override earlier ones with the same key.
#[must_use]
pub fn to_config_map(location: &str, options: &[(String, String)]) -> ConfigMap {
    let mut config: ConfigMap = options.iter().cloned().collect();
    config.insert("location".to_string(), location.to_string());
    config
}

// ============================================================================
// IMPLEMENTATION: Convenience methods and validation
// ============================================================================

fn validate_options(which: &str, options: &[(String, String)]) -> Result<()> {
    if options.iter().any(|(key, _)| key == "location") {
        anyhow::bail!("{which} location is given positionally, not as -o location=...");
    }
    Ok(())
}

impl Args {
    /// Validate command-line arguments
    ///
    /// # Errors
    ///
    /// This function will return an error if:
    /// - Both `--quiet` and `--verbose` are given
    /// - `--max-concurrency` is zero
    /// - `location` is passed as a connector option
    /// - An `--exclude` path is not absolute
    pub fn validate(&self) -> Result<()> {
        if self.output.quiet && self.output.verbose > 0 {
            anyhow::bail!("Cannot use both --quiet and --verbose options");
        }

        if self.concurrency.max_concurrency == Some(0) {
            anyhow::bail!("--max-concurrency must be at least 1");
        }

        let source = match &self.command {
            Command::Import { source, .. } => source,
            Command::Export {
                source_config,
                dest_options,
                ..
            } => {
                validate_options("destination", dest_options)?;
                source_config
            }
        };
        validate_options("source", &source.options)?;

        if let Some(path) = source.exclude.iter().find(|p| !p.is_absolute()) {
            anyhow::bail!("Exclude paths must be absolute, got: {}", path.display());
        }

        Ok(())
    }

    /// Get verbose level (convenience method)
    #[must_use]
    pub const fn verbose(&self) -> u8 {
        self.output.verbose
    }

    /// Check if quiet mode is enabled (convenience method)
    #[must_use]
    pub const fn quiet(&self) -> bool {
        self.output.quiet
    }
}
