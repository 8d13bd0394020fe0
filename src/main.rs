use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use sftpsync::cli::{to_config_map, Args, Command, ConcurrencyConfig, OutputConfig, SourceConfig};
use sftpsync::exporter::Exporter;
use sftpsync::importer::Importer;
use sftpsync::record::{Record, RecordResult};
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Capacity of the record and result channels
const CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.output);

    if let Err(e) = args.validate() {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(args).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            warn!("{failed} entries failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(output: &OutputConfig) {
    let filter = EnvFilter::builder()
        .with_default_directive(output.level().into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Cancel `token` on Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping");
            token.cancel();
        }
    });
}

/// Run the selected command, returning the number of failed entries
async fn run(args: Args) -> Result<u64> {
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    match &args.command {
        Command::Import { location, source } => {
            import(location, source, &args.concurrency, cancel).await
        }
        Command::Export {
            source,
            destination,
            source_config,
            dest_options,
        } => {
            export(
                source,
                source_config,
                destination,
                dest_options,
                &args,
                cancel,
            )
            .await
        }
    }
}

/// Print one listing line, with names written as their raw bytes
fn print_record(out: &mut impl Write, record: &Record) -> std::io::Result<()> {
    let info = &record.info;
    write!(out, "{:06o} {:>12} ", info.mode, info.size)?;
    out.write_all(record.pathname.as_os_str().as_bytes())?;
    if !record.target.as_os_str().is_empty() {
        out.write_all(b" -> ")?;
        out.write_all(record.target.as_os_str().as_bytes())?;
    }
    out.write_all(b"\n")
}

async fn import(
    location: &str,
    source: &SourceConfig,
    concurrency: &ConcurrencyConfig,
    cancel: CancellationToken,
) -> Result<u64> {
    let config = to_config_map(location, &source.options);
    let importer = Importer::connect(&config, concurrency.import_options(source))
        .await
        .with_context(|| format!("failed to open {location}"))?;
    info!("importing {} from {}", importer.root().display(), importer.type_name());

    let (tx, mut rx) = mpsc::channel::<Record>(CHANNEL_CAPACITY);
    let print = async {
        let mut failed = 0u64;
        let stdout = std::io::stdout();
        while let Some(record) = rx.recv().await {
            if let Some(err) = &record.error {
                warn!("{}: {}", record.pathname.display(), err);
                failed += 1;
                continue;
            }
            print_record(&mut stdout.lock(), &record)?;
        }
        stdout.lock().flush()?;
        Ok::<_, std::io::Error>(failed)
    };

    let (walked, printed) = tokio::join!(importer.import(tx, cancel), print);
    walked.context("walk failed")?;
    let failed = printed.context("failed to write to stdout")?;
    debug!("root resolved to {}", importer.root().display());
    Ok(failed)
}

fn spinner(output: &OutputConfig) -> ProgressBar {
    if !output.progress || output.quiet {
        return ProgressBar::hidden();
    }
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {pos} entries {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

async fn export(
    source: &str,
    source_config: &SourceConfig,
    destination: &str,
    dest_options: &[(String, String)],
    args: &Args,
    cancel: CancellationToken,
) -> Result<u64> {
    let importer = Importer::connect(
        &to_config_map(source, &source_config.options),
        args.concurrency.import_options(source_config),
    )
    .await
    .with_context(|| format!("failed to open source {source}"))?;
    let exporter = Exporter::connect(
        &to_config_map(destination, dest_options),
        args.concurrency.export_options(),
    )
    .await
    .with_context(|| format!("failed to open destination {destination}"))?;
    info!(
        "exporting {}:{} ({}) to {}:{} ({})",
        importer.origin(),
        importer.root().display(),
        importer.type_name(),
        exporter.origin(),
        exporter.root().display(),
        exporter.type_name()
    );

    let progress = spinner(&args.output);
    let (records_tx, records_rx) = mpsc::channel::<Record>(CHANNEL_CAPACITY);
    let (results_tx, mut results_rx) = mpsc::channel::<RecordResult>(CHANNEL_CAPACITY);
    let collect = async {
        let mut failed = 0u64;
        while let Some(result) = results_rx.recv().await {
            if let Some(err) = &result.error {
                progress.suspend(|| warn!("{}: {}", result.pathname.display(), err));
                failed += 1;
            }
            progress.inc(1);
        }
        failed
    };

    let (walked, exported, failed) = tokio::join!(
        importer.import(records_tx, cancel.clone()),
        exporter.export(records_rx, results_tx, cancel),
        collect
    );
    progress.finish_and_clear();

    walked.context("walk failed")?;
    let stats = exported.context("export failed")?;
    let links = exporter.hardlink_stats();
    debug!(
        "hardlink groups: {}, followers linked: {}",
        links.groups, links.followers
    );
    if !args.output.quiet {
        eprintln!("{stats}");
    }
    Ok(failed)
}
