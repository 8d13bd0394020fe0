use sftpsync::config::{ConnectionParams, Endpoint, ExportOptions, ImportOptions};
use sftpsync::exporter::Exporter;
use sftpsync::fs::LocalFs;
use sftpsync::importer::Importer;
use sftpsync::record::{Record, RecordResult};
use sftpsync::stats::ExportStats;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[allow(dead_code)]
pub struct TestTimeoutGuard {
    cancelled: Arc<AtomicBool>,
}

impl Drop for TestTimeoutGuard {
    fn drop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[allow(dead_code)]
pub fn test_timeout_guard(duration: Duration) -> TestTimeoutGuard {
    let cancelled = Arc::new(AtomicBool::new(false));
    let cancelled_clone = Arc::clone(&cancelled);
    std::thread::spawn(move || {
        std::thread::sleep(duration);
        if !cancelled_clone.load(Ordering::SeqCst) {
            eprintln!("Test timeout exceeded ({}s). Aborting.", duration.as_secs());
            std::process::abort();
        }
    });
    TestTimeoutGuard { cancelled }
}

/// `file://` location for a local directory
#[allow(dead_code)]
pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

/// Where an exported copy of `source` lands under `dest_root`
///
/// Records carry absolute source paths, so the copy mirrors the full path.
#[allow(dead_code)]
pub fn mirrored(dest_root: &Path, source: &Path) -> PathBuf {
    dest_root.join(source.strip_prefix("/").unwrap_or(source))
}

/// Populate `root` with a small tree covering every entry kind
///
/// ```text
/// root/
///   top.txt
///   docs/readme.md        (0640)
///   docs/nested/deep.bin
///   bin/tool              (04755)
///   link-to-docs -> docs
///   shared-a, shared-b    (one inode)
/// ```
#[allow(dead_code)]
pub fn build_sample_tree(root: &Path) {
    fs::create_dir_all(root.join("docs/nested")).expect("mkdir docs");
    fs::create_dir_all(root.join("bin")).expect("mkdir bin");
    fs::write(root.join("top.txt"), b"top level\n").expect("write top");
    fs::write(root.join("docs/readme.md"), b"# readme\n").expect("write readme");
    fs::set_permissions(root.join("docs/readme.md"), fs::Permissions::from_mode(0o640))
        .expect("chmod readme");
    fs::write(root.join("docs/nested/deep.bin"), vec![7u8; 200_000]).expect("write deep");
    fs::write(root.join("bin/tool"), b"#!/bin/sh\necho hi\n").expect("write tool");
    fs::set_permissions(root.join("bin/tool"), fs::Permissions::from_mode(0o4755))
        .expect("chmod tool");
    std::os::unix::fs::symlink("docs", root.join("link-to-docs")).expect("symlink");
    fs::write(root.join("shared-a"), b"shared content").expect("write shared");
    fs::hard_link(root.join("shared-a"), root.join("shared-b")).expect("hard link");
}

/// Walk `source` and export it under `dest` with local backends on both sides
#[allow(dead_code)]
pub async fn export_local(
    source: &Path,
    dest: &Path,
    workers: usize,
) -> (ExportStats, Vec<RecordResult>) {
    let importer = Importer::with_fs(
        LocalFs::new(),
        Endpoint::parse(&file_url(source)).expect("source location"),
        &ConnectionParams::default(),
        ImportOptions::new(workers),
    );
    let exporter = Exporter::with_fs(
        LocalFs::new(),
        Endpoint::parse(&file_url(dest)).expect("destination location"),
        ExportOptions::new(workers),
    );

    let (records_tx, records_rx) = mpsc::channel::<Record>(64);
    let (results_tx, mut results_rx) = mpsc::channel::<RecordResult>(64);
    let cancel = CancellationToken::new();
    let collect = async {
        let mut results = Vec::new();
        while let Some(result) = results_rx.recv().await {
            results.push(result);
        }
        results
    };

    let (walked, exported, results) = tokio::join!(
        importer.import(records_tx, cancel.clone()),
        exporter.export(records_rx, results_tx, cancel),
        collect
    );
    walked.expect("walk");
    (exported.expect("export"), results)
}
