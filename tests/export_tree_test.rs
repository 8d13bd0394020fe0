//! End-to-end import/export tests over the local backend
//!
//! Walks a real directory tree with the importer and recreates it with the
//! exporter, then compares both trees entry by entry.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

mod common;
use common::{build_sample_tree, export_local, mirrored, test_timeout_guard};

fn assert_trees_match(source: &Path, copy: &Path) {
    for entry in WalkDir::new(source) {
        let entry = entry.expect("walk source");
        let relative = entry.path().strip_prefix(source).expect("under source");
        let copied = copy.join(relative);

        let src_meta = fs::symlink_metadata(entry.path()).expect("source metadata");
        let dst_meta = fs::symlink_metadata(&copied)
            .unwrap_or_else(|e| panic!("{} missing from copy: {e}", copied.display()));

        assert_eq!(
            src_meta.file_type().is_dir(),
            dst_meta.file_type().is_dir(),
            "{}: directory type mismatch",
            relative.display()
        );
        assert_eq!(
            src_meta.file_type().is_symlink(),
            dst_meta.file_type().is_symlink(),
            "{}: symlink type mismatch",
            relative.display()
        );

        if src_meta.file_type().is_symlink() {
            assert_eq!(
                fs::read_link(entry.path()).expect("source link"),
                fs::read_link(&copied).expect("copied link"),
                "{}: symlink target mismatch",
                relative.display()
            );
            continue;
        }

        assert_eq!(
            src_meta.permissions().mode() & 0o7777,
            dst_meta.permissions().mode() & 0o7777,
            "{}: permissions not preserved",
            relative.display()
        );
        if src_meta.is_file() {
            assert_eq!(
                fs::read(entry.path()).expect("source content"),
                fs::read(&copied).expect("copied content"),
                "{}: content mismatch",
                relative.display()
            );
        }
    }
}

fn leftover_temp_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().as_bytes().windows(5).any(|w| w == b".tmp."))
        .map(walkdir::DirEntry::into_path)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_export_recreates_tree() {
    let _guard = test_timeout_guard(Duration::from_secs(60));
    let src_dir = TempDir::new().expect("source tempdir");
    let dst_dir = TempDir::new().expect("destination tempdir");
    let source = src_dir.path().join("tree");
    build_sample_tree(&source);

    let (stats, results) = export_local(&source, dst_dir.path(), 4).await;

    let failures: Vec<_> = results.iter().filter(|r| !r.is_ok()).collect();
    assert!(failures.is_empty(), "unexpected failures: {failures:?}");
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.symlinks, 1);
    assert_eq!(stats.hardlinks, 1);
    // top.txt, readme.md, deep.bin, tool and the first of the shared pair
    assert_eq!(stats.files, 5);

    let copy = mirrored(dst_dir.path(), &source);
    assert_trees_match(&source, &copy);
    assert!(leftover_temp_files(dst_dir.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_record_gets_exactly_one_result() {
    let _guard = test_timeout_guard(Duration::from_secs(60));
    let src_dir = TempDir::new().expect("source tempdir");
    let dst_dir = TempDir::new().expect("destination tempdir");
    let source = src_dir.path().join("tree");
    build_sample_tree(&source);

    let (_, results) = export_local(&source, dst_dir.path(), 2).await;

    let mut seen = HashSet::new();
    for result in &results {
        assert!(
            seen.insert(result.pathname.clone()),
            "{} answered twice",
            result.pathname.display()
        );
    }
    for entry in WalkDir::new(&source) {
        let path = entry.expect("walk").into_path();
        assert!(seen.contains(&path), "{} never answered", path.display());
    }
    assert!(seen.contains(Path::new("/")), "ancestors are exported too");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hardlinks_share_an_inode() {
    let _guard = test_timeout_guard(Duration::from_secs(60));
    let src_dir = TempDir::new().expect("source tempdir");
    let dst_dir = TempDir::new().expect("destination tempdir");
    let source = src_dir.path().join("links");
    fs::create_dir(&source).expect("mkdir");
    fs::write(source.join("original"), b"one copy only").expect("write");
    for i in 0..8 {
        fs::hard_link(source.join("original"), source.join(format!("alias-{i}"))).expect("link");
    }

    let (stats, _) = export_local(&source, dst_dir.path(), 8).await;
    assert_eq!(stats.files, 1);
    assert_eq!(stats.hardlinks, 8);

    let copy = mirrored(dst_dir.path(), &source);
    let inode = fs::metadata(copy.join("original")).expect("original").ino();
    for i in 0..8 {
        let alias = fs::metadata(copy.join(format!("alias-{i}"))).expect("alias");
        assert_eq!(alias.ino(), inode);
    }
    assert_eq!(
        fs::metadata(copy.join("original")).expect("original").nlink(),
        9
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_export_into_same_tree_succeeds() {
    let _guard = test_timeout_guard(Duration::from_secs(60));
    let src_dir = TempDir::new().expect("source tempdir");
    let dst_dir = TempDir::new().expect("destination tempdir");
    let source = src_dir.path().join("tree");
    build_sample_tree(&source);

    export_local(&source, dst_dir.path(), 4).await;
    fs::write(source.join("top.txt"), b"changed\n").expect("rewrite");
    let (stats, results) = export_local(&source, dst_dir.path(), 4).await;

    let failures: Vec<_> = results.iter().filter(|r| !r.is_ok()).collect();
    assert!(failures.is_empty(), "unexpected failures: {failures:?}");
    assert_eq!(stats.errors, 0);

    let copy = mirrored(dst_dir.path(), &source);
    assert_eq!(fs::read(copy.join("top.txt")).expect("read"), b"changed\n");
    assert_trees_match(&source, &copy);
    assert!(leftover_temp_files(dst_dir.path()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_non_utf8_names_are_copied_byte_exact() {
    let _guard = test_timeout_guard(Duration::from_secs(60));
    let src_dir = TempDir::new().expect("source tempdir");
    let dst_dir = TempDir::new().expect("destination tempdir");
    let source = src_dir.path().join("tree");
    let odd_dir = source.join(OsStr::from_bytes(b"dir\xff"));
    let odd_file = source.join(OsStr::from_bytes(b"file\xfe"));
    fs::create_dir_all(&odd_dir).expect("mkdir");
    fs::write(odd_dir.join("inner.txt"), b"inside").expect("write inner");
    fs::write(&odd_file, b"latin-1 name").expect("write file");

    let (stats, results) = export_local(&source, dst_dir.path(), 4).await;

    let failures: Vec<_> = results.iter().filter(|r| !r.is_ok()).collect();
    assert!(failures.is_empty(), "unexpected failures: {failures:?}");
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.files, 2);

    let copy = mirrored(dst_dir.path(), &source);
    let copied_dir = copy.join(OsStr::from_bytes(b"dir\xff"));
    assert!(copied_dir.is_dir());
    assert_eq!(fs::read(copied_dir.join("inner.txt")).expect("read inner"), b"inside");
    assert_eq!(
        fs::read(copy.join(OsStr::from_bytes(b"file\xfe"))).expect("read file"),
        b"latin-1 name"
    );
    assert_trees_match(&source, &copy);

    // No name was rewritten with U+FFFD
    let replaced: Vec<_> = WalkDir::new(dst_dir.path())
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| {
            e.file_name()
                .as_bytes()
                .windows(3)
                .any(|w| w == "\u{fffd}".as_bytes())
        })
        .collect();
    assert!(replaced.is_empty(), "names were altered: {replaced:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_symlink_root_exports_without_errors() {
    let _guard = test_timeout_guard(Duration::from_secs(60));
    let src_dir = TempDir::new().expect("source tempdir");
    let dst_dir = TempDir::new().expect("destination tempdir");
    let real = src_dir.path().join("real");
    fs::create_dir(&real).expect("mkdir");
    fs::write(real.join("data.txt"), b"behind a link").expect("write");
    let link = src_dir.path().join("links").join("alias");
    fs::create_dir(src_dir.path().join("links")).expect("mkdir links");
    std::os::unix::fs::symlink(&real, &link).expect("symlink");

    let (stats, results) = export_local(&link, dst_dir.path(), 4).await;

    let failures: Vec<_> = results.iter().filter(|r| !r.is_ok()).collect();
    assert!(failures.is_empty(), "unexpected failures: {failures:?}");
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.symlinks, 1);
    assert_eq!(
        fs::read_link(mirrored(dst_dir.path(), &link)).expect("copied link"),
        real
    );
    assert_eq!(
        fs::read(mirrored(dst_dir.path(), &real).join("data.txt")).expect("read"),
        b"behind a link"
    );
}
