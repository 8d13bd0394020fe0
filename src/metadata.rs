//! File metadata carried by records
//!
//! `FileInfo` is the backend-neutral view of an lstat result. The `mode`
//! field holds raw POSIX `st_mode` bits (file type and permissions), which is
//! exactly what SFTP v3 transmits in its permissions attribute.
//!
//! Names and paths are `OsString`/`PathBuf`: on Unix they are the raw bytes
//! the filesystem returned, whether or not those bytes are UTF-8.

use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};

/// Mask for the file type bits of `st_mode`
pub const S_IFMT: u32 = 0o170_000;
/// Directory file type
pub const S_IFDIR: u32 = 0o040_000;
/// Regular file type
pub const S_IFREG: u32 = 0o100_000;
/// Symbolic link file type
pub const S_IFLNK: u32 = 0o120_000;

/// Set-user-ID bit
pub const S_ISUID: u32 = 0o4000;
/// Set-group-ID bit
pub const S_ISGID: u32 = 0o2000;
/// Sticky bit
pub const S_ISVTX: u32 = 0o1000;

/// Permission bits including setuid, setgid and sticky
pub const MODE_PERMISSIONS_MASK: u32 = 0o7777;

/// Filesystem metadata for one entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// Base name of the entry
    pub name: OsString,
    /// Size in bytes
    pub size: u64,
    /// Raw `st_mode` (type and permission bits)
    pub mode: u32,
    /// Owner user id
    pub uid: u32,
    /// Owner group id
    pub gid: u32,
    /// Modification time, seconds since the epoch
    pub mtime: u64,
    /// Device id (0 when the backend cannot report it)
    pub dev: u64,
    /// Inode number (0 when the backend cannot report it)
    pub ino: u64,
    /// Hard link count (1 when the backend cannot report it)
    pub nlink: u64,
}

impl FileInfo {
    /// Synthetic directory metadata used when an ancestor cannot be stat'ed
    #[must_use]
    pub fn synthetic_directory(name: &OsStr) -> Self {
        Self {
            name: name.to_os_string(),
            mode: S_IFDIR | 0o755,
            nlink: 1,
            ..Self::default()
        }
    }

    /// Check if this entry is a directory
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Check if this entry is a regular file
    #[must_use]
    pub const fn is_regular(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    /// Check if this entry is a symbolic link
    #[must_use]
    pub const fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Permission bits to apply on the destination
    ///
    /// Keeps setuid (04000), setgid (02000) and sticky (01000) alongside the
    /// rwx bits; the file type bits are dropped.
    #[must_use]
    pub const fn permissions(&self) -> u32 {
        self.mode & MODE_PERMISSIONS_MASK
    }

    /// Check whether this entry may share its content with other paths
    #[must_use]
    pub const fn is_hardlink_candidate(&self) -> bool {
        self.is_regular() && self.nlink > 1
    }
}

/// Final path component (`/` for the root)
#[must_use]
pub fn base_name(path: &Path) -> &OsStr {
    path.file_name().unwrap_or_else(|| OsStr::new("/"))
}

/// Parent directory of a path
///
/// Mirrors `dirname(3)`: the parent of `/` is `/`, and a relative path
/// without slashes has parent `.`.
#[must_use]
pub fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => PathBuf::from("."),
        Some(parent) => parent.to_path_buf(),
        None if path.has_root() => PathBuf::from("/"),
        None => PathBuf::from("."),
    }
}

/// Join two paths and normalise `.`/`..` and duplicate slashes
///
/// An absolute `child` is appended under `base` rather than replacing it,
/// so `join_path("/backup", "/etc/hosts")` gives `/backup/etc/hosts`.
#[must_use]
pub fn join_path(base: &Path, child: &Path) -> PathBuf {
    let mut joined = base.as_os_str().to_os_string();
    joined.push("/");
    joined.push(child.as_os_str());
    clean_path(Path::new(&joined))
}

/// Lexically clean a path
#[must_use]
pub fn clean_path(path: &Path) -> PathBuf {
    let absolute = path.has_root();
    let mut parts: Vec<&OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if parts.last().is_some_and(|p| *p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push(OsStr::new(".."));
                }
            }
            Component::Normal(name) => parts.push(name),
        }
    }

    let mut cleaned = if absolute {
        PathBuf::from("/")
    } else if parts.is_empty() {
        PathBuf::from(".")
    } else {
        PathBuf::new()
    };
    cleaned.extend(parts);
    cleaned
}
