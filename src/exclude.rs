//! Exclusion rules for the tree walker
//!
//! The walker asks an [`Exclude`] implementation about every path it
//! discovers. An excluded directory is not listed, so nothing beneath it is
//! ever visited.

use crate::metadata::clean_path;
use std::path::{Path, PathBuf};

/// Decides whether a path is left out of an import
pub trait Exclude: Send + Sync {
    /// Return `true` to drop `path` (and, for a directory, its subtree)
    fn is_excluded(&self, path: &Path, is_dir: bool) -> bool;
}

/// Exclude nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExcludes;

impl Exclude for NoExcludes {
    fn is_excluded(&self, _path: &Path, _is_dir: bool) -> bool {
        false
    }
}

impl<F> Exclude for F
where
    F: Fn(&Path, bool) -> bool + Send + Sync,
{
    fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        self(path, is_dir)
    }
}

/// Exclude a set of absolute paths and everything beneath them
#[derive(Debug, Clone, Default)]
pub struct PathExcludes {
    paths: Vec<PathBuf>,
}

impl PathExcludes {
    /// Build from absolute paths
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            paths: paths
                .into_iter()
                .map(|p| clean_path(p.as_ref()))
                .filter(|p| p != Path::new("/"))
                .collect(),
        }
    }

    /// Whether no paths are excluded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Exclude for PathExcludes {
    fn is_excluded(&self, path: &Path, _is_dir: bool) -> bool {
        // Component-wise, so /var/cache does not cover /var/cached
        self.paths.iter().any(|rule| path.starts_with(rule))
    }
}
