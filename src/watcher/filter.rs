//! Path filtering for the watch source.
//!
//! A path is watched when its extension is on the source allow-list and
//! none of its components below the root is an ignored directory.

use std::path::{Component, Path, PathBuf};

use crate::analyzer::AnalyzerKind;

/// Directories never descended into for events.
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    ".venv",
    "venv",
    "dist",
    "build",
    "__pycache__",
];

/// Decides which raw filesystem events reach the coalescer.
#[derive(Debug, Clone)]
pub struct PathFilter {
    root: PathBuf,
    extra_ignored: Vec<PathBuf>,
}

impl PathFilter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extra_ignored: Vec::new(),
        }
    }

    /// Ignore everything under `dir` as well (used for the state directory).
    pub fn ignore_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extra_ignored.push(dir.into());
        self
    }

    pub fn matches(&self, path: &Path) -> bool {
        if !is_source_file(path) {
            return false;
        }
        if self.extra_ignored.iter().any(|dir| path.starts_with(dir)) {
            return false;
        }
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        !relative.components().any(|component| match component {
            Component::Normal(name) => name
                .to_str()
                .is_some_and(|name| IGNORED_DIRS.contains(&name)),
            _ => false,
        })
    }
}

/// True when the extension belongs to any analyzed language family.
pub fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(AnalyzerKind::for_extension)
        .is_some()
}
