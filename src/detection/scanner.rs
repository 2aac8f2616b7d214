//! Candidate file enumeration below a program or package path.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::config::DetectionConfig;

/// List test-like source files below `root`, sorted for deterministic
/// evidence order.
///
/// A file path that matches `pattern` is scanned on its own; any other file
/// path (a program binary or main source file) stands for its directory.
/// Missing roots and traversal errors yield fewer candidates, never an error.
#[must_use]
pub fn enumerate_candidates(
    root: &Path,
    pattern: &glob::Pattern,
    config: &DetectionConfig,
) -> Vec<PathBuf> {
    if root.is_file() {
        if matches_pattern(root, pattern) {
            return vec![root.to_path_buf()];
        }
        return match root.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                walk(parent, pattern, config)
            }
            _ => Vec::new(),
        };
    }

    if !root.is_dir() {
        return Vec::new();
    }

    walk(root, pattern, config)
}

fn walk(dir: &Path, pattern: &glob::Pattern, config: &DetectionConfig) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let walker = WalkDir::new(dir)
        .follow_links(false)
        .max_depth(config.max_depth)
        .into_iter()
        .filter_entry(|entry| !is_excluded_dir(entry, &config.exclude_dirs));

    for entry in walker {
        match entry {
            Ok(e) => {
                if e.file_type().is_file() && matches_pattern(e.path(), pattern) {
                    files.push(e.into_path());
                }
            }
            Err(err) => {
                warn!(%err, root = %dir.display(), "skipping unreadable directory entry");
            }
        }
    }

    files.sort();
    files
}

fn is_excluded_dir(entry: &DirEntry, exclude_dirs: &[String]) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| exclude_dirs.iter().any(|d| d == name))
}

fn matches_pattern(path: &Path, pattern: &glob::Pattern) -> bool {
    path.file_name()
        .and_then(OsStr::to_str)
        .is_some_and(|name| pattern.matches(name))
}
