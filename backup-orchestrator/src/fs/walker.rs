//! Directory traversal for mirroring.
//!
//! Walks a source tree without following symlinks, classifies every entry and
//! prunes entries matched by the filter rules. Read errors are collected
//! rather than aborting the walk, so the caller can decide what a partial
//! listing means.

use std::fs::{FileType, Metadata};
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for directory walking
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Exclude patterns matched against file names
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
    /// Fifos, sockets and device nodes
    Special,
}

impl EntryKind {
    pub fn from_file_type(file_type: FileType) -> Self {
        if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Dir
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Special
        }
    }
}

/// Information about an entry discovered during walking
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    pub kind: EntryKind,

    /// Metadata of the entry itself (symlinks are not followed)
    pub metadata: Metadata,
}

/// Entries found plus the errors met while reading the tree.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    pub entries: Vec<SourceEntry>,
    pub errors: Vec<walkdir::Error>,
}

/// Walk everything below `root` (the root itself is not listed), parents
/// before children, siblings sorted by name.
pub fn walk_tree(root: &Path, options: &WalkOptions) -> WalkOutcome {
    let mut outcome = WalkOutcome::default();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !should_exclude(entry, &options.exclude_patterns));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                outcome.errors.push(e);
                continue;
            }
        };

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                outcome.errors.push(e);
                continue;
            }
        };

        let relative_path = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_path_buf();

        outcome.entries.push(SourceEntry {
            path: entry.path().to_path_buf(),
            relative_path,
            kind: EntryKind::from_file_type(entry.file_type()),
            metadata,
        });
    }

    outcome
}

/// Check if a directory entry should be excluded based on patterns
fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    // The root is never filtered
    if entry.depth() == 0 {
        return false;
    }
    let file_name = entry.file_name().to_string_lossy();
    patterns.iter().any(|pattern| matches_pattern(&file_name, pattern))
}

/// `name` matches exactly, or `*suffix` / `prefix*` match by suffix/prefix.
pub fn matches_pattern(name: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('*') {
        name.ends_with(suffix)
    } else if let Some(prefix) = pattern.strip_suffix('*') {
        name.starts_with(prefix)
    } else {
        name == pattern
    }
}
