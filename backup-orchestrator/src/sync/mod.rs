//! Directory synchronization into the snapshot.
//!
//! Each input directory is mirrored one way into
//! `<snapshot>/dirs/<sanitized source path>`: new and changed entries are
//! copied, destination entries missing from the (filtered) source are
//! deleted. Regular files, directories and symlinks are mirrored; fifos,
//! sockets and device nodes are skipped.

use crate::fs::metadata::{copy_with_metadata, FileMetadata};
use crate::fs::walker::{walk_tree, EntryKind, SourceEntry, WalkOptions};
use crate::utils::naming::{mirror_relative_path, normalize};
use crate::{OrchestratorError, Result};
use nix::unistd::{access, AccessFlags};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Counts for one mirrored directory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped_special: usize,
    pub errors: usize,
}

impl SyncReport {
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.deleted == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Added,
    Updated,
    Unchanged,
}

pub struct DirectorySynchronizer {
    dirs_area: PathBuf,
    options: WalkOptions,
}

impl DirectorySynchronizer {
    pub fn new(dirs_area: impl Into<PathBuf>, exclude_patterns: Vec<String>) -> Self {
        Self {
            dirs_area: dirs_area.into(),
            options: WalkOptions { exclude_patterns },
        }
    }

    /// Where `source` is mirrored inside the snapshot.
    pub fn destination_for(&self, source: &Path) -> PathBuf {
        self.dirs_area.join(mirror_relative_path(&absolute(source)))
    }

    /// Mirror one input directory.
    ///
    /// # Returns
    /// * `Ok(SyncReport)` - The mirror ran; `errors` counts entries that
    ///   could not be read or written
    /// * `Err(InputUnavailable)` - The source is missing, not a directory, or
    ///   not readable and searchable by the running user
    pub fn sync(&self, source: &Path) -> Result<SyncReport> {
        check_source(source)?;
        let dest = self.destination_for(source);
        self.mirror_tree(source, &dest)
    }

    /// Make `dest` an exact mirror of `source` under the filter rules.
    pub fn mirror_tree(&self, source: &Path, dest: &Path) -> Result<SyncReport> {
        ensure_dir(dest)?;

        let outcome = walk_tree(source, &self.options);
        let mut report = SyncReport::default();

        for e in &outcome.errors {
            warn!(source = %source.display(), error = %e, "Cannot read source entry");
        }
        report.errors += outcome.errors.len();

        let mut keep: HashSet<PathBuf> = HashSet::with_capacity(outcome.entries.len());
        // Applied last so restrictive modes do not block filling the tree
        let mut dir_modes: Vec<(PathBuf, u32)> = Vec::new();
        for entry in &outcome.entries {
            let target = dest.join(&entry.relative_path);
            let result = match entry.kind {
                EntryKind::Special => {
                    report.skipped_special += 1;
                    debug!(path = %entry.path.display(), "Skipping special file");
                    continue;
                }
                EntryKind::Dir => {
                    let mode = entry.metadata.permissions().mode();
                    dir_modes.push((target.clone(), mode));
                    sync_dir(&target, mode)
                }
                EntryKind::File => sync_file(entry, &target),
                EntryKind::Symlink => sync_symlink(entry, &target),
            };

            // A failed entry keeps whatever the destination already holds
            keep.insert(entry.relative_path.clone());
            match result {
                Ok(Change::Added) => report.added += 1,
                Ok(Change::Updated) => report.updated += 1,
                Ok(Change::Unchanged) => {}
                Err(e) => {
                    report.errors += 1;
                    warn!(path = %entry.path.display(), error = %e, "Failed to mirror entry");
                }
            }
        }

        if outcome.errors.is_empty() {
            report.deleted = delete_extraneous(dest, &keep, &mut report.errors);
        } else {
            warn!(
                source = %source.display(),
                "Source tree was not fully readable, deletions skipped"
            );
        }

        for (target, mode) in dir_modes.iter().rev() {
            if let Err(e) = fs::set_permissions(target, fs::Permissions::from_mode(*mode)) {
                report.errors += 1;
                warn!(path = %target.display(), error = %e, "Failed to set directory mode");
            }
        }

        Ok(report)
    }
}

/// The source must be a directory the running user can read and search.
pub fn check_source(source: &Path) -> Result<()> {
    let metadata = fs::metadata(source).map_err(|e| {
        OrchestratorError::InputUnavailable(format!("{}: {}", source.display(), e))
    })?;
    if !metadata.is_dir() {
        return Err(OrchestratorError::InputUnavailable(format!(
            "{}: not a directory",
            source.display()
        )));
    }
    access(source, AccessFlags::R_OK | AccessFlags::X_OK).map_err(|e| {
        OrchestratorError::InputUnavailable(format!("{}: {}", source.display(), e))
    })?;
    Ok(())
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return normalize(path);
    }
    match std::env::current_dir() {
        Ok(cwd) => normalize(&cwd.join(path)),
        Err(_) => normalize(path),
    }
}

fn ensure_dir(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(m) if m.is_dir() => Ok(()),
        Ok(_) => {
            remove_path(path)?;
            fs::create_dir_all(path)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(path),
        Err(e) => Err(e),
    }
}

/// `mode` is the source directory's mode. An existing copy is made owner
/// writable until the final mode pass.
fn sync_dir(target: &Path, mode: u32) -> io::Result<Change> {
    match fs::symlink_metadata(target) {
        Ok(m) if m.is_dir() => {
            let current = m.permissions().mode();
            if current & 0o700 != 0o700 {
                fs::set_permissions(target, fs::Permissions::from_mode(current | 0o700))?;
            }
            if current & 0o7777 == mode & 0o7777 {
                Ok(Change::Unchanged)
            } else {
                Ok(Change::Updated)
            }
        }
        Ok(_) => {
            remove_path(target)?;
            fs::create_dir_all(target)?;
            Ok(Change::Updated)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(target)?;
            Ok(Change::Added)
        }
        Err(e) => Err(e),
    }
}

fn sync_file(entry: &SourceEntry, target: &Path) -> io::Result<Change> {
    let source_meta = FileMetadata::from_metadata(&entry.metadata)?;
    match fs::symlink_metadata(target) {
        Ok(m) if m.is_file() => {
            let copy_meta = FileMetadata::from_metadata(&m)?;
            if source_meta.is_current(&copy_meta) {
                if source_meta.permissions == copy_meta.permissions {
                    return Ok(Change::Unchanged);
                }
                fs::set_permissions(target, fs::Permissions::from_mode(source_meta.permissions))?;
                return Ok(Change::Updated);
            }
            remove_path(target)?;
            copy_with_metadata(&entry.path, target, &source_meta)?;
            Ok(Change::Updated)
        }
        Ok(_) => {
            remove_path(target)?;
            copy_with_metadata(&entry.path, target, &source_meta)?;
            Ok(Change::Updated)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            copy_with_metadata(&entry.path, target, &source_meta)?;
            Ok(Change::Added)
        }
        Err(e) => Err(e),
    }
}

fn sync_symlink(entry: &SourceEntry, target: &Path) -> io::Result<Change> {
    let link = fs::read_link(&entry.path)?;
    match fs::symlink_metadata(target) {
        Ok(m) if m.file_type().is_symlink() => {
            if fs::read_link(target)? == link {
                return Ok(Change::Unchanged);
            }
            fs::remove_file(target)?;
            std::os::unix::fs::symlink(&link, target)?;
            Ok(Change::Updated)
        }
        Ok(_) => {
            remove_path(target)?;
            std::os::unix::fs::symlink(&link, target)?;
            Ok(Change::Updated)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            std::os::unix::fs::symlink(&link, target)?;
            Ok(Change::Added)
        }
        Err(e) => Err(e),
    }
}

/// Delete every destination entry whose relative path is not in `keep`.
/// Children are visited before their parent.
fn delete_extraneous(dest: &Path, keep: &HashSet<PathBuf>, errors: &mut usize) -> usize {
    let mut deleted = 0;

    for entry in WalkDir::new(dest).min_depth(1).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                *errors += 1;
                warn!(dest = %dest.display(), error = %e, "Cannot list destination entry");
                continue;
            }
        };
        let relative = entry.path().strip_prefix(dest).unwrap_or(entry.path());
        if keep.contains(relative) {
            continue;
        }
        match remove_path(entry.path()) {
            Ok(()) => {
                deleted += 1;
                debug!(path = %entry.path().display(), "Deleted entry absent from source");
            }
            Err(e) => {
                *errors += 1;
                warn!(path = %entry.path().display(), error = %e, "Failed to delete entry");
            }
        }
    }

    deleted
}

fn remove_path(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(m) if m.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
