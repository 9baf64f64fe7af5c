//! File metadata handling for mirrored copies.
//!
//! A mirrored file keeps its source's permission bits and modification time,
//! which is also what decides whether it needs copying again.

use std::fs::{self, File, Metadata};
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Metadata compared and preserved by the directory synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    /// File size in bytes
    pub size: u64,

    /// Last modified time (seconds since Unix epoch)
    pub modified: u64,

    /// File permissions (Unix mode bits)
    pub permissions: u32,
}

impl FileMetadata {
    pub fn from_metadata(metadata: &Metadata) -> io::Result<Self> {
        use std::os::unix::fs::PermissionsExt;

        let modified = metadata
            .modified()?
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Ok(Self {
            size: metadata.len(),
            modified,
            permissions: metadata.permissions().mode(),
        })
    }

    /// Extract metadata from a file path without following symlinks
    pub fn from_path(path: &Path) -> io::Result<Self> {
        Self::from_metadata(&fs::symlink_metadata(path)?)
    }

    /// A copy is current when size and whole-second mtime agree.
    pub fn is_current(&self, copy: &FileMetadata) -> bool {
        self.size == copy.size && self.modified == copy.modified
    }

    /// Apply mtime, then permissions, to an open copy.
    ///
    /// Both go through the handle so a read-only source mode never blocks
    /// setting the time.
    pub fn apply_to_file(&self, file: &File) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(self.modified))?;
        file.set_permissions(fs::Permissions::from_mode(self.permissions))?;
        Ok(())
    }
}

/// Copy `source` to `dest` (replacing it) and preserve `meta` on the copy.
pub fn copy_with_metadata(source: &Path, dest: &Path, meta: &FileMetadata) -> io::Result<u64> {
    let mut input = File::open(source)?;
    let mut output = File::create(dest)?;
    let bytes = io::copy(&mut input, &mut output)?;
    meta.apply_to_file(&output)?;
    Ok(bytes)
}
