//! Pre-flight free space check for the backup root.

use crate::{OrchestratorError, Result};
use nix::sys::statvfs::statvfs;
use std::path::{Path, PathBuf};
use tracing::info;

const GIB: u64 = 1024 * 1024 * 1024;

/// Free space, in whole GiB (rounded down), of the filesystem holding `path`.
///
/// `path` does not have to exist yet; its nearest existing ancestor is
/// measured instead.
pub fn free_space_gb(path: &Path) -> Result<u64> {
    let ancestor = existing_ancestor(path);
    let stat = statvfs(ancestor.as_path())?;
    let free_bytes = (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64);
    Ok(free_bytes / GIB)
}

/// Fail with `InsufficientSpace` if less than `min_free_gb` GiB are free.
pub fn ensure_free_space(path: &Path, min_free_gb: u64) -> Result<u64> {
    let free_gb = free_space_gb(path)?;
    if free_gb < min_free_gb {
        return Err(OrchestratorError::InsufficientSpace {
            path: path.to_path_buf(),
            free_gb,
            required_gb: min_free_gb,
        });
    }
    info!(path = %path.display(), free_gb, required_gb = min_free_gb, "Disk space OK");
    Ok(free_gb)
}

fn existing_ancestor(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
