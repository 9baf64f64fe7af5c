//! Archive rotation.
//!
//! Superseded run directories under the backup root are compressed into the
//! archive store (`<run_name>.tar.gz`, or `.tar.zst`) and then removed. The
//! current run's directory is never rotated; it may be archived in place.

use crate::config::{CompressionKind, Config};
use crate::snapshot::period::RunName;
use crate::{OrchestratorError, Result};
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Outcome of one rotation pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RotationReport {
    /// Snapshots archived and removed
    pub archived: Vec<String>,
    /// Snapshots whose compression or move failed, with the error
    pub failed: Vec<(String, String)>,
    /// Failed snapshots deleted anyway (`delete_on_compress_failure`)
    pub deleted_after_failure: Vec<String>,
}

pub struct ArchiveRotator {
    backup_root: PathBuf,
    archive_store: PathBuf,
    work_dir: PathBuf,
    cycle: String,
    compression: CompressionKind,
    level: u32,
    delete_on_failure: bool,
}

impl ArchiveRotator {
    pub fn new(config: &Config, cycle: impl Into<String>) -> Self {
        Self {
            backup_root: config.paths.backup_root.clone(),
            archive_store: config.paths.archive_store.clone(),
            work_dir: config.paths.work_dir.clone(),
            cycle: cycle.into(),
            compression: config.retention.compression,
            level: config.retention.compression_level,
            delete_on_failure: config.retention.delete_on_compress_failure,
        }
    }

    /// Archive path for a run directory name
    pub fn archive_path(&self, name: &str) -> PathBuf {
        self.archive_store
            .join(format!("{}.{}", name, self.compression.extension()))
    }

    /// Run directories of this cycle other than `current`, sorted by name.
    pub fn superseded(&self, current: &RunName) -> Result<Vec<String>> {
        let current = current.to_string();
        let mut names: Vec<String> = fs::read_dir(&self.backup_root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| *name != current && RunName::parse(&self.cycle, name).is_some())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Compress and remove every superseded run directory.
    ///
    /// A failure on one snapshot does not stop the others. Unless
    /// `delete_on_compress_failure` is set, a snapshot whose archive could
    /// not be produced is kept.
    pub fn rotate_old(&self, current: &RunName) -> Result<RotationReport> {
        let mut report = RotationReport::default();

        for name in self.superseded(current)? {
            let source = self.backup_root.join(&name);
            match self.archive_dir(&source, &name) {
                Ok(archive) => {
                    if let Err(e) = fs::remove_dir_all(&source) {
                        error!(snapshot = %name, error = %e, "Archived but failed to remove snapshot");
                        report.failed.push((name, e.to_string()));
                        continue;
                    }
                    info!(snapshot = %name, archive = %archive.display(), "Snapshot archived");
                    report.archived.push(name);
                }
                Err(e) => {
                    error!(snapshot = %name, error = %e, "Failed to archive snapshot");
                    if self.delete_on_failure {
                        warn!(snapshot = %name, "Deleting snapshot despite failed archive");
                        match fs::remove_dir_all(&source) {
                            Ok(()) => report.deleted_after_failure.push(name.clone()),
                            Err(e) => {
                                error!(snapshot = %name, error = %e, "Failed to remove snapshot")
                            }
                        }
                    }
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Archive the current run directory without removing it.
    pub fn archive_current(&self, current: &RunName) -> Result<PathBuf> {
        let name = current.to_string();
        let archive = self.archive_dir(&self.backup_root.join(&name), &name)?;
        info!(snapshot = %name, archive = %archive.display(), "Current snapshot archived");
        Ok(archive)
    }

    /// Write `<work_dir>/<name>.<ext>.partial`, then move it into the store.
    fn archive_dir(&self, source: &Path, name: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.work_dir)?;
        fs::create_dir_all(&self.archive_store)?;

        let partial = self
            .work_dir
            .join(format!("{}.{}.partial", name, self.compression.extension()));
        let dest = self.archive_path(name);

        let written = compress_dir(source, name, &partial, self.compression, self.level)
            .and_then(|()| move_file(&partial, &dest).map_err(OrchestratorError::from));
        if let Err(e) = written {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }
        Ok(dest)
    }
}

/// Write `source` as a tar stream rooted at `name/`, compressed into `output`.
pub fn compress_dir(
    source: &Path,
    name: &str,
    output: &Path,
    kind: CompressionKind,
    level: u32,
) -> Result<()> {
    if !source.is_dir() {
        return Err(OrchestratorError::Compression(format!(
            "{}: not a directory",
            source.display()
        )));
    }

    let file = BufWriter::new(File::create(output)?);
    let compress_err =
        |e: io::Error| OrchestratorError::Compression(format!("{}: {}", source.display(), e));

    match kind {
        CompressionKind::Gzip => {
            let encoder = GzEncoder::new(file, flate2::Compression::new(level.min(9)));
            let encoder = write_tar(encoder, source, name).map_err(compress_err)?;
            let mut file = encoder.finish().map_err(compress_err)?;
            file.flush()?;
        }
        CompressionKind::Zstd => {
            let encoder =
                zstd::stream::write::Encoder::new(file, level as i32).map_err(compress_err)?;
            let encoder = write_tar(encoder, source, name).map_err(compress_err)?;
            let mut file = encoder.finish().map_err(compress_err)?;
            file.flush()?;
        }
    }

    Ok(())
}

fn write_tar<W: Write>(writer: W, source: &Path, name: &str) -> io::Result<W> {
    let mut tar = tar::Builder::new(writer);
    tar.follow_symlinks(false);
    tar.append_dir_all(name, source)?;
    tar.into_inner()
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Err(e) = fs::rename(from, to) {
        warn!(from = %from.display(), to = %to.display(), error = %e, "Rename failed, copying");
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}
