//! Snapshot staging.
//!
//! A run stages its copy of every input under
//! `<backup_root>/<run_name>/snapshot/{dirs,repos}`.

pub mod period;

use crate::config::PathsConfig;
use crate::Result;
use period::RunName;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub use period::{BackupKind, Run};

/// On-disk layout of one run's snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// `<backup_root>/<run_name>`, the unit that gets archived
    pub run_dir: PathBuf,
    pub root: PathBuf,
    pub dirs: PathBuf,
    pub repos: PathBuf,
}

impl Snapshot {
    pub fn layout(backup_root: &Path, run_name: &RunName) -> Self {
        let run_dir = backup_root.join(run_name.to_string());
        let root = run_dir.join("snapshot");
        Self {
            dirs: root.join("dirs"),
            repos: root.join("repos"),
            root,
            run_dir,
        }
    }
}

pub struct SnapshotStager {
    paths: PathsConfig,
}

impl SnapshotStager {
    pub fn new(paths: PathsConfig) -> Self {
        Self { paths }
    }

    /// Create the snapshot skeleton, the archive store and the work area.
    /// Safe to call when any of them already exists.
    pub fn prepare(&self, run_name: &RunName) -> Result<Snapshot> {
        let snapshot = Snapshot::layout(&self.paths.backup_root, run_name);

        for dir in [
            &snapshot.dirs,
            &snapshot.repos,
            &self.paths.archive_store,
            &self.paths.work_dir,
        ] {
            fs::create_dir_all(dir)?;
        }

        info!(snapshot = %snapshot.root.display(), "Snapshot staged");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn paths(base: &Path) -> PathsConfig {
        PathsConfig {
            backup_root: base.join("snapshots"),
            archive_store: base.join("archives"),
            work_dir: base.join("work"),
            lock_file: base.join("backup.lock"),
            log_dir: base.join("log"),
        }
    }

    #[test]
    fn test_prepare_creates_layout() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let stager = SnapshotStager::new(paths(temp_dir.path()));
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let name = RunName::new("host", BackupKind::Daily, date);

        let snapshot = stager.prepare(&name).expect("prepare");

        assert_eq!(
            snapshot.root,
            temp_dir.path().join("snapshots/host-daily-2026-10-16/snapshot")
        );
        assert!(snapshot.dirs.is_dir());
        assert!(snapshot.repos.is_dir());
        assert!(temp_dir.path().join("archives").is_dir());
        assert!(temp_dir.path().join("work").is_dir());
        Ok(())
    }

    #[test]
    fn test_prepare_is_idempotent() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let stager = SnapshotStager::new(paths(temp_dir.path()));
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        let name = RunName::new("host", BackupKind::Daily, date);

        let first = stager.prepare(&name).expect("first prepare");
        fs::write(first.dirs.join("kept.txt"), b"still here")?;
        let second = stager.prepare(&name).expect("second prepare");

        assert_eq!(first, second);
        assert!(second.dirs.join("kept.txt").exists());
        Ok(())
    }
}
