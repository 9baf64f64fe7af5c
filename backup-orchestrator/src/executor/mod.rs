//! Run orchestration - drives one backup run from lock to push.
//!
//! The run is a fixed sequence of steps. Lock, disk space, staging and the
//! reachability check are gates: their failure ends the run. Directory sync,
//! repository mirroring, rotation and the push are best effort: failures are
//! logged, recorded in the [`RunReport`] and the run moves on.

pub mod shutdown;

use crate::archive::ArchiveRotator;
use crate::config::Config;
use crate::guard::{ensure_free_space, LockFile};
use crate::remote::{PushOutcome, Pusher, RemoteEndpoint};
use crate::repo::{self, RepositoryMirror};
use crate::snapshot::{Run, Snapshot, SnapshotStager};
use crate::sync::DirectorySynchronizer;
use crate::Result;
use std::collections::HashSet;
use std::time::{Instant, SystemTime};
use tracing::{error, info, warn};

/// Number of steps every run logs, skipped ones included.
pub const TOTAL_STEPS: usize = 9;

/// One best-effort failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step: &'static str,
    pub item: String,
    pub error: String,
}

/// What a completed run did
#[derive(Debug, Default)]
pub struct RunReport {
    pub synced_dirs: usize,
    pub mirrored_repos: usize,
    pub archived: Vec<String>,
    pub archived_current: bool,
    pub push: Option<PushOutcome>,
    pub failures: Vec<StepFailure>,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    fn fail(&mut self, step: &'static str, item: impl Into<String>, error: impl ToString) {
        let item = item.into();
        let error = error.to_string();
        error!(step, item = %item, error = %error, "Step failed");
        self.failures.push(StepFailure { step, item, error });
    }
}

/// Monotonic `[n/TOTAL]` step log
#[derive(Debug, Default)]
struct StepLog {
    current: usize,
}

impl StepLog {
    fn next(&mut self, title: &str) {
        self.current += 1;
        info!("[{}/{}] {}", self.current, TOTAL_STEPS, title);
    }
}

pub struct Orchestrator<R: RemoteEndpoint> {
    config: Config,
    cycle: String,
    remote: R,
}

impl<R: RemoteEndpoint> Orchestrator<R> {
    pub fn new(config: Config, remote: R) -> Self {
        let cycle = config.cycle();
        Self {
            config,
            cycle,
            remote,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Run name prefix used for staging and rotation
    pub fn cycle(&self) -> &str {
        &self.cycle
    }

    /// Execute every step of `run`. Fatal preconditions return `Err`;
    /// best-effort failures are collected in the report.
    pub fn execute(&self, run: &Run) -> Result<RunReport> {
        let started = Instant::now();
        let mut steps = StepLog::default();
        let mut report = RunReport::default();

        info!(
            run = %run.name(),
            kind = %run.kind(),
            force = run.force(),
            "Starting backup run"
        );

        steps.next("Acquiring run lock");
        let _lock = LockFile::new(&self.config.paths.lock_file).acquire()?;

        steps.next("Checking free disk space");
        ensure_free_space(&self.config.paths.backup_root, self.config.retention.min_free_gb)?;

        steps.next("Staging snapshot");
        let snapshot = SnapshotStager::new(self.config.paths.clone()).prepare(run.name())?;

        steps.next("Checking remote reachability");
        self.remote.check()?;

        steps.next("Synchronizing directories");
        self.sync_directories(&snapshot, &mut report);

        steps.next("Mirroring repositories");
        self.mirror_repositories(&snapshot, &mut report);

        let rotator = ArchiveRotator::new(&self.config, self.cycle.clone());

        steps.next("Rotating old snapshots");
        match rotator.rotate_old(run.name()) {
            Ok(rotation) => {
                for (name, e) in rotation.failed {
                    report.fail("rotate", name, e);
                }
                report.archived = rotation.archived;
            }
            Err(e) => report.fail("rotate", self.config.paths.backup_root.display().to_string(), e),
        }

        steps.next("Archiving current snapshot");
        if self.config.retention.archive_current.applies(run.force()) {
            match rotator.archive_current(run.name()) {
                Ok(_) => report.archived_current = true,
                Err(e) => report.fail("archive-current", run.name().to_string(), e),
            }
        } else {
            info!(
                policy = ?self.config.retention.archive_current,
                "Current snapshot not archived"
            );
        }

        steps.next("Pushing archives to remote");
        let pusher = Pusher::new(
            &self.remote,
            &self.config.paths.archive_store,
            self.config.retention.push_interval_days,
        );
        match pusher.push(run.force(), SystemTime::now()) {
            Ok(outcome) => report.push = Some(outcome),
            Err(e) => report.fail("push", self.config.remote.host.clone(), e),
        }

        if report.has_failures() {
            warn!(
                failures = report.failures.len(),
                synced_dirs = report.synced_dirs,
                mirrored_repos = report.mirrored_repos,
                archived = report.archived.len(),
                elapsed_secs = started.elapsed().as_secs(),
                "Backup run finished with failures"
            );
        } else {
            info!(
                synced_dirs = report.synced_dirs,
                mirrored_repos = report.mirrored_repos,
                archived = report.archived.len(),
                elapsed_secs = started.elapsed().as_secs(),
                "Backup run finished"
            );
        }

        Ok(report)
    }

    fn sync_directories(&self, snapshot: &Snapshot, report: &mut RunReport) {
        let sync = DirectorySynchronizer::new(&snapshot.dirs, self.config.sources.exclude.clone());
        let mut destinations = HashSet::new();

        for source in &self.config.sources.directories {
            let item = source.display().to_string();
            let dest = sync.destination_for(source);
            if !destinations.insert(dest.clone()) {
                report.fail(
                    "sync",
                    item,
                    format!("destination {} already used by another input", dest.display()),
                );
                continue;
            }

            match sync.sync(source) {
                Ok(result) => {
                    info!(
                        source = %item,
                        added = result.added,
                        updated = result.updated,
                        deleted = result.deleted,
                        skipped_special = result.skipped_special,
                        "Directory synchronized"
                    );
                    if result.errors > 0 {
                        report.fail("sync", item, format!("{} entries failed", result.errors));
                    } else {
                        report.synced_dirs += 1;
                    }
                }
                Err(e) => report.fail("sync", item, e),
            }
        }
    }

    fn mirror_repositories(&self, snapshot: &Snapshot, report: &mut RunReport) {
        let discovered = repo::discover(&self.config.sources.directories);
        let sources = repo::plan(&self.config.sources.repositories, &discovered);
        info!(
            explicit = self.config.sources.repositories.len(),
            discovered = discovered.len(),
            "Repositories planned"
        );

        let mut mirror = RepositoryMirror::new(&snapshot.repos, self.config.tools.git.clone());
        for source in sources {
            match mirror.mirror(&source) {
                Ok(_) => report.mirrored_repos += 1,
                Err(e) => report.fail("mirror", source.display().to_string(), e),
            }
        }
    }
}
