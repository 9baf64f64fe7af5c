//! End-to-end runs against a local fake remote.

use backup_orchestrator::executor::Orchestrator;
use backup_orchestrator::remote::{PushOutcome, RemoteEndpoint};
use backup_orchestrator::snapshot::{BackupKind, Run};
use backup_orchestrator::sync::DirectorySynchronizer;
use backup_orchestrator::utils::logger;
use backup_orchestrator::{Config, OrchestratorError, Result};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use tempfile::TempDir;

/// Copies the archive store into a local directory instead of rsync.
struct LocalRemote {
    target: PathBuf,
    reachable: bool,
    pushes: Mutex<usize>,
}

impl LocalRemote {
    fn new(target: PathBuf) -> Self {
        Self {
            target,
            reachable: true,
            pushes: Mutex::new(0),
        }
    }
}

impl RemoteEndpoint for LocalRemote {
    fn check(&self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(OrchestratorError::Unreachable("connection refused".to_string()))
        }
    }

    fn push(&self, archive_store: &Path) -> Result<()> {
        fs::create_dir_all(&self.target)?;
        for entry in fs::read_dir(archive_store)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::copy(entry.path(), self.target.join(entry.file_name()))?;
            }
        }
        *self.pushes.lock().unwrap() += 1;
        Ok(())
    }
}

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> std::io::Result<()> {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=Backup Test", "-c", "user.email=backup@example.invalid"])
        .args(args)
        .output()?;
    assert!(output.status.success(), "git {:?} failed", args);
    Ok(())
}

fn write_config(base: &Path, directories: &[&Path]) -> Config {
    let dirs: Vec<String> = directories
        .iter()
        .map(|d| format!("\"{}\"", d.display()))
        .collect();
    let text = format!(
        r#"
        [paths]
        backup_root = "{base}/backups"
        archive_store = "{base}/archives"
        work_dir = "{base}/tmp"
        lock_file = "{base}/backup.lock"
        log_dir = "{base}/logs"

        [sources]
        directories = [{dirs}]
        exclude = ["*.tmp", "target"]

        [remote]
        user = "backup"
        host = "vault.example.net"
        target_dir = "/srv/backups"

        [retention]
        min_free_gb = 0
        push_interval_days = 30

        [run]
        cycle = "srv01"
        "#,
        base = base.display(),
        dirs = dirs.join(", "),
    );
    Config::from_toml_str(&text).expect("config")
}

fn daily(day: u32, force: bool) -> Run {
    Run::new(
        "srv01",
        Some(BackupKind::Daily),
        force,
        NaiveDate::from_ymd_opt(2026, 10, day).unwrap(),
    )
}

#[test]
fn test_projects_directory_with_repository() -> std::io::Result<()> {
    if !git_available() {
        return Ok(());
    }
    let temp_dir = TempDir::new()?;
    let projects = temp_dir.path().join("data/projects");

    let app = projects.join("app");
    fs::create_dir_all(&app)?;
    git(&app, &["init", "--quiet"])?;
    fs::write(app.join("main.rs"), "fn main() {}")?;
    git(&app, &["add", "main.rs"])?;
    git(&app, &["commit", "--quiet", "-m", "initial"])?;

    fs::create_dir_all(projects.join("docs"))?;
    fs::write(projects.join("docs/readme.md"), "# Docs")?;
    fs::write(projects.join("docs/draft.tmp"), "scratch")?;

    let config = write_config(temp_dir.path(), &[&projects]);
    let remote = LocalRemote::new(temp_dir.path().join("remote"));
    let orchestrator = Orchestrator::new(config, remote);

    let report = orchestrator.execute(&daily(15, false)).expect("run");
    assert_eq!(*orchestrator.remote().pushes.lock().unwrap(), 1);
    assert!(!report.has_failures(), "{:?}", report.failures);
    assert_eq!(report.synced_dirs, 1);
    assert_eq!(report.mirrored_repos, 1);
    assert_eq!(report.push, Some(PushOutcome::Pushed));

    let snapshot = temp_dir.path().join("backups/srv01-daily-2026-10-15/snapshot");
    let mirrored = DirectorySynchronizer::new(snapshot.join("dirs"), Vec::new())
        .destination_for(&projects);
    assert_eq!(fs::read_to_string(mirrored.join("docs/readme.md"))?, "# Docs");
    assert!(!mirrored.join("docs/draft.tmp").exists());
    assert!(snapshot.join("repos/app.git/main.rs").is_file());

    // Next day: the first snapshot is archived and the repository pulled.
    fs::write(app.join("lib.rs"), "pub fn lib() {}")?;
    git(&app, &["add", "lib.rs"])?;
    git(&app, &["commit", "--quiet", "-m", "lib"])?;

    let report = orchestrator.execute(&daily(16, false)).expect("second run");
    assert!(!report.has_failures(), "{:?}", report.failures);
    assert_eq!(report.archived, vec!["srv01-daily-2026-10-15"]);
    assert!(temp_dir
        .path()
        .join("archives/srv01-daily-2026-10-15.tar.gz")
        .is_file());
    assert!(!temp_dir.path().join("backups/srv01-daily-2026-10-15").exists());
    assert!(temp_dir
        .path()
        .join("backups/srv01-daily-2026-10-16/snapshot/repos/app.git/main.rs")
        .is_file());
    assert!(matches!(report.push, Some(PushOutcome::Skipped { .. })));
    assert!(!temp_dir.path().join("backup.lock").exists());
    Ok(())
}

#[test]
fn test_held_lock_leaves_everything_untouched() -> std::io::Result<()> {
    let temp_dir = TempDir::new()?;
    let config = write_config(temp_dir.path(), &[]);
    fs::write(temp_dir.path().join("backup.lock"), std::process::id().to_string())?;

    let orchestrator = Orchestrator::new(config, LocalRemote::new(temp_dir.path().join("remote")));
    let result = orchestrator.execute(&daily(16, false));

    assert!(matches!(result, Err(OrchestratorError::AlreadyRunning { .. })));
    assert!(!temp_dir.path().join("backups").exists());
    assert!(!temp_dir.path().join("archives").exists());
    assert_eq!(
        fs::read_to_string(temp_dir.path().join("backup.lock"))?,
        std::process::id().to_string()
    );
    Ok(())
}

#[test]
fn test_unreachable_remote_is_fatal() -> std::io::Result<()> {
    let temp_dir = TempDir::new()?;
    let source = temp_dir.path().join("data/etc");
    fs::create_dir_all(&source)?;
    let config = write_config(temp_dir.path(), &[&source]);

    let mut remote = LocalRemote::new(temp_dir.path().join("remote"));
    remote.reachable = false;
    let orchestrator = Orchestrator::new(config, remote);

    let result = orchestrator.execute(&daily(16, false));
    assert!(matches!(result, Err(OrchestratorError::Unreachable(_))));
    // Staged, but nothing synced and nothing pushed
    let dirs = temp_dir.path().join("backups/srv01-daily-2026-10-16/snapshot/dirs");
    assert_eq!(fs::read_dir(&dirs)?.count(), 0);
    assert!(!temp_dir.path().join("remote").exists());
    assert!(!temp_dir.path().join("backup.lock").exists());
    Ok(())
}

#[test]
fn test_missing_input_is_reported_and_run_continues() -> std::io::Result<()> {
    let temp_dir = TempDir::new()?;
    let missing = temp_dir.path().join("data/gone");
    let present = temp_dir.path().join("data/home");
    fs::create_dir_all(&present)?;
    fs::write(present.join("notes.txt"), "keep")?;

    let config = write_config(temp_dir.path(), &[&missing, &present]);
    let orchestrator = Orchestrator::new(config, LocalRemote::new(temp_dir.path().join("remote")));

    let report = orchestrator.execute(&daily(16, true)).expect("run");
    assert_eq!(report.synced_dirs, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].item, missing.display().to_string());
    assert!(report.archived_current);
    assert!(temp_dir
        .path()
        .join("remote/srv01-daily-2026-10-16.tar.gz")
        .is_file());
    Ok(())
}

#[test]
fn test_run_log_lists_every_step() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let missing = temp_dir.path().join("data/gone");
    let present = temp_dir.path().join("data/home");
    fs::create_dir_all(&present)?;
    fs::write(present.join("notes.txt"), "keep")?;

    let config = write_config(temp_dir.path(), &[&missing, &present]);
    let run = daily(16, false);
    let log_file = config.paths.log_dir.join(run.log_file_name());
    let orchestrator = Orchestrator::new(config, LocalRemote::new(temp_dir.path().join("remote")));

    let subscriber = logger::build("info", Some(&log_file))?;
    tracing::subscriber::with_default(subscriber, || orchestrator.execute(&run))?;

    let log = fs::read_to_string(&log_file)?;
    for step in 1..=9 {
        let marker = format!("[{}/9]", step);
        let lines: Vec<&str> = log.lines().filter(|l| l.contains(&marker)).collect();
        assert_eq!(lines.len(), 1, "step {} in:\n{}", step, log);
        // Timestamp first, then the level
        assert!(lines[0].starts_with("20"), "no timestamp: {}", lines[0]);
        assert!(lines[0].contains(" INFO "), "not info: {}", lines[0]);
    }
    assert!(log.lines().all(|l| !l.contains("[10/9]")));

    let failure = missing.display().to_string();
    assert!(
        log.lines()
            .any(|l| l.contains(" ERROR ") && l.contains(&failure)),
        "no error line for {} in:\n{}",
        failure,
        log
    );
    assert!(!log.contains('\u{1b}'), "ANSI escapes in log file");
    Ok(())
}
