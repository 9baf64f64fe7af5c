//! Backup Orchestrator - Main entry point
//!
//! Runs one backup cycle and exits. Meant to be started by cron or a
//! systemd timer.

use backup_orchestrator::config::{Config, DEFAULT_CONFIG_PATH};
use backup_orchestrator::executor::shutdown;
use backup_orchestrator::executor::Orchestrator;
use backup_orchestrator::guard::LockFile;
use backup_orchestrator::remote::SshRemote;
use backup_orchestrator::snapshot::{BackupKind, Run};
use backup_orchestrator::{utils, OrchestratorError};
use chrono::Local;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

const EXIT_FAILURE: u8 = 1;
const EXIT_STEP_ERRORS: u8 = 3;
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Archive the current snapshot and push regardless of the interval
    #[arg(short, long)]
    force: bool,

    /// Backup type; derived from today's date when omitted
    #[arg(short = 't', long = "type", value_enum)]
    kind: Option<BackupKind>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {:#}", args.config.display(), e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let run = Run::new(
        &config.cycle(),
        args.kind,
        args.force,
        Local::now().date_naive(),
    );

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    let log_file = config.paths.log_dir.join(run.log_file_name());
    if let Err(e) = utils::logger::init(log_level, Some(&log_file)) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::from(EXIT_FAILURE);
    }

    tracing::info!(
        "Starting backup-orchestrator v{} (run: {})",
        env!("CARGO_PKG_VERSION"),
        run.name()
    );

    let lock_path = config.paths.lock_file.clone();
    let fail_on_step_errors = config.run.fail_on_step_errors;
    let remote = match SshRemote::from_config(&config) {
        Ok(remote) => remote,
        Err(e) => {
            tracing::error!(error = %e, "Invalid remote configuration");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    let orchestrator = Orchestrator::new(config, remote);

    let task = tokio::task::spawn_blocking(move || orchestrator.execute(&run));

    tokio::select! {
        joined = task => {
            match joined {
                Ok(Ok(report)) if report.has_failures() && fail_on_step_errors => {
                    tracing::error!(
                        failures = report.failures.len(),
                        "Backup completed with step failures"
                    );
                    ExitCode::from(EXIT_STEP_ERRORS)
                }
                Ok(Ok(_)) => ExitCode::SUCCESS,
                Ok(Err(OrchestratorError::AlreadyRunning { pid })) => {
                    tracing::info!(pid, "Another backup run holds the lock, nothing to do");
                    ExitCode::SUCCESS
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Backup run failed");
                    ExitCode::from(EXIT_FAILURE)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Backup task panicked");
                    ExitCode::from(EXIT_FAILURE)
                }
            }
        }
        received = shutdown::wait_for_signal() => {
            match LockFile::new(&lock_path).release_if_owned() {
                Ok(true) => tracing::info!(lock = %lock_path.display(), "Lock released"),
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "Failed to release lock"),
            }
            tracing::warn!(signal = ?received, "Backup run interrupted");
            // The blocking run cannot be cancelled; exiting here skips the
            // runtime's wait for it.
            std::process::exit(EXIT_INTERRUPTED);
        }
    }
}
