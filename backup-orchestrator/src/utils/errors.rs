//! Custom error types for the backup orchestrator.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Another run is in progress (pid {pid})")]
    AlreadyRunning { pid: i32 },

    #[error("Insufficient disk space on {}: {free_gb} GiB free, {required_gb} GiB required", path.display())]
    InsufficientSpace {
        path: PathBuf,
        free_gb: u64,
        required_gb: u64,
    },

    #[error("Remote unreachable: {0}")]
    Unreachable(String),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("Input unavailable: {0}")]
    InputUnavailable(String),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Git error: {0}")]
    Git(String),

    #[error("Fast-forward not possible for {0}")]
    NotFastForward(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("System call failed: {0}")]
    Sys(#[from] nix::errno::Errno),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
