//! Backup Orchestrator Library
//!
//! One lock-guarded backup run: stage a dated snapshot, mirror directories
//! and git repositories into it, rotate older snapshots into compressed
//! archives and push the archive store to a remote host.

pub mod archive;
pub mod config;
pub mod executor;
pub mod fs;
pub mod guard;
pub mod remote;
pub mod repo;
pub mod snapshot;
pub mod sync;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{OrchestratorError, Result};
