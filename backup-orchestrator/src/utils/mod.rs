//! Utility modules for the backup orchestrator.

pub mod errors;
pub mod logger;
pub mod naming;

pub use errors::{OrchestratorError, Result};
