//! Logging configuration using tracing.
//!
//! Every event goes to stdout and, when a log file is given, is appended to
//! that file without ANSI colors.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::Subscriber;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging with the specified level
pub fn init(level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
    build(level, log_file)?.try_init()?;
    Ok(())
}

/// Subscriber used by [`init`], without installing it globally.
pub fn build(
    level: &str,
    log_file: Option<&Path>,
) -> anyhow::Result<impl Subscriber + Send + Sync + 'static> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Arc::new(file)),
            )
        }
        None => None,
    };

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer))
}
