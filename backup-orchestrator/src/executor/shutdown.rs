//! SIGTERM and SIGINT handling around a backup run.
//!
//! A run is blocking work; the signal is only reported so the caller can
//! release the lock and exit.

use tokio::signal;
use tracing::{error, info};

/// Signal that ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

/// Wait for SIGINT or SIGTERM.
///
/// A handler that cannot be installed never fires.
pub async fn wait_for_signal() -> ShutdownSignal {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, stopping backup run");
            ShutdownSignal::Interrupt
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping backup run");
            ShutdownSignal::Terminate
        }
    }
}
