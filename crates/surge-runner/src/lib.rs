//! Host runner for Surge scenarios: schedules virtual users on tokio and
//! walks a run through its lifecycle.

pub mod orchestrator;
pub mod scheduler;

pub use orchestrator::{RunOrchestrator, RunOutcome};
pub use scheduler::{Progress, SchedulerReport, StopReason, VuScheduler};

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received CTRL+C signal, stopping run");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM signal, stopping run");
        }
    }
}
