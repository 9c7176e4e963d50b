use mdview_core::LifecycleManager;
use tracing::{error, info};

/// Resolves on SIGINT or SIGTERM after every subscription has been closed and
/// every OS watch released. Handed to `axum::serve(..).with_graceful_shutdown`
/// so open SSE streams have already ended when the server starts draining.
pub async fn shutdown_signal(lifecycle: LifecycleManager) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }

    match lifecycle.shutdown().await {
        Ok(report) => info!(
            leftover_watches = report.entries,
            leftover_subscribers = report.subscribers,
            "watch lifecycle stopped"
        ),
        Err(err) => error!("watch lifecycle shutdown failed: {err}"),
    }
}
