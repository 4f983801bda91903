//! Process-wide lifecycle: signal handling and bounded graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::state::AppState;

pub mod registry;

pub use registry::SessionRegistry;

/// How long shutdown waits for sessions to close before the process exits
/// anyway.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Resolves on SIGINT or SIGTERM, then drains all sessions. Handing this
/// future to axum's graceful shutdown stops the accept loop first.
pub async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }

    state.registry.drain(SHUTDOWN_GRACE).await;
}
