use std::io;
use std::process::ExitCode;

use anyhow::anyhow;
use tokio::net::TcpListener;
use tracing::{error, info};

use dolores::{ServerConfig, routes, server, state::AppState};

/// Startup failed before the listener existed (bad or missing config).
const EXIT_CONFIG: u8 = 1;
/// The configured port is already bound.
const EXIT_PORT_IN_USE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Load configuration; a misconfigured process must exit before it
    // accepts its first connection.
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };
    let address = config.address();

    let app_state = match AppState::new(config) {
        Ok(state) => state,
        Err(e) => {
            error!("Configuration error: {e}");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    let app = routes::create_ws_router().with_state(app_state.clone());

    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
            error!("Port already in use: {address}");
            return Ok(ExitCode::from(EXIT_PORT_IN_USE));
        }
        Err(e) => return Err(e.into()),
    };

    info!("Server listening on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(server::shutdown_signal(app_state))
        .await?;

    info!("Shutdown complete");
    Ok(ExitCode::SUCCESS)
}
