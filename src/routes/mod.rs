use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws;
use crate::state::AppState;
use std::sync::Arc;

/// Create the WebSocket router.
///
/// The `/ws` endpoint is intentionally unauthenticated: the orchestrator is
/// a processing pipeline for ephemeral audio, deployed behind a reverse
/// proxy that owns transport-level protection.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(ws::ws_voice_handler))
        .layer(TraceLayer::new_for_http())
}
