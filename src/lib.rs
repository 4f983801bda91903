pub mod config;
pub mod core;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;

// Re-export commonly used items for convenience
pub use config::ServerConfig;
pub use core::session::{Providers, Session, SessionEvent, SessionHandle, SessionState};
pub use state::AppState;
