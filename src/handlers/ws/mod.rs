//! WebSocket transport for the voice pipeline.

pub mod handler;
pub mod messages;
pub mod outbound;

pub use handler::ws_voice_handler;
