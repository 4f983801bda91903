//! Axum WebSocket handler.
//!
//! Owns the socket for one client: upgrades the connection, emits the
//! one-shot config descriptor, spawns the session actor, and runs the
//! reader loop with the 30 s heartbeat. A writer task drains the outbound
//! channel so the reader never blocks on a slow client.

use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::session::{Session, SessionEvent};
use crate::state::AppState;

use super::{
    messages::{ClientMessage, PROTOCOL_VERSION, ServerMessage},
    outbound::{OutboundSender, SEND_BUFFER_HIGH_WATERMARK, WireFrame},
};

/// Liveness probe interval; a connection silent for two ticks is dead.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Close code sent on a backpressure breach ("try again later").
const CLOSE_BACKPRESSURE: u16 = 1013;

/// Outbound channel depth. Flow control lives in the byte gauge, not here;
/// this only smooths bursts between the actor and the writer task.
const WRITER_QUEUE_SIZE: usize = 64;

/// WebSocket voice endpoint: upgrades the HTTP connection and hands the
/// socket to the per-connection loop.
pub async fn ws_voice_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("WebSocket voice connection upgrade requested");
    ws.on_upgrade(move |socket| handle_voice_socket(socket, state))
}

async fn handle_voice_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let session_id = app_state.next_session_id();
    info!("Session {}: connection established", session_id);

    let (mut ws_sink, mut ws_source) = socket.split();

    let (frame_tx, mut frame_rx) = mpsc::channel::<WireFrame>(WRITER_QUEUE_SIZE);
    let queued_bytes = Arc::new(AtomicUsize::new(0));
    let closing = CancellationToken::new();
    let outbound = OutboundSender::new(frame_tx, queued_bytes.clone(), closing.clone());

    // Writer task: the only owner of the sink. Decrements the byte gauge
    // once a frame is actually flushed.
    let writer_closing = closing.clone();
    let writer_queued = queued_bytes.clone();
    let writer = tokio::spawn(async move {
        loop {
            select! {
                _ = writer_closing.cancelled() => {
                    let over_watermark =
                        writer_queued.load(Ordering::Acquire) > SEND_BUFFER_HIGH_WATERMARK;
                    let frame = if over_watermark {
                        CloseFrame {
                            code: CLOSE_BACKPRESSURE,
                            reason: "backpressure".into(),
                        }
                    } else {
                        CloseFrame {
                            code: 1000,
                            reason: "shutting down".into(),
                        }
                    };
                    let _ = ws_sink.send(Message::Close(Some(frame))).await;
                    break;
                }
                frame = frame_rx.recv() => {
                    match frame {
                        Some(WireFrame::Text(json)) => {
                            let len = json.len();
                            if ws_sink.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                            writer_queued.fetch_sub(len, Ordering::AcqRel);
                        }
                        Some(WireFrame::Ping) => {
                            if ws_sink.send(Message::Ping(Bytes::new())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    // One-shot configuration descriptor.
    let descriptor = ServerMessage::Config {
        version: PROTOCOL_VERSION,
        stt: app_state.providers.stt.provider_name(),
        tts: app_state.providers.tts.provider_name(),
        speaker_verification: app_state.speaker.is_configured(),
        backend: env!("CARGO_PKG_NAME"),
    };
    if outbound.send(&descriptor).await.is_err() {
        warn!("Session {}: failed to send config descriptor", session_id);
        closing.cancel();
        let _ = writer.await;
        return;
    }

    let session = Session::spawn(
        session_id,
        app_state.providers.clone(),
        app_state.speaker.clone(),
        app_state.config.session_timing(),
        outbound.clone(),
    );
    app_state
        .registry
        .insert(session_id, session.clone(), closing.clone())
        .await;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick completes immediately
    let mut alive = true;

    loop {
        select! {
            _ = closing.cancelled() => {
                debug!("Session {}: connection closing", session_id);
                break;
            }

            _ = heartbeat.tick() => {
                if !alive {
                    info!("Session {}: heartbeat missed, terminating", session_id);
                    break;
                }
                alive = false;
                if outbound.ping().await.is_err() {
                    break;
                }
            }

            message = ws_source.next() => {
                match message {
                    Some(Ok(message)) => {
                        alive = true;
                        if !process_message(message, &session, &outbound).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Session {}: WebSocket error: {}", session_id, e);
                        break;
                    }
                    None => {
                        info!("Session {}: connection closed by client", session_id);
                        break;
                    }
                }
            }
        }
    }

    // Disconnect path runs unconditionally.
    app_state.registry.remove(session_id).await;
    let _ = session.post(SessionEvent::Shutdown).await;
    closing.cancel();
    let _ = writer.await;
    info!("Session {}: connection terminated", session_id);
}

/// Route one inbound frame. Returns false to terminate the connection.
async fn process_message(
    message: Message,
    session: &crate::core::session::SessionHandle,
    outbound: &OutboundSender,
) -> bool {
    match message {
        Message::Text(text) => {
            let parsed: ClientMessage = match serde_json::from_str(&text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    debug!("Malformed client message: {}", e);
                    let _ = outbound
                        .send(&ServerMessage::Error {
                            error: format!("Invalid message format: {e}"),
                        })
                        .await;
                    return true;
                }
            };

            match parsed {
                ClientMessage::Audio { data } => match BASE64.decode(&data) {
                    Ok(pcm) => session
                        .post(SessionEvent::Frame(Bytes::from(pcm)))
                        .await
                        .is_ok(),
                    Err(e) => {
                        let _ = outbound
                            .send(&ServerMessage::Error {
                                error: format!("Invalid audio payload: {e}"),
                            })
                            .await;
                        true
                    }
                },
                ClientMessage::PlaybackDone => {
                    session.post(SessionEvent::PlaybackDone).await.is_ok()
                }
                ClientMessage::Interrupt => session.post(SessionEvent::Interrupt).await.is_ok(),
                ClientMessage::Ping => outbound.send(&ServerMessage::Pong).await.is_ok(),
            }
        }
        Message::Binary(_) => {
            let _ = outbound
                .send(&ServerMessage::Error {
                    error: "Binary frames are not supported; send base64 audio messages"
                        .to_string(),
                })
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!("Client sent close frame");
            false
        }
    }
}
