//! Backpressure-accounted outbound channel.
//!
//! Outbound audio can far exceed a lossy client's drain rate. Every frame
//! is counted into a gauge when enqueued and counted out once the writer
//! task has flushed it to the socket; a send that would push the gauge past
//! the high watermark closes the connection instead of dropping the frame,
//! because a silent drop would desynchronize slot indexing on the client.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::messages::ServerMessage;

/// Unflushed-byte ceiling before the connection is closed.
pub const SEND_BUFFER_HIGH_WATERMARK: usize = 8 * 1024 * 1024;

/// Frames handed to the socket writer task.
#[derive(Debug)]
pub enum WireFrame {
    /// Serialized JSON message
    Text(String),
    /// Transport-level heartbeat probe
    Ping,
}

/// Why an outbound send did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("send buffer exceeded high watermark")]
    Backpressure,
    #[error("connection closed")]
    Closed,
}

/// Sender half shared by the session actor and the heartbeat; the matching
/// receiver lives in the socket writer task.
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<WireFrame>,
    queued_bytes: Arc<AtomicUsize>,
    closing: CancellationToken,
}

impl OutboundSender {
    pub fn new(
        tx: mpsc::Sender<WireFrame>,
        queued_bytes: Arc<AtomicUsize>,
        closing: CancellationToken,
    ) -> Self {
        Self {
            tx,
            queued_bytes,
            closing,
        }
    }

    /// Whether the next send would cross the high watermark.
    pub fn would_block(&self) -> bool {
        self.queued_bytes.load(Ordering::Acquire) > SEND_BUFFER_HIGH_WATERMARK
    }

    /// Serialize and enqueue one message. A backpressure breach triggers
    /// the connection close and surfaces as an error so the caller stops
    /// producing.
    pub async fn send(&self, message: &ServerMessage) -> Result<(), SendError> {
        if self.closing.is_cancelled() {
            return Err(SendError::Closed);
        }
        if self.would_block() {
            self.closing.cancel();
            return Err(SendError::Backpressure);
        }

        let json = serde_json::to_string(message).map_err(|_| SendError::Closed)?;
        self.queued_bytes.fetch_add(json.len(), Ordering::AcqRel);
        self.tx
            .send(WireFrame::Text(json))
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Enqueue a transport-level ping for the heartbeat.
    pub async fn ping(&self) -> Result<(), SendError> {
        self.tx
            .send(WireFrame::Ping)
            .await
            .map_err(|_| SendError::Closed)
    }

    /// Token cancelled when the connection must close (backpressure breach
    /// or supervisor shutdown).
    pub fn closing(&self) -> CancellationToken {
        self.closing.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::SessionState;

    fn sender() -> (OutboundSender, mpsc::Receiver<WireFrame>, Arc<AtomicUsize>) {
        let (tx, rx) = mpsc::channel(16);
        let queued = Arc::new(AtomicUsize::new(0));
        let outbound = OutboundSender::new(tx, queued.clone(), CancellationToken::new());
        (outbound, rx, queued)
    }

    #[tokio::test]
    async fn send_accounts_queued_bytes() {
        let (outbound, mut rx, queued) = sender();
        outbound
            .send(&ServerMessage::State {
                state: SessionState::Listening,
            })
            .await
            .unwrap();

        let WireFrame::Text(json) = rx.recv().await.unwrap() else {
            panic!("expected text frame");
        };
        assert_eq!(queued.load(Ordering::Acquire), json.len());
    }

    #[tokio::test]
    async fn breach_closes_instead_of_dropping() {
        let (outbound, _rx, queued) = sender();
        queued.store(SEND_BUFFER_HIGH_WATERMARK + 1, Ordering::Release);

        let result = outbound.send(&ServerMessage::AudioEnd).await;
        assert_eq!(result, Err(SendError::Backpressure));
        assert!(outbound.closing().is_cancelled());

        // Once closing, everything fails fast.
        let result = outbound.send(&ServerMessage::AudioEnd).await;
        assert_eq!(result, Err(SendError::Closed));
    }

    #[tokio::test]
    async fn send_after_receiver_drop_reports_closed() {
        let (outbound, rx, _queued) = sender();
        drop(rx);
        let result = outbound.send(&ServerMessage::AudioEnd).await;
        assert_eq!(result, Err(SendError::Closed));
    }
}
