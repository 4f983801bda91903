//! Streaming speech-to-text.
//!
//! One STT session wraps one upstream streaming connection. The session
//! actor creates a session lazily on the first microphone frame while
//! `listening` and destroys it the moment it leaves `listening`. That
//! teardown, not a pause, is the primary guarantee against transcribing the
//! orchestrator's own TTS output.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod deepgram;

pub use deepgram::DeepgramConnector;

/// Upstream connect budget. A session that cannot open its upstream within
/// this window reports an error instead of holding frames forever.
pub const STT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Error types for STT operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SttError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Session closed")]
    SessionClosed,
}

/// Events published by an STT session into the session actor.
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    /// Partial hypothesis; informational only, never advances the session.
    Interim(String),
    /// One finalized segment, already accumulated into the utterance buffer.
    Final(String),
    /// The upstream decided the user stopped talking; carries the full
    /// accumulated transcript of the utterance.
    UtteranceEnd(String),
    /// Upstream failure after the session was opened.
    Error(String),
    /// Upstream closed without an explicit error.
    Closed,
}

/// Callback through which an STT session delivers its events.
pub type SttEventSink =
    Arc<dyn Fn(SttEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Configuration for a streaming STT session
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// API key for the STT provider
    pub api_key: String,
    /// Language code for transcription (e.g., "nl")
    pub language: String,
    /// Sample rate of the audio in Hz
    pub sample_rate: u32,
    /// Number of audio channels (1 for mono)
    pub channels: u16,
    /// Model to use for transcription
    pub model: String,
    /// Enable interim results
    pub interim_results: bool,
    /// Endpointing silence threshold in milliseconds
    pub endpointing_ms: u32,
    /// Utterance-end silence timeout in milliseconds
    pub utterance_end_ms: u32,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            language: "nl".to_string(),
            sample_rate: 16000,
            channels: 1,
            model: "nova-2".to_string(),
            interim_results: true,
            endpointing_ms: 500,
            utterance_end_ms: 1500,
        }
    }
}

/// Handle to a running STT session.
///
/// Frames pushed before the upstream finishes connecting are queued in the
/// channel and flushed once the connection opens, so concurrent frames
/// during startup never spawn a second upstream: the session actor holds at
/// most one handle at a time.
pub struct SttHandle {
    audio_tx: mpsc::UnboundedSender<Bytes>,
    cancel: CancellationToken,
}

impl SttHandle {
    pub fn new(audio_tx: mpsc::UnboundedSender<Bytes>, cancel: CancellationToken) -> Self {
        Self { audio_tx, cancel }
    }

    /// Forward one raw PCM frame upstream.
    pub fn send(&self, frame: Bytes) -> Result<(), SttError> {
        self.audio_tx
            .send(frame)
            .map_err(|_| SttError::SessionClosed)
    }

    /// Tear down the upstream connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SttHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Factory for STT sessions; the seam that lets tests drive the session
/// actor without a network.
pub trait SttConnector: Send + Sync {
    /// Spawn one streaming session delivering events through `sink`.
    fn open(&self, sink: SttEventSink) -> SttHandle;

    /// Provider name advertised in the connect-time config descriptor.
    fn provider_name(&self) -> &'static str;
}

/// Accumulates finalized segments of a single utterance.
#[derive(Debug, Default)]
pub struct UtteranceBuffer {
    segments: Vec<String>,
}

impl UtteranceBuffer {
    /// Append one finalized segment; empty segments are ignored.
    pub fn push_final(&mut self, segment: &str) {
        let segment = segment.trim();
        if !segment.is_empty() {
            self.segments.push(segment.to_string());
        }
    }

    /// Drain the buffer into one transcript, or `None` when nothing was
    /// accumulated (an all-silence utterance).
    pub fn flush(&mut self) -> Option<String> {
        if self.segments.is_empty() {
            return None;
        }
        let transcript = self.segments.join(" ");
        self.segments.clear();
        Some(transcript)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utterance_buffer_joins_segments_in_order() {
        let mut buffer = UtteranceBuffer::default();
        buffer.push_final("hallo");
        buffer.push_final("Dolores");
        assert_eq!(buffer.flush(), Some("hallo Dolores".to_string()));
        assert!(buffer.is_empty());
    }

    #[test]
    fn utterance_buffer_flush_clears() {
        let mut buffer = UtteranceBuffer::default();
        buffer.push_final("eerste");
        assert_eq!(buffer.flush(), Some("eerste".to_string()));
        assert_eq!(buffer.flush(), None);
    }

    #[test]
    fn utterance_buffer_ignores_empty_segments() {
        let mut buffer = UtteranceBuffer::default();
        buffer.push_final("   ");
        buffer.push_final("");
        assert_eq!(buffer.flush(), None);
    }

    #[test]
    fn handle_shutdown_cancels_token() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = SttHandle::new(tx, cancel.clone());
        handle.shutdown();
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn handle_drop_cancels_token() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        drop(SttHandle::new(tx, cancel.clone()));
        assert!(cancel.is_cancelled());
    }
}
