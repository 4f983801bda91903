//! Per-sentence text-to-speech synthesis.
//!
//! Synthesis jobs run strictly one at a time per session (the upstream is
//! rate-limited; parallel calls yield intermittent 429s), so the interface
//! is a single blocking-style call: one sentence in, one raw PCM artifact
//! out. Serialization lives in the session's job runner.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub mod elevenlabs;

pub use elevenlabs::ElevenLabsTts;

/// Budget for synthesizing one sentence.
pub const TTS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Error types for TTS operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum TtsError {
    #[error("Audio generation failed: {0}")]
    AudioGenerationFailed(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Provider error ({status}): {body}")]
    ProviderError { status: u16, body: String },
    #[error("Synthesis timed out")]
    Timeout,
}

/// Configuration for the TTS provider
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// API key for the TTS provider
    pub api_key: String,
    /// Voice ID to use for synthesis
    pub voice_id: String,
    /// Model to use for synthesis
    pub model: String,
    /// Sample rate of the produced PCM
    pub sample_rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: String::new(),
            model: "eleven_multilingual_v2".to_string(),
            sample_rate: 16000,
        }
    }
}

/// One-sentence speech synthesis; the seam that lets tests run the
/// pipeline with canned audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize one sentence into raw PCM S16LE, 16 kHz, mono.
    async fn synthesize(&self, text: &str) -> Result<Bytes, TtsError>;

    /// Provider name advertised in the connect-time config descriptor.
    fn provider_name(&self) -> &'static str;
}
