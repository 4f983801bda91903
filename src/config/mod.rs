//! Configuration module for the Dolores server
//!
//! Configuration comes from environment variables (with `.env` support via
//! dotenvy). Required upstream credentials are validated at load time so a
//! misconfigured process exits before it accepts its first connection.

use std::time::Duration;

mod env;
mod utils;
mod validation;

use crate::core::llm::LlmConfig;
use crate::core::session::SessionTiming;
use crate::core::stt::SttConfig;
use crate::core::tts::TtsConfig;

/// Default listening port
pub const DEFAULT_PORT: u16 = 8765;

/// Server configuration
///
/// Contains everything needed to run the orchestrator:
/// - bind address
/// - upstream credentials (Deepgram STT, ElevenLabs TTS, OpenAI-compatible LLM)
/// - locale and voice selection
/// - the hand-tuned playback/mute windows
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Provider credentials
    pub deepgram_api_key: String,
    pub elevenlabs_api_key: String,
    pub elevenlabs_voice_id: String,
    pub openai_api_key: String,

    // LLM settings
    pub openai_base_url: String,
    pub openai_model: String,

    // Pipeline settings
    pub stt_streaming: bool,
    pub language: String,

    // Playback handshake windows; validated non-zero
    pub playback_mute_ms: u64,
    pub interrupt_mute_ms: u64,
    pub playback_done_timeout_secs: u64,
}

impl ServerConfig {
    /// Socket address string for the listener
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// STT session settings derived from this configuration
    pub fn stt_config(&self) -> SttConfig {
        SttConfig {
            api_key: self.deepgram_api_key.clone(),
            language: self.language.clone(),
            interim_results: self.stt_streaming,
            ..Default::default()
        }
    }

    /// LLM client settings derived from this configuration
    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            api_key: self.openai_api_key.clone(),
            base_url: self.openai_base_url.clone(),
            model: self.openai_model.clone(),
        }
    }

    /// TTS client settings derived from this configuration
    pub fn tts_config(&self) -> TtsConfig {
        TtsConfig {
            api_key: self.elevenlabs_api_key.clone(),
            voice_id: self.elevenlabs_voice_id.clone(),
            ..Default::default()
        }
    }

    /// Playback handshake windows for the session actor
    pub fn session_timing(&self) -> SessionTiming {
        SessionTiming {
            playback_mute: Duration::from_millis(self.playback_mute_ms),
            interrupt_mute: Duration::from_millis(self.interrupt_mute_ms),
            playback_done_timeout: Duration::from_secs(self.playback_done_timeout_secs),
        }
    }
}
