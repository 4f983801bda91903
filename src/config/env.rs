use std::env;

use super::utils::parse_bool;
use super::validation::validate;
use super::{DEFAULT_PORT, ServerConfig};

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// Reads configuration from environment variables, with sensible
    /// defaults for everything except the upstream credentials. Also loads
    /// from a .env file if present using dotenvy.
    ///
    /// # Errors
    /// Returns an error if:
    /// - A numeric variable is malformed
    /// - A required credential is missing
    /// - A mute window is configured as zero
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        // Server configuration
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| DEFAULT_PORT.to_string())
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {e}"))?;

        // Provider credentials
        let deepgram_api_key = env::var("DEEPGRAM_API_KEY").unwrap_or_default();
        let elevenlabs_api_key = env::var("ELEVENLABS_API_KEY").unwrap_or_default();
        // TTS_VOICE is the documented override for the synthesis voice.
        let elevenlabs_voice_id = env::var("TTS_VOICE")
            .or_else(|_| env::var("ELEVENLABS_VOICE_ID"))
            .unwrap_or_default();
        let openai_api_key = env::var("OPENAI_API_KEY").unwrap_or_default();

        // LLM settings
        let openai_base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();
        let openai_model =
            env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        // Pipeline settings
        let stt_streaming = env::var("STT_STREAMING")
            .ok()
            .and_then(|v| parse_bool(&v))
            .unwrap_or(true);
        let language = env::var("LANGUAGE").unwrap_or_else(|_| "nl".to_string());

        // Playback handshake windows
        let playback_mute_ms = parse_u64_var("PLAYBACK_MUTE_MS", 500)?;
        let interrupt_mute_ms = parse_u64_var("INTERRUPT_MUTE_MS", 150)?;
        let playback_done_timeout_secs = parse_u64_var("PLAYBACK_DONE_TIMEOUT_SECS", 30)?;

        let config = ServerConfig {
            host,
            port,
            deepgram_api_key,
            elevenlabs_api_key,
            elevenlabs_voice_id,
            openai_api_key,
            openai_base_url,
            openai_model,
            stt_streaming,
            language,
            playback_mute_ms,
            interrupt_mute_ms,
            playback_done_timeout_secs,
        };

        validate(&config)?;
        Ok(config)
    }
}

fn parse_u64_var(name: &str, default: u64) -> Result<u64, String> {
    match env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|e| format!("Invalid {name}: {e}")),
        Err(_) => Ok(default),
    }
}
