use super::ServerConfig;

/// Validate the assembled configuration.
///
/// Missing credentials must fail here, before the listener binds, so a
/// misconfigured deployment never accepts a connection it cannot serve.
pub fn validate(config: &ServerConfig) -> Result<(), String> {
    let mut missing = Vec::new();
    if config.deepgram_api_key.is_empty() {
        missing.push("DEEPGRAM_API_KEY");
    }
    if config.elevenlabs_api_key.is_empty() {
        missing.push("ELEVENLABS_API_KEY");
    }
    if config.elevenlabs_voice_id.is_empty() {
        missing.push("ELEVENLABS_VOICE_ID (or TTS_VOICE)");
    }
    if config.openai_api_key.is_empty() {
        missing.push("OPENAI_API_KEY");
    }
    if !missing.is_empty() {
        return Err(format!(
            "Missing required configuration: {}",
            missing.join(", ")
        ));
    }

    // Zero-width mute windows would let the speaker's decay leak straight
    // into the next listening window.
    if config.playback_mute_ms == 0 {
        return Err("PLAYBACK_MUTE_MS must be greater than zero".to_string());
    }
    if config.interrupt_mute_ms == 0 {
        return Err("INTERRUPT_MUTE_MS must be greater than zero".to_string());
    }
    if config.playback_done_timeout_secs == 0 {
        return Err("PLAYBACK_DONE_TIMEOUT_SECS must be greater than zero".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_config() -> ServerConfig {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8765,
            deepgram_api_key: "dg".to_string(),
            elevenlabs_api_key: "el".to_string(),
            elevenlabs_voice_id: "voice".to_string(),
            openai_api_key: "oa".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4o-mini".to_string(),
            stt_streaming: true,
            language: "nl".to_string(),
            playback_mute_ms: 500,
            interrupt_mute_ms: 150,
            playback_done_timeout_secs: 30,
        }
    }

    #[test]
    fn complete_config_passes() {
        assert!(validate(&complete_config()).is_ok());
    }

    #[test]
    fn missing_credentials_are_listed() {
        let mut config = complete_config();
        config.deepgram_api_key.clear();
        config.openai_api_key.clear();
        let error = validate(&config).unwrap_err();
        assert!(error.contains("DEEPGRAM_API_KEY"));
        assert!(error.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn zero_mute_windows_are_rejected() {
        let mut config = complete_config();
        config.playback_mute_ms = 0;
        assert!(validate(&config).is_err());

        let mut config = complete_config();
        config.interrupt_mute_ms = 0;
        assert!(validate(&config).is_err());

        let mut config = complete_config();
        config.playback_done_timeout_secs = 0;
        assert!(validate(&config).is_err());
    }
}
