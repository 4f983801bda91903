//! ElevenLabs text-to-speech over the HTTP REST API.

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{SpeechSynthesizer, TtsConfig, TtsError};

pub const ELEVENLABS_TTS_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";

/// Voice settings for ElevenLabs synthesis
#[derive(Debug, Clone, Serialize)]
pub struct VoiceSettings {
    /// Voice stability (0.0 to 1.0)
    pub stability: f32,
    /// Similarity boost (0.0 to 1.0)
    pub similarity_boost: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            stability: 0.5,
            similarity_boost: 0.8,
        }
    }
}

/// ElevenLabs TTS provider implementation using the HTTP REST API
pub struct ElevenLabsTts {
    client: reqwest::Client,
    config: TtsConfig,
    voice_settings: VoiceSettings,
}

impl ElevenLabsTts {
    pub fn new(config: TtsConfig) -> Result<Self, TtsError> {
        if config.api_key.is_empty() {
            return Err(TtsError::InvalidConfiguration(
                "API key is required for ElevenLabs".to_string(),
            ));
        }
        if config.voice_id.is_empty() {
            return Err(TtsError::InvalidConfiguration(
                "Voice ID is required for ElevenLabs".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| TtsError::NetworkError(format!("Failed to build client: {e}")))?;

        Ok(Self {
            client,
            config,
            voice_settings: VoiceSettings::default(),
        })
    }

    /// Build the request URL. ElevenLabs encodes the PCM output format in a
    /// query parameter ("pcm_16000" for raw S16LE at 16 kHz).
    fn request_url(&self) -> String {
        format!(
            "{ELEVENLABS_TTS_URL}/{}?output_format=pcm_{}",
            self.config.voice_id, self.config.sample_rate
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsTts {
    async fn synthesize(&self, text: &str) -> Result<Bytes, TtsError> {
        let body = json!({
            "text": text,
            "model_id": self.config.model,
            "voice_settings": self.voice_settings,
        });

        let response = self
            .client
            .post(self.request_url())
            .header("xi-api-key", &self.config.api_key)
            .header("Accept", "audio/pcm")
            .json(&body)
            .send()
            .await
            .map_err(|e| TtsError::NetworkError(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!("TTS API error ({}): {}", status, body);
            return Err(TtsError::ProviderError { status, body });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| TtsError::AudioGenerationFailed(format!("Failed to read audio: {e}")))?;

        debug!("Synthesized {} bytes for {} chars", audio.len(), text.len());
        Ok(audio)
    }

    fn provider_name(&self) -> &'static str {
        "elevenlabs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TtsConfig {
        TtsConfig {
            api_key: "test_key".to_string(),
            voice_id: "test_voice".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn requires_api_key_and_voice() {
        let missing_key = TtsConfig {
            voice_id: "v".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ElevenLabsTts::new(missing_key),
            Err(TtsError::InvalidConfiguration(_))
        ));

        let missing_voice = TtsConfig {
            api_key: "k".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ElevenLabsTts::new(missing_voice),
            Err(TtsError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn url_selects_raw_pcm_at_session_rate() {
        let tts = ElevenLabsTts::new(config()).unwrap();
        assert_eq!(
            tts.request_url(),
            "https://api.elevenlabs.io/v1/text-to-speech/test_voice?output_format=pcm_16000"
        );
    }
}
