//! WebSocket message types.
//!
//! All frames are JSON objects discriminated by a `type` field. Inbound
//! audio arrives as base64 PCM inside the JSON payload; outbound audio goes
//! back the same way, stamped with its slot index.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::core::session::SessionState;

/// Protocol version advertised in the connect-time config descriptor.
pub const PROTOCOL_VERSION: &str = "1";

/// Audio format constants for the outbound stream
pub const AUDIO_FORMAT: &str = "pcm_s16le";
pub const AUDIO_SAMPLE_RATE: u32 = 16000;
pub const AUDIO_CHANNELS: u16 = 1;

/// WebSocket message types for incoming messages
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "audio")]
    Audio {
        /// Base64-encoded PCM S16LE, 16 kHz, mono
        data: String,
    },
    #[serde(rename = "playback_done")]
    PlaybackDone,
    #[serde(rename = "interrupt")]
    Interrupt,
    #[serde(rename = "ping")]
    Ping,
}

/// WebSocket message types for outgoing messages
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "config")]
    Config {
        version: &'static str,
        stt: &'static str,
        tts: &'static str,
        #[serde(rename = "speakerVerification")]
        speaker_verification: bool,
        backend: &'static str,
    },
    #[serde(rename = "state")]
    State { state: SessionState },
    #[serde(rename = "transcript")]
    Transcript { text: String },
    #[serde(rename = "audio")]
    Audio {
        format: &'static str,
        #[serde(rename = "sampleRate")]
        sample_rate: u32,
        channels: u16,
        data: String,
        index: usize,
    },
    #[serde(rename = "audio_end")]
    AudioEnd,
    #[serde(rename = "error")]
    Error { error: String },
    #[serde(rename = "pong")]
    Pong,
}

impl ServerMessage {
    /// One synthesized sentence, base64-encoded for the wire.
    pub fn audio_chunk(index: usize, pcm: &[u8]) -> Self {
        ServerMessage::Audio {
            format: AUDIO_FORMAT,
            sample_rate: AUDIO_SAMPLE_RATE,
            channels: AUDIO_CHANNELS,
            data: BASE64.encode(pcm),
            index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_audio_message() {
        let json = r#"{"type":"audio","data":"AAAA"}"#;
        let message: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(message, ClientMessage::Audio { data } if data == "AAAA"));
    }

    #[test]
    fn parses_control_messages() {
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"playback_done"}"#).unwrap(),
            ClientMessage::PlaybackDone
        ));
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"interrupt"}"#).unwrap(),
            ClientMessage::Interrupt
        ));
        assert!(matches!(
            serde_json::from_str::<ClientMessage>(r#"{"type":"ping"}"#).unwrap(),
            ClientMessage::Ping
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"speak"}"#).is_err());
    }

    #[test]
    fn audio_chunk_carries_format_and_index() {
        let message = ServerMessage::audio_chunk(3, &[0x01, 0x02]);
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "audio");
        assert_eq!(json["format"], "pcm_s16le");
        assert_eq!(json["sampleRate"], 16000);
        assert_eq!(json["channels"], 1);
        assert_eq!(json["index"], 3);
        assert_eq!(json["data"], "AQI=");
    }

    #[test]
    fn state_serializes_lowercase() {
        let json = serde_json::to_value(ServerMessage::State {
            state: SessionState::Processing,
        })
        .unwrap();
        assert_eq!(json["type"], "state");
        assert_eq!(json["state"], "processing");
    }

    #[test]
    fn config_uses_camel_case_field() {
        let json = serde_json::to_value(ServerMessage::Config {
            version: PROTOCOL_VERSION,
            stt: "deepgram",
            tts: "elevenlabs",
            speaker_verification: false,
            backend: "dolores",
        })
        .unwrap();
        assert_eq!(json["type"], "config");
        assert_eq!(json["speakerVerification"], false);
    }
}
