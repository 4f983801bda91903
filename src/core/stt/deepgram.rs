//! Deepgram live-transcription session.
//!
//! One task per session owns the upstream WebSocket: it drains queued
//! microphone frames into the socket, parses transcription results, and
//! publishes [`SttEvent`]s through the sink until cancelled or closed.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, protocol::Message},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    STT_START_TIMEOUT, SttConfig, SttConnector, SttError, SttEvent, SttEventSink, SttHandle,
    UtteranceBuffer,
};

const DEEPGRAM_LISTEN_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Deepgram transcription response structure
#[derive(Debug, Deserialize)]
struct DeepgramResponse {
    #[serde(rename = "type")]
    response_type: String,
    channel: Option<DeepgramChannel>,
    is_final: Option<bool>,
    speech_final: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Debug, Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Deepgram error response structure
#[derive(Debug, Deserialize)]
struct DeepgramErrorBody {
    description: String,
}

/// Spawns Deepgram live-transcription sessions.
pub struct DeepgramConnector {
    config: SttConfig,
}

impl DeepgramConnector {
    pub fn new(config: SttConfig) -> Result<Self, SttError> {
        if config.api_key.is_empty() {
            return Err(SttError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }
        Ok(Self { config })
    }

    /// Build the WebSocket URL with query parameters
    fn build_stream_url(config: &SttConfig) -> Result<String, SttError> {
        let mut url = Url::parse(DEEPGRAM_LISTEN_URL)
            .map_err(|e| SttError::ConfigurationError(format!("Invalid WebSocket URL: {e}")))?;

        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair("model", &config.model);
            query_pairs.append_pair("language", &config.language);
            query_pairs.append_pair("encoding", "linear16");
            query_pairs.append_pair("sample_rate", &config.sample_rate.to_string());
            query_pairs.append_pair("channels", &config.channels.to_string());
            query_pairs.append_pair("interim_results", &config.interim_results.to_string());
            query_pairs.append_pair("smart_format", "true");
            query_pairs.append_pair("endpointing", &config.endpointing_ms.to_string());
            query_pairs.append_pair("utterance_end_ms", &config.utterance_end_ms.to_string());
        }

        Ok(url.to_string())
    }
}

impl SttConnector for DeepgramConnector {
    fn open(&self, sink: SttEventSink) -> SttHandle {
        let (audio_tx, audio_rx) = mpsc::unbounded_channel::<Bytes>();
        let cancel = CancellationToken::new();

        tokio::spawn(run_stream(
            self.config.clone(),
            audio_rx,
            sink,
            cancel.clone(),
        ));

        SttHandle::new(audio_tx, cancel)
    }

    fn provider_name(&self) -> &'static str {
        "deepgram"
    }
}

/// Owns the upstream WebSocket for the lifetime of one listening window.
async fn run_stream(
    config: SttConfig,
    mut audio_rx: mpsc::UnboundedReceiver<Bytes>,
    sink: SttEventSink,
    cancel: CancellationToken,
) {
    let ws_url = match DeepgramConnector::build_stream_url(&config) {
        Ok(url) => url,
        Err(e) => {
            sink(SttEvent::Error(e.to_string())).await;
            return;
        }
    };

    let mut request = match ws_url.as_str().into_client_request() {
        Ok(request) => request,
        Err(e) => {
            sink(SttEvent::Error(format!("Invalid upstream request: {e}"))).await;
            return;
        }
    };
    match HeaderValue::from_str(&format!("token {}", config.api_key)) {
        Ok(value) => {
            request.headers_mut().insert("Authorization", value);
        }
        Err(e) => {
            sink(SttEvent::Error(format!("Invalid API key: {e}"))).await;
            return;
        }
    }

    let connect = timeout(STT_START_TIMEOUT, connect_async(request));
    let ws_stream = tokio::select! {
        _ = cancel.cancelled() => return,
        result = connect => match result {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                warn!("Failed to connect to Deepgram: {}", e);
                sink(SttEvent::Error(format!("Connection failed: {e}"))).await;
                return;
            }
            Err(_) => {
                warn!("Deepgram connect timed out after {:?}", STT_START_TIMEOUT);
                sink(SttEvent::Error("Connection timeout".to_string())).await;
                return;
            }
        },
    };

    info!("Connected to Deepgram live transcription");
    let (mut ws_sink, mut ws_source) = ws_stream.split();
    let mut utterance = UtteranceBuffer::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("STT session cancelled");
                // Courtesy close; the upstream finalizes billing on it.
                let _ = ws_sink.send(Message::Close(None)).await;
                break;
            }

            frame = audio_rx.recv() => {
                match frame {
                    Some(pcm) => {
                        if let Err(e) = ws_sink.send(Message::Binary(pcm.to_vec().into())).await {
                            warn!("Failed to send audio upstream: {}", e);
                            sink(SttEvent::Error(format!("Upstream send failed: {e}"))).await;
                            break;
                        }
                    }
                    None => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            message = ws_source.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = interpret_message(&text, &mut utterance) {
                            let is_error = matches!(event, SttEvent::Error(_));
                            sink(event).await;
                            if is_error {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("Deepgram closed the stream: {:?}", frame);
                        sink(SttEvent::Closed).await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Deepgram stream error: {}", e);
                        sink(SttEvent::Error(format!("Stream error: {e}"))).await;
                        break;
                    }
                    None => {
                        sink(SttEvent::Closed).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Translate one upstream text message into at most one session event,
/// updating the utterance buffer along the way.
fn interpret_message(text: &str, utterance: &mut UtteranceBuffer) -> Option<SttEvent> {
    let response: DeepgramResponse = match serde_json::from_str(text) {
        Ok(response) => response,
        Err(e) => {
            debug!("Unparseable Deepgram message ({e}): {text}");
            return None;
        }
    };

    match response.response_type.as_str() {
        "Results" => {
            let transcript = response
                .channel
                .as_ref()
                .and_then(|c| c.alternatives.first())
                .map(|a| a.transcript.trim())
                .unwrap_or_default();

            if !response.is_final.unwrap_or(false) {
                if transcript.is_empty() {
                    return None;
                }
                return Some(SttEvent::Interim(transcript.to_string()));
            }

            utterance.push_final(transcript);

            // speech_final carries the endpointing decision: the silence
            // threshold elapsed, so the utterance is complete.
            if response.speech_final.unwrap_or(false) {
                return utterance.flush().map(SttEvent::UtteranceEnd);
            }

            if transcript.is_empty() {
                None
            } else {
                Some(SttEvent::Final(transcript.to_string()))
            }
        }
        "UtteranceEnd" => utterance.flush().map(SttEvent::UtteranceEnd),
        "Metadata" => None,
        "Error" => {
            let description = serde_json::from_str::<DeepgramErrorBody>(text)
                .map(|body| body.description)
                .unwrap_or_else(|_| "Unknown error from Deepgram".to_string());
            Some(SttEvent::Error(description))
        }
        other => {
            debug!("Unknown Deepgram response type: {}", other);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_requires_api_key() {
        let result = DeepgramConnector::new(SttConfig::default());
        assert!(matches!(result, Err(SttError::AuthenticationFailed(_))));
    }

    #[test]
    fn stream_url_carries_protocol_settings() {
        let config = SttConfig {
            api_key: "test_key".to_string(),
            ..Default::default()
        };
        let url = DeepgramConnector::build_stream_url(&config).unwrap();
        assert!(url.starts_with("wss://api.deepgram.com/v1/listen"));
        assert!(url.contains("model=nova-2"));
        assert!(url.contains("language=nl"));
        assert!(url.contains("encoding=linear16"));
        assert!(url.contains("sample_rate=16000"));
        assert!(url.contains("channels=1"));
        assert!(url.contains("interim_results=true"));
        assert!(url.contains("smart_format=true"));
        assert!(url.contains("endpointing=500"));
        assert!(url.contains("utterance_end_ms=1500"));
    }

    #[test]
    fn interim_results_do_not_touch_the_utterance() {
        let mut utterance = UtteranceBuffer::default();
        let message = r#"{
            "type": "Results",
            "channel": {"alternatives": [{"transcript": "hallo Do", "confidence": 0.7}]},
            "is_final": false,
            "speech_final": false
        }"#;

        let event = interpret_message(message, &mut utterance);
        assert_eq!(event, Some(SttEvent::Interim("hallo Do".to_string())));
        assert!(utterance.is_empty());
    }

    #[test]
    fn final_results_accumulate_until_utterance_end() {
        let mut utterance = UtteranceBuffer::default();
        let final_message = r#"{
            "type": "Results",
            "channel": {"alternatives": [{"transcript": "hallo", "confidence": 0.9}]},
            "is_final": true,
            "speech_final": false
        }"#;
        let event = interpret_message(final_message, &mut utterance);
        assert_eq!(event, Some(SttEvent::Final("hallo".to_string())));

        let final_message = r#"{
            "type": "Results",
            "channel": {"alternatives": [{"transcript": "Dolores", "confidence": 0.9}]},
            "is_final": true,
            "speech_final": false
        }"#;
        interpret_message(final_message, &mut utterance);

        let end_message = r#"{"type": "UtteranceEnd", "last_word_end": 2.1}"#;
        let event = interpret_message(end_message, &mut utterance);
        assert_eq!(
            event,
            Some(SttEvent::UtteranceEnd("hallo Dolores".to_string()))
        );
        assert!(utterance.is_empty());
    }

    #[test]
    fn speech_final_flushes_immediately() {
        let mut utterance = UtteranceBuffer::default();
        let message = r#"{
            "type": "Results",
            "channel": {"alternatives": [{"transcript": "hallo Dolores", "confidence": 0.9}]},
            "is_final": true,
            "speech_final": true
        }"#;

        let event = interpret_message(message, &mut utterance);
        assert_eq!(
            event,
            Some(SttEvent::UtteranceEnd("hallo Dolores".to_string()))
        );
    }

    #[test]
    fn silent_utterance_end_emits_nothing() {
        let mut utterance = UtteranceBuffer::default();
        let event = interpret_message(r#"{"type": "UtteranceEnd"}"#, &mut utterance);
        assert_eq!(event, None);
    }

    #[test]
    fn upstream_errors_are_surfaced() {
        let mut utterance = UtteranceBuffer::default();
        let message = r#"{
            "type": "Error",
            "description": "Invalid API key",
            "message": "auth failure"
        }"#;
        let event = interpret_message(message, &mut utterance);
        assert_eq!(event, Some(SttEvent::Error("Invalid API key".to_string())));
    }
}
