//! Streaming language-model client.
//!
//! One request per user turn: the transcript goes out with a fixed system
//! prompt, the reply comes back as a server-sent-events stream of text
//! deltas. The consumer pulls deltas from a channel and abandons the
//! request cooperatively when the turn is interrupted.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// End-to-end budget for one streamed reply.
pub const LLM_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The reply contract: short, spoken-register Dutch, nothing a TTS voice
/// cannot pronounce.
pub const SYSTEM_PROMPT: &str = "Je bent Dolores, een vriendelijke Nederlandse spraakassistent. \
Antwoord kort, in één tot drie zinnen, in spreektaal. \
Gebruik geen opsommingen, geen opmaak en geen emoji; je antwoord wordt voorgelezen.";

/// Error types for LLM operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Provider error ({status}): {body}")]
    ProviderError { status: u16, body: String },
    #[error("Stream error: {0}")]
    StreamError(String),
    #[error("Request timed out")]
    Timeout,
}

/// Streaming language model; the seam that lets tests feed the session
/// actor scripted deltas.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Start streaming a reply to `transcript`. Deltas arrive on the
    /// returned channel; the channel closes when the reply is complete.
    /// Cancelling the token abandons the upstream request.
    async fn stream_reply(
        &self,
        transcript: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<String, LlmError>>, LlmError>;
}

/// Configuration for the OpenAI-compatible chat client
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    /// Base URL of an OpenAI-compatible API (no trailing slash)
    pub base_url: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// OpenAI-compatible streaming chat client.
pub struct OpenAiLlm {
    client: reqwest::Client,
    config: LlmConfig,
}

impl OpenAiLlm {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::RequestFailed("API key is required".to_string()));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("Failed to build client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LanguageModel for OpenAiLlm {
    async fn stream_reply(
        &self,
        transcript: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Result<String, LlmError>>, LlmError> {
        let body = json!({
            "model": self.config.model,
            "stream": true,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": transcript},
            ],
        });

        let url = format!("{}/chat/completions", self.config.base_url);
        let deadline = Instant::now() + LLM_REQUEST_TIMEOUT;

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(LlmError::RequestFailed("Cancelled".to_string())),
            result = self
                .client
                .post(&url)
                .bearer_auth(&self.config.api_key)
                .json(&body)
                .send() => result.map_err(|e| LlmError::RequestFailed(e.to_string()))?,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ProviderError { status, body });
        }

        // Buffer of 1 keeps the producer in lockstep with the consumer, so
        // dropping the receiver on interrupt stalls and then aborts the
        // upstream read promptly.
        let (tx, rx) = mpsc::channel::<Result<String, LlmError>>(1);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut pending = String::new();

            loop {
                let chunk = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("LLM stream cancelled");
                        return;
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        warn!("LLM stream exceeded {:?}", LLM_REQUEST_TIMEOUT);
                        let _ = tx.send(Err(LlmError::Timeout)).await;
                        return;
                    }
                    chunk = stream.next() => chunk,
                };

                let chunk = match chunk {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let _ = tx.send(Err(LlmError::StreamError(e.to_string()))).await;
                        return;
                    }
                    None => return, // channel closes, reply complete
                };

                pending.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = pending.find('\n') {
                    let line = pending[..pos].trim_end_matches('\r').to_string();
                    pending.drain(..=pos);
                    match parse_sse_line(&line) {
                        SseLine::Delta(text) => {
                            if tx.send(Ok(text)).await.is_err() {
                                return; // consumer stopped iterating
                            }
                        }
                        SseLine::Done => return,
                        SseLine::Skip => {}
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// One parsed server-sent-events line.
#[derive(Debug, PartialEq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

/// Extract the text delta, if any, from one SSE line. Deltas without text
/// content (tool-call artefacts, role preambles) are skipped.
fn parse_sse_line(line: &str) -> SseLine {
    let Some(payload) = line.strip_prefix("data: ") else {
        return SseLine::Skip;
    };
    if payload == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else {
        return SseLine::Skip;
    };
    match value["choices"][0]["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => SseLine::Delta(text.to_string()),
        _ => SseLine::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_deltas() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hoi"}}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Delta("Hoi".to_string()));
    }

    #[test]
    fn done_marker_terminates() {
        assert_eq!(parse_sse_line("data: [DONE]"), SseLine::Done);
    }

    #[test]
    fn tool_call_deltas_are_filtered() {
        let line = r#"data: {"choices":[{"delta":{"tool_calls":[{"id":"call_1","function":{"name":"lookup"}}]}}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Skip);
    }

    #[test]
    fn role_preamble_and_blank_lines_are_skipped() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(line), SseLine::Skip);
        assert_eq!(parse_sse_line(""), SseLine::Skip);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Skip);
    }

    #[test]
    fn client_requires_api_key() {
        let result = OpenAiLlm::new(LlmConfig::default());
        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }
}
