//! Optional speaker verification gate.
//!
//! Every inbound microphone frame passes through the gate before it may be
//! forwarded to the STT upstream. Without a configured predicate the gate
//! accepts everything.

use std::sync::Arc;

/// Predicate over a raw PCM frame deciding whether the speaker is allowed
/// to drive the conversation.
pub type SpeakerPredicate = Arc<dyn Fn(&[u8]) -> bool + Send + Sync>;

/// Per-session speaker gate. Cloneable so the session actor can own one
/// while the config descriptor reports whether verification is active.
#[derive(Clone, Default)]
pub struct SpeakerGate {
    predicate: Option<SpeakerPredicate>,
}

impl SpeakerGate {
    /// Gate without a predicate: every frame is authorized.
    pub fn unconfigured() -> Self {
        Self { predicate: None }
    }

    /// Gate backed by a caller-supplied predicate.
    pub fn with_predicate(predicate: SpeakerPredicate) -> Self {
        Self {
            predicate: Some(predicate),
        }
    }

    /// Whether a verification predicate is configured.
    pub fn is_configured(&self) -> bool {
        self.predicate.is_some()
    }

    /// Check one PCM frame.
    pub fn authorized(&self, pcm: &[u8]) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(pcm),
            None => true,
        }
    }
}
