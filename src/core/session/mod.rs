//! Per-session conversation pipeline.
//!
//! Each client connection gets one logical actor that owns every piece of
//! session state and serializes all transitions: upstream STT events, LLM
//! deltas, TTS completions, client acknowledgements and timers all arrive
//! as [`SessionEvent`]s on one queue. No locks guard the TTS queue, the
//! state field or the emit cursor: the actor is the only writer.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::core::llm::LanguageModel;
use crate::core::speaker::SpeakerGate;
use crate::core::stt::{SttConnector, SttEvent};
use crate::core::tts::{SpeechSynthesizer, TTS_REQUEST_TIMEOUT, TtsError};
use crate::handlers::ws::outbound::OutboundSender;

mod actor;

use actor::SessionActor;

/// Event queue sized for audio workloads: microphone frames flow through
/// the same queue as control events, so a shallow buffer would stall the
/// reader task on every burst.
const EVENT_QUEUE_SIZE: usize = 1024;

/// Conversation state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Listening,
    Processing,
    Speaking,
}

/// Everything that can happen to a session, serialized onto the actor.
#[derive(Debug)]
pub enum SessionEvent {
    /// One decoded PCM frame from the client microphone.
    Frame(Bytes),
    /// Client finished playing the last turn's audio.
    PlaybackDone,
    /// Barge-in: the user started talking over the assistant.
    Interrupt,
    /// Event from the STT session spawned under `generation`.
    Stt { generation: u64, event: SttEvent },
    /// One text fragment from the LLM stream of turn `turn`.
    LlmDelta { turn: u64, text: String },
    /// The LLM stream of turn `turn` completed.
    LlmDone { turn: u64 },
    /// The LLM stream of turn `turn` failed.
    LlmFailed { turn: u64, reason: String },
    /// A TTS job resolved; `result` fills slot `index` of turn `turn`.
    TtsResolved {
        turn: u64,
        index: usize,
        result: Result<Bytes, TtsError>,
    },
    /// The client never acknowledged playback of turn `turn`.
    PlaybackTimeout { turn: u64 },
    /// Transport disconnected or the process is shutting down.
    Shutdown,
}

/// One reserved position in the ordered output sequence.
#[derive(Debug)]
pub struct TtsSlot {
    pub text: String,
    pub state: SlotState,
}

#[derive(Debug)]
pub enum SlotState {
    Reserved,
    Ready(Bytes),
    Failed,
}

/// One synthesis job for the serial runner.
#[derive(Debug)]
struct TtsJob {
    turn: u64,
    index: usize,
    text: String,
}

/// The three upstream providers a session talks to.
#[derive(Clone)]
pub struct Providers {
    pub stt: Arc<dyn SttConnector>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn SpeechSynthesizer>,
}

/// Hand-tuned windows of the playback handshake. None of these may be
/// zero: the mute windows are what keep speaker decay out of the next
/// listening window.
#[derive(Debug, Clone)]
pub struct SessionTiming {
    /// Mute after `audio_end`/`playback_done`, absorbing speaker tail-off.
    pub playback_mute: Duration,
    /// Shorter mute after a barge-in.
    pub interrupt_mute: Duration,
    /// How long to wait for `playback_done` before listening resumes anyway.
    pub playback_done_timeout: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            playback_mute: Duration::from_millis(500),
            interrupt_mute: Duration::from_millis(150),
            playback_done_timeout: Duration::from_secs(30),
        }
    }
}

/// Handle held by the transport: the way into the actor's event queue.
#[derive(Clone)]
pub struct SessionHandle {
    pub id: u64,
    events: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Post one event; fails only when the actor already exited.
    pub async fn post(&self, event: SessionEvent) -> Result<(), ()> {
        self.events.send(event).await.map_err(|_| ())
    }

    /// Best-effort shutdown signal, usable from sync contexts.
    pub fn signal_shutdown(&self) {
        let _ = self.events.try_send(SessionEvent::Shutdown);
    }
}

/// Factory for session actors.
pub struct Session;

impl Session {
    /// Spawn the actor and its serial TTS worker for one connection.
    pub fn spawn(
        id: u64,
        providers: Providers,
        speaker: SpeakerGate,
        timing: SessionTiming,
        outbound: OutboundSender,
    ) -> SessionHandle {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_SIZE);
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (turn_tx, turn_rx) = watch::channel(0u64);

        // The worker exits when the actor drops the job sender.
        let _ = spawn_tts_worker(providers.tts.clone(), jobs_rx, turn_rx, events_tx.clone());

        let actor = SessionActor::new(
            id,
            providers,
            speaker,
            timing,
            outbound,
            events_tx.clone(),
            turn_tx,
            jobs_tx,
        );
        tokio::spawn(actor.run(events_rx));

        SessionHandle {
            id,
            events: events_tx,
        }
    }
}

/// Serial TTS job runner.
///
/// Jobs run strictly one at a time in submission order; the upstream is
/// rate-limited and parallel synthesis yields intermittent 429s. A job
/// whose turn has moved on, including one overtaken by an interrupt while
/// in flight, is abandoned without posting a result.
fn spawn_tts_worker(
    tts: Arc<dyn SpeechSynthesizer>,
    mut jobs: mpsc::UnboundedReceiver<TtsJob>,
    mut current_turn: watch::Receiver<u64>,
    events: mpsc::Sender<SessionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(job) = jobs.recv().await {
            if *current_turn.borrow() != job.turn {
                continue;
            }

            let result = tokio::select! {
                changed = current_turn.wait_for(|turn| *turn != job.turn) => {
                    if changed.is_err() {
                        break; // actor gone
                    }
                    continue;
                }
                result = timeout(TTS_REQUEST_TIMEOUT, tts.synthesize(&job.text)) => match result {
                    Ok(Ok(audio)) => Ok(audio),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(TtsError::Timeout),
                },
            };

            let resolved = SessionEvent::TtsResolved {
                turn: job.turn,
                index: job.index,
                result,
            };
            if events.send(resolved).await.is_err() {
                break;
            }
        }
    })
}
