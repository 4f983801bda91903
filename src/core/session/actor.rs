//! The session state machine.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::segment::{speakable, split_sentences};
use crate::core::speaker::SpeakerGate;
use crate::core::stt::{SttEvent, SttEventSink, SttHandle};
use crate::core::tts::TtsError;
use crate::handlers::ws::messages::ServerMessage;
use crate::handlers::ws::outbound::{OutboundSender, SendError};

use super::{
    Providers, SessionEvent, SessionState, SessionTiming, SlotState, TtsJob, TtsSlot,
};

/// Bookkeeping for one turn: the ordered TTS queue plus the segmenter
/// residual. Reset whenever a turn starts, is interrupted, or fails.
#[derive(Debug, Default)]
struct Turn {
    /// Monotonic serial; completions stamped with an older serial are stale.
    serial: u64,
    slots: Vec<TtsSlot>,
    next_emit: usize,
    pending_tts: usize,
    llm_done: bool,
    /// Partial sentence carried between LLM deltas.
    buffer: String,
    audio_started: bool,
    audio_ended: bool,
}

impl Turn {
    fn drained(&self) -> bool {
        self.llm_done && self.pending_tts == 0 && self.next_emit == self.slots.len()
    }
}

pub(super) struct SessionActor {
    id: u64,
    state: SessionState,
    providers: Providers,
    speaker: SpeakerGate,
    timing: SessionTiming,
    outbound: OutboundSender,
    events_tx: mpsc::Sender<SessionEvent>,
    /// Active STT upstream; `Some` only while listening.
    stt: Option<SttHandle>,
    /// Stamped into STT event sinks so a torn-down session cannot touch its
    /// successor.
    stt_generation: u64,
    /// Inbound frames before this instant are discarded.
    mute_until: Instant,
    turn: Turn,
    /// Broadcasts the current turn serial to the TTS worker.
    turn_tx: watch::Sender<u64>,
    tts_jobs: mpsc::UnboundedSender<TtsJob>,
    llm_cancel: Option<CancellationToken>,
    awaiting_playback: bool,
    playback_timer: Option<JoinHandle<()>>,
}

impl SessionActor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        id: u64,
        providers: Providers,
        speaker: SpeakerGate,
        timing: SessionTiming,
        outbound: OutboundSender,
        events_tx: mpsc::Sender<SessionEvent>,
        turn_tx: watch::Sender<u64>,
        tts_jobs: mpsc::UnboundedSender<TtsJob>,
    ) -> Self {
        Self {
            id,
            state: SessionState::Listening,
            providers,
            speaker,
            timing,
            outbound,
            events_tx,
            stt: None,
            stt_generation: 0,
            mute_until: Instant::now(),
            turn: Turn::default(),
            turn_tx,
            tts_jobs,
            llm_cancel: None,
            awaiting_playback: false,
            playback_timer: None,
        }
    }

    pub(super) async fn run(mut self, mut events: mpsc::Receiver<SessionEvent>) {
        debug!("Session {}: actor started", self.id);
        while let Some(event) = events.recv().await {
            if matches!(event, SessionEvent::Shutdown) {
                break;
            }
            if self.apply(event).await.is_err() {
                // Outbound channel gone: the transport disconnected.
                break;
            }
        }
        self.teardown();
        debug!("Session {}: actor exited", self.id);
    }

    async fn apply(&mut self, event: SessionEvent) -> Result<(), SendError> {
        match event {
            SessionEvent::Frame(pcm) => {
                self.handle_frame(pcm);
                Ok(())
            }
            SessionEvent::PlaybackDone => self.handle_playback_done().await,
            SessionEvent::Interrupt => self.handle_interrupt().await,
            SessionEvent::Stt { generation, event } => self.handle_stt(generation, event).await,
            SessionEvent::LlmDelta { turn, text } => self.handle_llm_delta(turn, text),
            SessionEvent::LlmDone { turn } => self.handle_llm_done(turn).await,
            SessionEvent::LlmFailed { turn, reason } => self.handle_llm_failed(turn, reason).await,
            SessionEvent::TtsResolved {
                turn,
                index,
                result,
            } => self.handle_tts_resolved(turn, index, result).await,
            SessionEvent::PlaybackTimeout { turn } => self.handle_playback_timeout(turn).await,
            SessionEvent::Shutdown => Ok(()),
        }
    }

    // ── inbound audio ───────────────────────────────────────────────────

    fn handle_frame(&mut self, pcm: Bytes) {
        // Echo discipline: while not listening, or inside a mute window,
        // frames never reach any STT upstream.
        if self.state != SessionState::Listening {
            return;
        }
        if Instant::now() < self.mute_until {
            return;
        }
        if !self.speaker.authorized(&pcm) {
            debug!("Session {}: frame rejected by speaker gate", self.id);
            return;
        }

        if self.stt.is_none() {
            self.stt_generation += 1;
            debug!(
                "Session {}: opening STT session (generation {})",
                self.id, self.stt_generation
            );
            let sink = self.stt_sink(self.stt_generation);
            self.stt = Some(self.providers.stt.open(sink));
        }

        if let Some(stt) = &self.stt {
            if stt.send(pcm).is_err() {
                // Session already died; a fresh one starts on the next frame.
                self.stt = None;
            }
        }
    }

    fn stt_sink(&self, generation: u64) -> SttEventSink {
        let events = self.events_tx.clone();
        Arc::new(move |event| {
            let events = events.clone();
            Box::pin(async move {
                let _ = events.send(SessionEvent::Stt { generation, event }).await;
            })
        })
    }

    // ── STT events ──────────────────────────────────────────────────────

    async fn handle_stt(&mut self, generation: u64, event: SttEvent) -> Result<(), SendError> {
        if generation != self.stt_generation {
            return Ok(());
        }

        match event {
            SttEvent::Interim(text) => {
                debug!("Session {}: interim: {}", self.id, text);
                Ok(())
            }
            SttEvent::Final(segment) => {
                debug!("Session {}: final segment: {}", self.id, segment);
                Ok(())
            }
            SttEvent::UtteranceEnd(transcript) => self.handle_utterance_end(transcript).await,
            SttEvent::Error(reason) => {
                warn!("Session {}: STT error: {}", self.id, reason);
                self.stt = None;
                if self.state == SessionState::Listening {
                    self.outbound
                        .send(&ServerMessage::Error {
                            error: format!("Transcription failed: {reason}"),
                        })
                        .await?;
                }
                Ok(())
            }
            SttEvent::Closed => {
                debug!("Session {}: STT upstream closed", self.id);
                self.stt = None;
                Ok(())
            }
        }
    }

    async fn handle_utterance_end(&mut self, transcript: String) -> Result<(), SendError> {
        if self.state != SessionState::Listening {
            return Ok(());
        }
        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            return Ok(());
        }

        info!("Session {}: utterance: {}", self.id, transcript);

        // Leaving `listening`: the upstream dies first, so the assistant's
        // own voice can never be transcribed.
        if let Some(stt) = self.stt.take() {
            stt.shutdown();
        }

        self.begin_turn();
        self.outbound
            .send(&ServerMessage::Transcript {
                text: transcript.clone(),
            })
            .await?;
        self.set_state(SessionState::Processing).await?;
        self.spawn_llm(transcript);
        Ok(())
    }

    // ── LLM stream ──────────────────────────────────────────────────────

    fn spawn_llm(&mut self, transcript: String) {
        let cancel = CancellationToken::new();
        self.llm_cancel = Some(cancel.clone());

        let llm = self.providers.llm.clone();
        let events = self.events_tx.clone();
        let turn = self.turn.serial;

        tokio::spawn(async move {
            match llm.stream_reply(&transcript, cancel).await {
                Ok(mut deltas) => {
                    while let Some(delta) = deltas.recv().await {
                        match delta {
                            Ok(text) => {
                                if events.send(SessionEvent::LlmDelta { turn, text }).await.is_err()
                                {
                                    return;
                                }
                            }
                            Err(e) => {
                                let failed = SessionEvent::LlmFailed {
                                    turn,
                                    reason: e.to_string(),
                                };
                                let _ = events.send(failed).await;
                                return;
                            }
                        }
                    }
                    let _ = events.send(SessionEvent::LlmDone { turn }).await;
                }
                Err(e) => {
                    let failed = SessionEvent::LlmFailed {
                        turn,
                        reason: e.to_string(),
                    };
                    let _ = events.send(failed).await;
                }
            }
        });
    }

    fn handle_llm_delta(&mut self, turn: u64, text: String) -> Result<(), SendError> {
        if turn != self.turn.serial {
            return Ok(());
        }
        self.turn.buffer.push_str(&text);
        let (sentences, residual) = split_sentences(&self.turn.buffer);
        self.turn.buffer = residual;
        for sentence in sentences {
            self.enqueue_sentence(sentence);
        }
        Ok(())
    }

    async fn handle_llm_done(&mut self, turn: u64) -> Result<(), SendError> {
        if turn != self.turn.serial {
            return Ok(());
        }
        self.turn.llm_done = true;
        self.llm_cancel = None;

        // Whatever trails the last terminator is still worth speaking.
        let tail = self.turn.buffer.trim().to_string();
        self.turn.buffer.clear();
        if speakable(&tail) {
            self.enqueue_sentence(tail);
        }

        self.advance_emitter().await
    }

    async fn handle_llm_failed(&mut self, turn: u64, reason: String) -> Result<(), SendError> {
        if turn != self.turn.serial {
            return Ok(());
        }
        warn!("Session {}: LLM stream failed: {}", self.id, reason);
        self.outbound
            .send(&ServerMessage::Error {
                error: format!("Assistant reply failed: {reason}"),
            })
            .await?;

        let needs_audio_end = self.turn.audio_started && !self.turn.audio_ended;
        self.begin_turn();
        if needs_audio_end {
            self.outbound.send(&ServerMessage::AudioEnd).await?;
        }
        self.set_state(SessionState::Listening).await
    }

    // ── TTS queue and ordered emission ──────────────────────────────────

    fn enqueue_sentence(&mut self, text: String) {
        let index = self.turn.slots.len();
        debug!("Session {}: slot {} reserved: {}", self.id, index, text);
        self.turn.slots.push(TtsSlot {
            text: text.clone(),
            state: SlotState::Reserved,
        });
        self.turn.pending_tts += 1;
        let _ = self.tts_jobs.send(TtsJob {
            turn: self.turn.serial,
            index,
            text,
        });
    }

    async fn handle_tts_resolved(
        &mut self,
        turn: u64,
        index: usize,
        result: Result<Bytes, TtsError>,
    ) -> Result<(), SendError> {
        if turn != self.turn.serial {
            return Ok(());
        }
        let Some(slot) = self.turn.slots.get_mut(index) else {
            return Ok(());
        };
        if !matches!(slot.state, SlotState::Reserved) {
            return Ok(());
        }

        self.turn.pending_tts -= 1;
        slot.state = match result {
            Ok(audio) if !audio.is_empty() => SlotState::Ready(audio),
            Ok(_) => {
                warn!("Session {}: empty audio for slot {}", self.id, index);
                SlotState::Failed
            }
            Err(e) => {
                warn!(
                    "Session {}: synthesis failed for slot {}: {}",
                    self.id, index, e
                );
                SlotState::Failed
            }
        };

        self.advance_emitter().await
    }

    /// Emit ready slots in submission order. Failed slots advance the
    /// cursor without emitting; a still-reserved slot stops the scan so
    /// audio order always matches submission order.
    async fn advance_emitter(&mut self) -> Result<(), SendError> {
        loop {
            let ready = match self.turn.slots.get(self.turn.next_emit) {
                None | Some(TtsSlot {
                    state: SlotState::Reserved,
                    ..
                }) => break,
                Some(TtsSlot {
                    state: SlotState::Failed,
                    ..
                }) => None,
                Some(TtsSlot {
                    state: SlotState::Ready(audio),
                    ..
                }) => Some(audio.clone()),
            };

            if let Some(audio) = ready {
                let index = self.turn.next_emit;
                if !self.turn.audio_started {
                    self.turn.audio_started = true;
                    self.set_state(SessionState::Speaking).await?;
                }
                self.outbound
                    .send(&ServerMessage::audio_chunk(index, &audio))
                    .await?;
            }
            self.turn.next_emit += 1;
        }

        if self.turn.drained() && !self.turn.audio_ended && self.state != SessionState::Listening {
            self.finish_turn().await?;
        }
        Ok(())
    }

    async fn finish_turn(&mut self) -> Result<(), SendError> {
        if self.turn.audio_started {
            debug!("Session {}: turn complete, awaiting playback", self.id);
            self.turn.audio_ended = true;
            self.outbound.send(&ServerMessage::AudioEnd).await?;
            self.awaiting_playback = true;
            // Fallback in case playback_done never arrives.
            self.mute_until = Instant::now() + self.timing.playback_mute;
            self.arm_playback_timer();
            Ok(())
        } else {
            debug!("Session {}: turn produced no audio", self.id);
            self.set_state(SessionState::Listening).await
        }
    }

    // ── playback handshake ──────────────────────────────────────────────

    fn arm_playback_timer(&mut self) {
        let events = self.events_tx.clone();
        let turn = self.turn.serial;
        let wait = self.timing.playback_done_timeout;
        self.playback_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let _ = events.send(SessionEvent::PlaybackTimeout { turn }).await;
        }));
    }

    async fn handle_playback_done(&mut self) -> Result<(), SendError> {
        if !self.awaiting_playback {
            return Ok(());
        }
        debug!("Session {}: playback acknowledged", self.id);
        self.resume_listening().await
    }

    async fn handle_playback_timeout(&mut self, turn: u64) -> Result<(), SendError> {
        if turn != self.turn.serial || !self.awaiting_playback {
            return Ok(());
        }
        info!(
            "Session {}: no playback_done within {:?}, resuming",
            self.id, self.timing.playback_done_timeout
        );
        self.resume_listening().await
    }

    async fn resume_listening(&mut self) -> Result<(), SendError> {
        self.awaiting_playback = false;
        if let Some(timer) = self.playback_timer.take() {
            timer.abort();
        }
        self.mute_until = Instant::now() + self.timing.playback_mute;
        self.set_state(SessionState::Listening).await
    }

    // ── barge-in ────────────────────────────────────────────────────────

    async fn handle_interrupt(&mut self) -> Result<(), SendError> {
        if self.state == SessionState::Listening {
            return Ok(());
        }
        info!("Session {}: barge-in", self.id);

        // Ordering matters: queued slots first, then the LLM stream, then
        // any STT upstream, then the terminal audio_end, then the state.
        let needs_audio_end = self.turn.audio_started && !self.turn.audio_ended;
        self.begin_turn();
        if let Some(stt) = self.stt.take() {
            stt.shutdown();
        }
        if needs_audio_end {
            self.outbound.send(&ServerMessage::AudioEnd).await?;
        }
        self.mute_until = Instant::now() + self.timing.interrupt_mute;
        self.set_state(SessionState::Listening).await
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Drop all turn state and invalidate in-flight completions. Also the
    /// first half of the interrupt path: it clears the queue and cancels
    /// the LLM stream.
    fn begin_turn(&mut self) {
        self.turn.serial += 1;
        let _ = self.turn_tx.send(self.turn.serial);
        self.turn.slots.clear();
        self.turn.next_emit = 0;
        self.turn.pending_tts = 0;
        self.turn.llm_done = false;
        self.turn.buffer.clear();
        self.turn.audio_started = false;
        self.turn.audio_ended = false;
        self.awaiting_playback = false;
        if let Some(timer) = self.playback_timer.take() {
            timer.abort();
        }
        if let Some(cancel) = self.llm_cancel.take() {
            cancel.cancel();
        }
    }

    async fn set_state(&mut self, next: SessionState) -> Result<(), SendError> {
        if self.state == next {
            return Ok(());
        }
        debug!("Session {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
        self.outbound
            .send(&ServerMessage::State { state: next })
            .await
    }

    fn teardown(&mut self) {
        self.turn.serial += 1;
        let _ = self.turn_tx.send(self.turn.serial);
        self.turn.slots.clear();
        if let Some(cancel) = self.llm_cancel.take() {
            cancel.cancel();
        }
        if let Some(stt) = self.stt.take() {
            stt.shutdown();
        }
        if let Some(timer) = self.playback_timer.take() {
            timer.abort();
        }
        info!("Session {}: closed", self.id);
    }
}
