//! Conversation orchestration: finalize -> transcribe -> reply -> synthesize
//! -> play, one turn at a time.
//!
//! The busy-speaking flag is set here immediately before playback and
//! cleared on completion or error; no other writer exists. A failed reply
//! generation falls back to a fixed apology so the speaker always hears
//! something once transcription succeeded; the apology is not stored as a
//! real turn.

use crate::accumulator::Utterance;
use crate::arbiter::PlaybackFlag;
use crate::chat::{ChatMessage, ReplyBackend};
use crate::memory::MemoryStore;
use crate::stt::SttBackend;
use crate::transport::AudioSink;
use crate::tts::TtsBackend;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Spoken when reply generation fails after a successful transcription.
pub const FALLBACK_REPLY: &str = "Sorry, there was an error generating a response.";

/// How one turn ended. Purely informational; all recovery already happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Transcription failed or heard nothing; turn aborted silently.
    NoTranscript,
    /// Playback of the (real or fallback) reply completed.
    Played { used_fallback: bool },
    /// Synthesis failed; nothing was played.
    SynthesisFailed,
    /// Playback started but errored; the busy-speaking flag was cleared.
    PlaybackFailed { used_fallback: bool },
}

/// Sequences one conversational turn per finalized utterance.
pub struct ConversationOrchestrator {
    stt: Arc<dyn SttBackend>,
    chat: Arc<dyn ReplyBackend>,
    tts: Arc<dyn TtsBackend>,
    memory: Arc<MemoryStore>,
    playback: PlaybackFlag,
}

impl ConversationOrchestrator {
    pub fn new(
        stt: Arc<dyn SttBackend>,
        chat: Arc<dyn ReplyBackend>,
        tts: Arc<dyn TtsBackend>,
        memory: Arc<MemoryStore>,
        playback: PlaybackFlag,
    ) -> Self {
        Self {
            stt,
            chat,
            tts,
            memory,
            playback,
        }
    }

    /// Run one turn to completion. Never fails the session; every error is
    /// logged and folded into the outcome.
    pub async fn run_turn(&self, sink: Arc<dyn AudioSink>, utterance: Utterance) -> TurnOutcome {
        let speaker = utterance.speaker;

        let transcript = match self.stt.transcribe(&utterance).await {
            Ok(t) => t,
            Err(e) => {
                warn!(%speaker, error = %e, "transcription failed, aborting turn");
                return TurnOutcome::NoTranscript;
            }
        };
        let transcript = transcript.trim();
        if transcript.is_empty() {
            debug!(%speaker, "empty transcript, aborting turn");
            return TurnOutcome::NoTranscript;
        }
        info!(%speaker, transcript, "utterance transcribed");

        let mut messages = vec![ChatMessage::system(self.memory.personality())];
        messages.extend(self.memory.history_for(speaker));
        messages.push(ChatMessage::user(transcript));

        let (reply, used_fallback) = match self.chat.generate(&messages).await {
            Ok(r) => (r, false),
            Err(e) => {
                warn!(%speaker, error = %e, "reply generation failed, using fallback");
                (FALLBACK_REPLY.to_string(), true)
            }
        };

        // Only real exchanges enter memory; the fallback apology would
        // pollute future prompts with error text.
        if !used_fallback {
            if let Err(e) = self.memory.append_exchange(speaker, transcript, &reply) {
                warn!(%speaker, error = %e, "failed to persist exchange");
            }
        }

        let payload = match self.tts.synthesize(&reply).await {
            Ok(p) => p,
            Err(e) => {
                warn!(%speaker, error = %e, "synthesis failed, no audio response");
                return TurnOutcome::SynthesisFailed;
            }
        };
        if payload.is_empty() {
            debug!(%speaker, "synthesis produced no audio, skipping playback");
            return TurnOutcome::Played { used_fallback };
        }

        self.playback.set();
        let played = sink.play(payload).await;
        self.playback.clear();

        match played {
            Ok(()) => {
                info!(%speaker, used_fallback, "reply played");
                TurnOutcome::Played { used_fallback }
            }
            Err(e) => {
                warn!(%speaker, error = %e, "playback failed");
                TurnOutcome::PlaybackFailed { used_fallback }
            }
        }
    }

    pub fn playback_flag(&self) -> PlaybackFlag {
        self.playback.clone()
    }
}
