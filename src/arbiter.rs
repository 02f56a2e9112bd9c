//! Turn arbitration: at most one active speaker, and no capture at all while
//! the agent is producing audio output.
//!
//! Without per-speaker exclusivity, concurrent speakers would interleave
//! audio into one buffer; without the busy-speaking gate, the agent's own
//! playback leaking into capture would trigger self-transcription loops.

use crate::transport::SpeakerId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Session-wide flag: true exactly while agent-generated audio is playing.
///
/// Written only by the conversation orchestrator (set immediately before
/// playback starts, cleared on completion or error); everyone else, the
/// arbiter included, only reads it.
#[derive(Debug, Clone, Default)]
pub struct PlaybackFlag(Arc<AtomicBool>);

impl PlaybackFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why an admission request was turned down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The agent is currently playing its own audio.
    BusySpeaking,
    /// Another speaker holds the turn.
    SpeakerLocked,
}

/// Outcome of `TurnArbiter::try_admit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The speaker becomes the active speaker.
    Admitted,
    /// Duplicate start event from the speaker already holding the turn;
    /// callers treat this as a no-op.
    AlreadyActive,
    Rejected(RejectReason),
}

/// Enforces single-speaker turn-taking for one session.
#[derive(Debug)]
pub struct TurnArbiter {
    active: Option<SpeakerId>,
    playback: PlaybackFlag,
}

impl TurnArbiter {
    pub fn new(playback: PlaybackFlag) -> Self {
        Self {
            active: None,
            playback,
        }
    }

    /// Admission rules, evaluated in order: busy-speaking first, then the
    /// speaker lock (idempotent for the current holder), then admit.
    pub fn try_admit(&mut self, speaker: SpeakerId) -> Admission {
        if self.playback.is_set() {
            debug!(%speaker, "admission rejected: agent is speaking");
            return Admission::Rejected(RejectReason::BusySpeaking);
        }
        match self.active {
            Some(current) if current == speaker => Admission::AlreadyActive,
            Some(current) => {
                debug!(%speaker, %current, "admission rejected: speaker locked");
                Admission::Rejected(RejectReason::SpeakerLocked)
            }
            None => {
                self.active = Some(speaker);
                debug!(%speaker, "speaker admitted");
                Admission::Admitted
            }
        }
    }

    /// Clear the active speaker if it matches. Called on utterance finalize,
    /// stream error, or stream end. Returns whether the lock was released.
    pub fn release(&mut self, speaker: SpeakerId) -> bool {
        if self.active == Some(speaker) {
            self.active = None;
            debug!(%speaker, "speaker released");
            true
        } else {
            false
        }
    }

    pub fn active(&self) -> Option<SpeakerId> {
        self.active
    }

    /// Unconditionally drop the lock (session teardown).
    pub fn clear(&mut self) {
        self.active = None;
    }
}
