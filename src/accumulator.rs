//! Utterance accumulation: buffering one speaker's voiced frames until a
//! silence gap closes the turn.
//!
//! State machine per admitted speaker: Idle -> Recording -> Finalizing.
//! Voiced frames are appended in arrival order; silent frames are dropped
//! from the buffer. Every voiced frame rearms the silence deadline, which is
//! left running across interleaved silent frames. Deadline expiry, stream
//! end, or stream error finalizes with whatever is buffered.

use crate::audio::PcmFrame;
use crate::gate::FrameClass;
use crate::transport::SpeakerId;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// What the accumulator did with an offered frame. `Started` and `Buffered`
/// instruct the owner to (re)arm the silence deadline; `Ignored` leaves any
/// running deadline untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDisposition {
    /// First voiced frame: Idle -> Recording.
    Started,
    /// Voiced frame appended while Recording.
    Buffered,
    /// Silent frame, dropped from the buffer.
    Ignored,
}

/// One bounded stretch of a single speaker's voiced audio.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub speaker: SpeakerId,
    /// Concatenation of exactly the voiced frames, in arrival order.
    pub samples: Vec<i16>,
    /// Number of voiced frames that contributed to `samples`.
    pub voiced_frames: usize,
    /// When the utterance was finalized.
    pub finalized_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccumulatorState {
    Idle,
    Recording,
}

/// Buffers voiced frames for one speaker into a candidate utterance.
///
/// The accumulator does not own a clock; its owner arms a silence deadline
/// whenever `offer` returns `Started` or `Buffered` and calls `finalize`
/// when the deadline fires or the frame source ends.
#[derive(Debug)]
pub struct UtteranceAccumulator {
    speaker: SpeakerId,
    state: AccumulatorState,
    buffer: Vec<i16>,
    voiced_frames: usize,
}

impl UtteranceAccumulator {
    pub fn new(speaker: SpeakerId) -> Self {
        Self {
            speaker,
            state: AccumulatorState::Idle,
            buffer: Vec::new(),
            voiced_frames: 0,
        }
    }

    pub fn speaker(&self) -> SpeakerId {
        self.speaker
    }

    /// Whether any voiced audio has been buffered yet.
    pub fn is_recording(&self) -> bool {
        self.state == AccumulatorState::Recording
    }

    /// Offer one classified frame.
    pub fn offer(&mut self, frame: &PcmFrame, class: FrameClass) -> FrameDisposition {
        match (self.state, class) {
            (AccumulatorState::Idle, FrameClass::Voiced) => {
                info!(speaker = %self.speaker, "recording started");
                self.state = AccumulatorState::Recording;
                self.buffer.extend_from_slice(&frame.samples);
                self.voiced_frames = 1;
                FrameDisposition::Started
            }
            (AccumulatorState::Recording, FrameClass::Voiced) => {
                self.buffer.extend_from_slice(&frame.samples);
                self.voiced_frames += 1;
                FrameDisposition::Buffered
            }
            // Silent frames never enter the buffer, in either state.
            (_, FrameClass::Silent) => FrameDisposition::Ignored,
        }
    }

    /// Finalize: concatenated voiced frames become the payload. Returns
    /// `None` when nothing was buffered ("no audio recorded"), in which case
    /// downstream processing is skipped entirely.
    pub fn finalize(self) -> Option<Utterance> {
        if self.buffer.is_empty() {
            debug!(speaker = %self.speaker, "no audio recorded");
            return None;
        }
        info!(
            speaker = %self.speaker,
            voiced_frames = self.voiced_frames,
            samples = self.buffer.len(),
            "utterance finalized"
        );
        Some(Utterance {
            speaker: self.speaker,
            samples: self.buffer,
            voiced_frames: self.voiced_frames,
            finalized_at: Utc::now(),
        })
    }
}
