//! Energy gate: RMS-threshold classification of PCM frames.
//!
//! A frame is voiced when its RMS amplitude reaches a fixed threshold.
//! Deliberately no adaptive noise-floor tracking; the threshold is a tuning
//! constant in the raw i16 sample domain.

use crate::audio::PcmFrame;
use tracing::trace;

/// Classification of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    Voiced,
    Silent,
}

/// Stateless voiced/silent classifier over a fixed RMS threshold.
#[derive(Debug, Clone)]
pub struct EnergyGate {
    threshold: f32,
}

impl EnergyGate {
    /// Default threshold in raw sample units; tuned for 48 kHz mono channel audio.
    pub const DEFAULT_THRESHOLD: f32 = 60.0;

    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Classify one frame. Pure: no state, no side effects beyond a trace line.
    pub fn classify(&self, frame: &PcmFrame) -> FrameClass {
        let rms = frame.rms();
        let class = if rms >= self.threshold {
            FrameClass::Voiced
        } else {
            FrameClass::Silent
        };
        trace!(rms, ?class, "frame classified");
        class
    }
}

impl Default for EnergyGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_THRESHOLD)
    }
}
